//! # Formats
//!
//! Serialized forms of notebook state.

pub mod persistence;

#[cfg(feature = "crypto-hash")]
pub use persistence::state_digest;
pub use persistence::{
    NotebookState, PersistenceHeader, state_from_bytes, state_from_json, state_to_bytes,
    state_to_json,
};
