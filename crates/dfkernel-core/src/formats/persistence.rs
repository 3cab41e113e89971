//! # Persistence Format
//!
//! Binary and JSON serialization of notebook state.
//!
//! Format: Header (5 bytes) + postcard-serialized `NotebookState`.
//! - 4 bytes: Magic ("DFNB")
//! - 1 byte: Version
//!
//! File I/O is left to the embedder; these are pure transformations.
//!
//! ## Validation
//!
//! Size limits and the header are checked before the payload is decoded.

use crate::cell::CellSnapshot;
use crate::{CellId, DataflowError, primitives};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// NOTEBOOK STATE
// =============================================================================

/// Everything needed to rebuild a controller, minus cached results.
///
/// Restored cells start stale; their results are recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookState {
    pub cells: BTreeMap<CellId, CellSnapshot>,
    /// Dependency edges as `(parent, child)`.
    pub edges: Vec<(CellId, CellId)>,
}

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all state data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), DataflowError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(DataflowError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(DataflowError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; primitives::HEADER_SIZE] {
        let [m0, m1, m2, m3] = self.magic;
        [m0, m1, m2, m3, self.version]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DataflowError> {
        match bytes {
            [m0, m1, m2, m3, version, ..] => Ok(Self {
                magic: [*m0, *m1, *m2, *m3],
                version: *version,
            }),
            _ => Err(DataflowError::DeserializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BINARY FORMAT
// =============================================================================

/// Serialize state to bytes (header + payload).
pub fn state_to_bytes(state: &NotebookState) -> Result<Vec<u8>, DataflowError> {
    let payload = postcard::to_stdvec(state)
        .map_err(|e| DataflowError::SerializationError(e.to_string()))?;

    let mut bytes = Vec::with_capacity(primitives::HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&PersistenceHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Deserialize state from bytes.
///
/// Checks, in order: minimum size, maximum size, header. Only then is the
/// payload decoded.
pub fn state_from_bytes(bytes: &[u8]) -> Result<NotebookState, DataflowError> {
    if bytes.len() < primitives::HEADER_SIZE {
        return Err(DataflowError::DeserializationError(format!(
            "Data too short: minimum {} bytes required",
            primitives::HEADER_SIZE
        )));
    }
    if bytes.len() > primitives::MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(DataflowError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            primitives::MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    let payload = bytes.get(primitives::HEADER_SIZE..).unwrap_or_default();
    postcard::from_bytes(payload).map_err(|e| {
        DataflowError::DeserializationError(format!("Failed to decode notebook state: {e}"))
    })
}

// =============================================================================
// JSON FORMAT
// =============================================================================

/// Pretty-printed JSON, keyed by hex cell id.
pub fn state_to_json(state: &NotebookState) -> Result<String, DataflowError> {
    serde_json::to_string_pretty(state).map_err(|e| DataflowError::SerializationError(e.to_string()))
}

pub fn state_from_json(text: &str) -> Result<NotebookState, DataflowError> {
    serde_json::from_str(text).map_err(|e| DataflowError::DeserializationError(e.to_string()))
}

/// BLAKE3 digest (hex) of the binary encoding of `state`.
///
/// Only available with the `crypto-hash` feature.
#[cfg(feature = "crypto-hash")]
pub fn state_digest(state: &NotebookState) -> Result<String, DataflowError> {
    let bytes = state_to_bytes(state)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
