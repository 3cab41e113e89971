//! # dfkernel-core
//!
//! The dependency-tracking execution engine of a dataflow notebook.
//!
//! Instead of a single linear execution counter, every cell is a node whose
//! inputs are references to other cells' outputs. The engine decides per cell
//! whether a cached result may be reused, which cells must be re-executed when
//! an upstream cell changes, how to reject circular dependencies, and how
//! symbolic references ("tags") resolve to defining cells.
//!
//! ## Layout
//!
//! - `graph`: dependency edges and cycle detection
//! - `cell`: per-cell state machine
//! - `links`: tag registry and completion
//! - `controller`: orchestration, caching and downstream cascade
//! - `function`: cells as callable units
//!
//! ## Architectural Constraints
//!
//! - The engine never evaluates code itself; it calls a [`CellRunner`]
//! - A result can only be published by the cell that is executing
//! - Pure Rust: NO async, NO network dependencies
//! - Deterministic: `BTreeMap`/`BTreeSet` for every owned collection

// =============================================================================
// MODULES
// =============================================================================

pub mod cell;
pub mod config;
pub mod controller;
pub mod formats;
pub mod function;
pub mod graph;
pub mod links;
#[cfg(feature = "logging")]
pub mod logging;
pub mod primitives;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{CellId, CellResult, DataflowError, NamedTuple, RunError, Tag};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use cell::{Cell, CellSnapshot, CellUpdate};
pub use controller::{
    CellBatch, CellRunner, Controller, ExecuteRequest, ExecutionContext, RequestOutcome,
    RunRequest,
};
pub use function::{FunctionBinder, FunctionOutput, FunctionSignature, Namespace};
pub use graph::DependencyGraph;
pub use links::LinkRegistry;

// =============================================================================
// RE-EXPORTS: Configuration & Formats
// =============================================================================

pub use config::{EngineConfig, LogConfig, LogFormat, RunFlags, RunOverrides};
pub use formats::{
    NotebookState, PersistenceHeader, state_from_bytes, state_from_json, state_to_bytes,
    state_to_json,
};
