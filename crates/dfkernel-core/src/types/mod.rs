//! # Core Type Definitions
//!
//! This module contains the types shared by every part of the dataflow CORE:
//! - Identifiers (`CellId`, `Tag`)
//! - Cell results (`CellResult`, `NamedTuple`)
//! - Error types (`DataflowError`, `RunError`)
//!
//! ## Determinism Guarantees
//!
//! Identifiers implement `Ord` so that every collection keyed by them is a
//! `BTreeMap`/`BTreeSet` with a stable iteration order.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identity of a cell.
///
/// A cell is identified by the execution counter it was created with. Outside
/// the engine (display, serde, completion) the counter is always rendered as
/// lowercase hexadecimal, e.g. `CellId(255)` is `"ff"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellId(pub u64);

impl CellId {
    /// Create a cell id from a raw execution counter.
    #[must_use]
    pub const fn new(counter: u64) -> Self {
        Self(counter)
    }

    /// Get the raw execution counter.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for CellId {
    type Err = DataflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DataflowError::InvalidCellId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| DataflowError::InvalidCellId(s.to_string()))
    }
}

impl TryFrom<String> for CellId {
    type Error = DataflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CellId> for String {
    fn from(id: CellId) -> Self {
        id.to_string()
    }
}

/// A symbolic output name.
///
/// Cells expose tags as part of their result so that other cells can refer to
/// an output by name instead of by raw cell identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub String);

impl Tag {
    /// Create a new tag from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// An ordered sequence of optionally named values.
///
/// Used both for the named sub-results of a tagged cell result and for the
/// aggregate returned by a cell called as a function with several outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTuple<V> {
    entries: Vec<(Option<Tag>, V)>,
}

impl<V> Default for NamedTuple<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> NamedTuple<V> {
    /// Create an empty tuple.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tuple where every entry carries a name.
    pub fn named<I, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, V)>,
        T: Into<Tag>,
    {
        entries
            .into_iter()
            .map(|(tag, value)| (Some(tag.into()), value))
            .collect()
    }

    /// Append an entry.
    pub fn push(&mut self, tag: Option<Tag>, value: V) {
        self.entries.push((tag, value));
    }

    /// Look up the first entry with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(tag, _)| tag.as_ref().is_some_and(|t| t.as_str() == name))
            .map(|(_, value)| value)
    }

    /// Names carried by the tuple, in order.
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.entries.iter().filter_map(|(tag, _)| tag.as_ref())
    }

    /// Values carried by the tuple, in order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Iterate over `(name, value)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (Option<&Tag>, &V)> {
        self.entries.iter().map(|(tag, value)| (tag.as_ref(), value))
    }

    /// True if at least one entry carries a name.
    #[must_use]
    pub fn has_names(&self) -> bool {
        self.entries.iter().any(|(tag, _)| tag.is_some())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the tuple, returning its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Option<Tag>, V)> {
        self.entries
    }
}

impl<V> FromIterator<(Option<Tag>, V)> for NamedTuple<V> {
    fn from_iter<I: IntoIterator<Item = (Option<Tag>, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// The value produced by a successful cell execution.
///
/// `V` is opaque to the engine. A `Tagged` result exposes named sub-results;
/// a `Plain` result exposes no tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellResult<V> {
    /// An ordinary value.
    Plain(V),
    /// A structured value with (optionally) named entries.
    Tagged(NamedTuple<V>),
}

impl<V> CellResult<V> {
    /// Tags exposed by this result.
    #[must_use]
    pub fn output_tags(&self) -> BTreeSet<Tag> {
        match self {
            Self::Plain(_) => BTreeSet::new(),
            Self::Tagged(tuple) => tuple.tags().cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Tagged(_))
    }

    /// Borrow the value of a plain result.
    #[must_use]
    pub fn as_plain(&self) -> Option<&V> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Tagged(_) => None,
        }
    }

    /// Look up a named sub-result of a tagged result.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&V> {
        match self {
            Self::Plain(_) => None,
            Self::Tagged(tuple) => tuple.get(tag),
        }
    }

    /// Collapse a tagged result that carries no names and a single value
    /// into that value. Every other result is returned unchanged.
    #[must_use]
    pub fn unwrap_view(self) -> Self {
        match self {
            Self::Tagged(tuple) if !tuple.has_names() && tuple.len() == 1 => {
                match tuple.into_entries().pop() {
                    Some((_, value)) => Self::Plain(value),
                    None => Self::Tagged(NamedTuple::new()),
                }
            }
            other => other,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failure reported by the run-cell collaborator.
///
/// `name` is the exception kind (for example `"ZeroDivisionError"`), and
/// `message` its rendered value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct RunError {
    pub name: String,
    pub message: String,
}

impl RunError {
    /// Create a new run error.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<DataflowError> for RunError {
    fn from(err: DataflowError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Errors that can occur in the dataflow engine.
///
/// - No silent failures
/// - Use `Result<T, DataflowError>` for fallible operations
/// - The CORE never panics; all errors are reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataflowError {
    /// An operation referenced a cell that is not in the cell table.
    #[error("Invalid reference to cell '{0}'")]
    UnknownCell(CellId),

    /// Execution was requested while the dependency graph contains a cycle.
    #[error("Out[{0}] results in a cyclical call")]
    CyclicDependency(CellId),

    /// The run-cell collaborator reported a failure for this cell.
    #[error("Cell '{cell}' raised an exception: {message}")]
    ExecutionFailure { cell: CellId, message: String },

    /// One or more cells failed during an automatic downstream cascade.
    #[error("Cell(s) {} raised an exception", join_ids(.0))]
    CascadeFailure(Vec<CellId>),

    /// A cell tried to publish a result under another cell's identity.
    #[error("Out[{target}] can only be modified by its own cell (executing: {executing})")]
    UnauthorizedWrite { target: CellId, executing: CellId },

    /// No cell currently defines the tag.
    #[error("No cell defines '{0}'")]
    UndefinedTag(Tag),

    /// The only current definer of the tag is the requesting cell itself.
    #[error("No external link to '{tag}' for cell '{requester}'")]
    AmbiguousTag { tag: Tag, requester: CellId },

    /// A cached value was requested for a cell without a result.
    #[error("Cell '{0}' has not yet been computed")]
    NotYetComputed(CellId),

    /// The cell was called as a function but has no declared signature.
    #[error("Cell '{0}' has no function signature")]
    NotAFunction(CellId),

    /// A function call supplied the wrong number of arguments.
    #[error("Cell '{cell}' takes {expected} argument(s) but {got} were given")]
    ArgumentCount {
        cell: CellId,
        expected: usize,
        got: usize,
    },

    /// A declared output variable was not defined by the cell.
    #[error("Cell '{cell}' did not define output variable '{name}'")]
    MissingOutputVariable { cell: CellId, name: String },

    /// A string could not be parsed as a hexadecimal cell id.
    #[error("Invalid cell id: {0:?}")]
    InvalidCellId(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Configuration could not be loaded or applied.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl DataflowError {
    /// Short, stable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownCell(_) => "UnknownCell",
            Self::CyclicDependency(_) => "CyclicDependency",
            Self::ExecutionFailure { .. } => "ExecutionFailure",
            Self::CascadeFailure(_) => "CascadeFailure",
            Self::UnauthorizedWrite { .. } => "UnauthorizedWrite",
            Self::UndefinedTag(_) => "UndefinedTag",
            Self::AmbiguousTag { .. } => "AmbiguousTag",
            Self::NotYetComputed(_) => "NotYetComputed",
            Self::NotAFunction(_) => "NotAFunction",
            Self::ArgumentCount { .. } => "ArgumentCount",
            Self::MissingOutputVariable { .. } => "MissingOutputVariable",
            Self::InvalidCellId(_) => "InvalidCellId",
            Self::SerializationError(_) => "SerializationError",
            Self::DeserializationError(_) => "DeserializationError",
            Self::ConfigError(_) => "ConfigError",
            Self::IoError(_) => "IoError",
        }
    }
}

fn join_ids(ids: &[CellId]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// TESTS
// =============================================================================
