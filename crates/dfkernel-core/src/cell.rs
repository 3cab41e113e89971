//! # Cell State
//!
//! Per-cell state and its transitions.
//!
//! A cell moves between three observable states:
//!
//! | State   | `is_stale` | `is_running` | `result` |
//! |---------|------------|--------------|----------|
//! | stale   | true       | false        | any      |
//! | running | any        | true         | any      |
//! | fresh   | false      | false        | `Some`   |
//!
//! A new cell starts stale with no result. Only a change of persistent code
//! invalidates a cached result; cosmetic edits (display code, name) do not.

use crate::{CellId, CellResult, Tag};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// UPDATE RECORD
// =============================================================================

/// One entry of a cell-update batch.
///
/// Every field defaults, so a batch can be deserialized from sparse JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellUpdate {
    /// Display code as the user sees it.
    pub code: Option<String>,
    /// Canonical code; the cache key of the cell.
    pub persistent_code: Option<String>,
    /// Code as last submitted for execution by the front-end.
    pub executed_code: Option<String>,
    /// Declared references: referenced cell -> tags read from it.
    pub input_refs: BTreeMap<CellId, BTreeSet<Tag>>,
    /// Declared output tags.
    pub output_tags: BTreeSet<Tag>,
    pub name: Option<String>,
    pub auto_update: bool,
    pub force_cached: bool,
}

impl CellUpdate {
    /// An update whose display code and persistent code are both `code`.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            code: Some(code.clone()),
            persistent_code: Some(code),
            ..Self::default()
        }
    }

    /// Replace the display code, keeping the persistent code.
    #[must_use]
    pub fn with_display_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Declare a reference to `cell`, reading the given tags.
    #[must_use]
    pub fn with_input<I, T>(mut self, cell: CellId, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.input_refs
            .entry(cell)
            .or_default()
            .extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_output_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.output_tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = enabled;
        self
    }

    #[must_use]
    pub fn force_cached(mut self, enabled: bool) -> Self {
        self.force_cached = enabled;
        self
    }
}

// =============================================================================
// CELL
// =============================================================================

/// Mutable state of a single cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell<V> {
    id: CellId,
    code: Option<String>,
    persistent_code: Option<String>,
    executed_code: Option<String>,
    input_refs: BTreeMap<CellId, BTreeSet<Tag>>,
    output_tags: BTreeSet<Tag>,
    name: Option<String>,
    result: Option<CellResult<V>>,
    is_stale: bool,
    is_running: bool,
    did_run: bool,
    auto_update: bool,
    force_cached: bool,
}

impl<V> Cell<V> {
    /// Create a new stale cell with no code and no result.
    #[must_use]
    pub fn new(id: CellId) -> Self {
        Self {
            id,
            code: None,
            persistent_code: None,
            executed_code: None,
            input_refs: BTreeMap::new(),
            output_tags: BTreeSet::new(),
            name: None,
            result: None,
            is_stale: true,
            is_running: false,
            did_run: false,
            auto_update: false,
            force_cached: false,
        }
    }

    /// Apply a batch entry. Returns `true` iff the persistent code changed.
    ///
    /// Display code, name, executed code, references, output tags and the
    /// policy flags are always replaced. The cached result is dropped only
    /// when the incoming persistent code is present and differs.
    pub fn update(&mut self, update: CellUpdate) -> bool {
        self.code = update.code;
        self.name = update.name;
        self.executed_code = update.executed_code;
        self.input_refs = update.input_refs;
        self.output_tags = update.output_tags;
        self.auto_update = update.auto_update;
        self.force_cached = update.force_cached;

        match update.persistent_code {
            Some(code) if self.persistent_code.as_deref() != Some(code.as_str()) => {
                self.persistent_code = Some(code);
                self.result = None;
                self.is_stale = true;
                true
            }
            _ => false,
        }
    }

    /// Store a successful result.
    pub fn set_result(&mut self, result: CellResult<V>) {
        self.output_tags = result.output_tags();
        self.result = Some(result);
        self.is_stale = false;
        self.is_running = false;
        self.did_run = true;
    }

    /// Record a failed execution.
    pub fn set_failed(&mut self) {
        self.result = None;
        self.is_stale = true;
        self.is_running = false;
        self.did_run = true;
    }

    /// True if the cached result may be returned without running the cell.
    #[must_use]
    pub fn should_use_cached(&self) -> bool {
        self.force_cached || !self.is_stale
    }

    pub fn set_running(&mut self) {
        self.is_running = true;
    }

    pub fn reset_did_run(&mut self) {
        self.did_run = false;
    }

    pub fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    /// Copy the display code into `executed_code` at the start of a run.
    pub fn record_executed_code(&mut self) {
        self.executed_code.clone_from(&self.code);
    }

    /// Code handed to the runner: persistent code, else display code.
    #[must_use]
    pub fn runnable_code(&self) -> &str {
        self.persistent_code
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or_default()
    }

    /// True if `parent` appears among the declared references.
    #[must_use]
    pub fn declares_input(&self, parent: CellId) -> bool {
        self.input_refs.contains_key(&parent)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn persistent_code(&self) -> Option<&str> {
        self.persistent_code.as_deref()
    }

    #[must_use]
    pub fn executed_code(&self) -> Option<&str> {
        self.executed_code.as_deref()
    }

    #[must_use]
    pub fn input_refs(&self) -> &BTreeMap<CellId, BTreeSet<Tag>> {
        &self.input_refs
    }

    #[must_use]
    pub fn output_tags(&self) -> &BTreeSet<Tag> {
        &self.output_tags
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn result(&self) -> Option<&CellResult<V>> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.is_stale
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    #[must_use]
    pub fn did_run(&self) -> bool {
        self.did_run
    }

    #[must_use]
    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    #[must_use]
    pub fn force_cached(&self) -> bool {
        self.force_cached
    }

    /// Serializable projection of the cell, as reported to front-ends.
    #[must_use]
    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            cell_id: self.id,
            name: self.name.clone(),
            code: self.code.clone(),
            persistent_code: self.persistent_code.clone(),
            executed_code: self.executed_code.clone(),
            input_refs: self
                .input_refs
                .iter()
                .map(|(cell, tags)| (*cell, tags.iter().cloned().collect()))
                .collect(),
            output_tags: self.output_tags.iter().cloned().collect(),
            auto_update: self.auto_update,
            force_cached: self.force_cached,
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Serializable view of a cell. Results are not part of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub cell_id: CellId,
    pub name: Option<String>,
    pub code: Option<String>,
    pub persistent_code: Option<String>,
    pub executed_code: Option<String>,
    pub input_refs: BTreeMap<CellId, Vec<Tag>>,
    pub output_tags: Vec<Tag>,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub force_cached: bool,
}

impl From<CellSnapshot> for CellUpdate {
    fn from(snapshot: CellSnapshot) -> Self {
        Self {
            code: snapshot.code,
            persistent_code: snapshot.persistent_code,
            executed_code: snapshot.executed_code,
            input_refs: snapshot
                .input_refs
                .into_iter()
                .map(|(cell, tags)| (cell, tags.into_iter().collect()))
                .collect(),
            output_tags: snapshot.output_tags.into_iter().collect(),
            name: snapshot.name,
            auto_update: snapshot.auto_update,
            force_cached: snapshot.force_cached,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NamedTuple;

    fn fresh_cell(code: &str) -> Cell<i64> {
        let mut cell = Cell::new(CellId(1));
        cell.update(CellUpdate::new(code));
        cell.set_result(CellResult::Plain(1));
        cell
    }

    #[test]
    fn new_cell_is_stale_without_result() {
        let cell: Cell<i64> = Cell::new(CellId(1));
        assert!(cell.is_stale());
        assert!(cell.result().is_none());
        assert!(!cell.should_use_cached());
    }

    #[test]
    fn update_reports_persistent_code_change() {
        let mut cell: Cell<i64> = Cell::new(CellId(1));
        assert!(cell.update(CellUpdate::new("x = 1")));
        assert!(!cell.update(CellUpdate::new("x = 1")));
        assert!(cell.update(CellUpdate::new("x = 2")));
    }

    #[test]
    fn cosmetic_edit_keeps_cached_result() {
        let mut cell = fresh_cell("x = 1");
        let changed = cell.update(
            CellUpdate::new("x = 1")
                .with_display_code("x  =  1")
                .with_name("setup"),
        );

        assert!(!changed);
        assert!(!cell.is_stale());
        assert_eq!(cell.result(), Some(&CellResult::Plain(1)));
        assert_eq!(cell.code(), Some("x  =  1"));
        assert_eq!(cell.name(), Some("setup"));
    }

    #[test]
    fn missing_persistent_code_keeps_result() {
        let mut cell = fresh_cell("x = 1");
        let changed = cell.update(CellUpdate {
            code: Some("y".to_string()),
            ..CellUpdate::default()
        });

        assert!(!changed);
        assert_eq!(cell.persistent_code(), Some("x = 1"));
        assert!(cell.result().is_some());
    }

    #[test]
    fn code_change_clears_result() {
        let mut cell = fresh_cell("x = 1");
        assert!(cell.update(CellUpdate::new("x = 2")));
        assert!(cell.is_stale());
        assert!(cell.result().is_none());
    }

    #[test]
    fn set_result_derives_output_tags() {
        let mut cell: Cell<i64> = Cell::new(CellId(1));
        cell.update(CellUpdate::new("out").with_output_tag("stale_tag"));
        cell.set_running();
        cell.set_result(CellResult::Tagged(NamedTuple::named([("a", 1), ("b", 2)])));

        let tags: Vec<_> = cell.output_tags().iter().map(Tag::as_str).collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(!cell.is_running());
        assert!(cell.did_run());
        assert!(cell.should_use_cached());
    }

    #[test]
    fn set_failed_leaves_cell_stale() {
        let mut cell = fresh_cell("x = 1");
        cell.set_running();
        cell.set_failed();

        assert!(cell.is_stale());
        assert!(cell.result().is_none());
        assert!(!cell.is_running());
        assert!(cell.did_run());
    }

    #[test]
    fn force_cached_overrides_staleness() {
        let mut cell: Cell<i64> = Cell::new(CellId(1));
        cell.update(CellUpdate::new("x").force_cached(true));
        assert!(cell.is_stale());
        assert!(cell.should_use_cached());
    }

    #[test]
    fn runnable_code_falls_back_to_display_code() {
        let mut cell: Cell<i64> = Cell::new(CellId(1));
        assert_eq!(cell.runnable_code(), "");

        cell.update(CellUpdate {
            code: Some("display".to_string()),
            ..CellUpdate::default()
        });
        assert_eq!(cell.runnable_code(), "display");

        cell.update(CellUpdate::new("canonical").with_display_code("display"));
        assert_eq!(cell.runnable_code(), "canonical");
    }

    #[test]
    fn snapshot_converts_back_to_update() {
        let update = CellUpdate::new("$2 + 1")
            .with_input(CellId(2), ["total"])
            .with_output_tag("sum")
            .with_name("adder")
            .auto_update(true);

        let mut cell: Cell<i64> = Cell::new(CellId(3));
        cell.update(update.clone());

        let snapshot = cell.snapshot();
        assert_eq!(snapshot.cell_id, CellId(3));
        assert_eq!(snapshot.input_refs[&CellId(2)], vec![Tag::new("total")]);
        assert_eq!(CellUpdate::from(snapshot), update);
    }

    #[test]
    fn update_deserializes_from_sparse_json() {
        let update: CellUpdate =
            serde_json::from_str(r#"{"code": "a", "input_refs": {"1f": ["x"]}}"#)
                .expect("deserialize");

        assert_eq!(update.code.as_deref(), Some("a"));
        assert!(update.persistent_code.is_none());
        assert!(update.input_refs[&CellId(0x1f)].contains("x"));
        assert!(!update.auto_update);
    }
}
