//! # Controller
//!
//! Orchestration layer of the dataflow CORE.
//!
//! The controller owns the cell table, the dependency graph and the tag
//! registry, and decides for every execution request whether a cached result
//! may be reused, whether the request must be rejected because of a cycle,
//! and which downstream cells must be marked stale or re-run.
//!
//! ## Execution Discipline
//!
//! Code is only ever run through the [`CellRunner`] seam. The runner receives
//! an [`ExecutionContext`] naming the cell being run; it is the only way to
//! call [`Controller::read`] and [`Controller::write`], and it can only be
//! created by the controller. Nested execution happens when a running cell
//! reads another: the read records a dependency edge and runs the referenced
//! cell to completion before returning.

use crate::cell::{Cell, CellSnapshot, CellUpdate};
use crate::config::{EngineConfig, RunFlags, RunOverrides};
use crate::formats::NotebookState;
use crate::graph::DependencyGraph;
use crate::links::LinkRegistry;
use crate::{CellId, CellResult, DataflowError, RunError, Tag};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A cell-update batch: the complete set of cells the notebook holds.
pub type CellBatch = BTreeMap<CellId, CellUpdate>;

// =============================================================================
// RUNNER SEAM
// =============================================================================

/// Token naming the cell whose execution is in progress.
///
/// Only the controller creates contexts; a runner receives one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    cell: CellId,
}

impl ExecutionContext {
    fn new(cell: CellId) -> Self {
        Self { cell }
    }

    /// The cell being executed.
    #[must_use]
    pub fn cell(&self) -> CellId {
        self.cell
    }
}

/// What the runner is asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest<'a> {
    pub cell: CellId,
    /// Persistent code of the cell, or its display code when absent.
    pub code: &'a str,
    /// Controller defaults merged with the request's overrides.
    pub flags: RunFlags,
}

/// The capability to actually run a cell's code.
///
/// Implementations evaluate `request.code` and may call back into the
/// controller through `ctx`, for example `controller.read(&ctx, other, self)`
/// to obtain another cell's output.
pub trait CellRunner<V> {
    fn run_cell(
        &mut self,
        controller: &mut Controller<V>,
        ctx: ExecutionContext,
        request: RunRequest<'_>,
    ) -> Result<CellResult<V>, RunError>;
}

// =============================================================================
// REQUESTS
// =============================================================================

/// An explicit execution request: apply `batch`, then run `cell`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub cell: CellId,
    pub batch: CellBatch,
    pub overrides: RunOverrides,
}

impl ExecuteRequest {
    #[must_use]
    pub fn new(cell: CellId, batch: CellBatch) -> Self {
        Self {
            cell,
            batch,
            overrides: RunOverrides::default(),
        }
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Everything reported back after an execution request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome<V> {
    pub cell: CellId,
    /// Result of the requested cell.
    pub result: Result<CellResult<V>, DataflowError>,
    /// Error raised by the auto-update cascade, if any.
    pub cascade: Option<DataflowError>,
    pub cells: BTreeMap<CellId, CellSnapshot>,
    pub edges: Vec<(CellId, CellId)>,
    /// Cells removed since the previous report.
    pub deleted_cells: Vec<CellId>,
}

impl<V> RequestOutcome<V> {
    /// Cells that failed during the cascade.
    #[must_use]
    pub fn cascade_failures(&self) -> &[CellId] {
        match &self.cascade {
            Some(DataflowError::CascadeFailure(cells)) => cells.as_slice(),
            _ => &[],
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Owner of all engine state.
#[derive(Debug, Clone)]
pub struct Controller<V> {
    graph: DependencyGraph,
    links: LinkRegistry,
    cells: BTreeMap<CellId, Cell<V>>,
    deleted_cells: Vec<CellId>,
    flags: RunFlags,
    executing: Option<CellId>,
}

impl<V> Default for Controller<V> {
    fn default() -> Self {
        Self {
            graph: DependencyGraph::new(),
            links: LinkRegistry::new(),
            cells: BTreeMap::new(),
            deleted_cells: Vec::new(),
            flags: RunFlags::default(),
            executing: None,
        }
    }
}

impl<V: Clone> Controller<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a controller using the configured default run flags.
    #[must_use]
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            flags: config.defaults,
            ..Self::default()
        }
    }

    /// Drop every cell, edge and link. Run flags are kept.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.links.clear();
        self.cells.clear();
        self.deleted_cells.clear();
        self.executing = None;
    }

    // =========================================================================
    // BATCH UPDATES
    // =========================================================================

    /// Synchronise the cell table with a batch.
    ///
    /// Cells absent from the batch are deleted and queued for notification.
    /// Every batch entry creates or updates its cell; a change of persistent
    /// code drops the cell's links and read-discovered parents and marks its
    /// downstream stale; otherwise references the cell no longer declares
    /// lose their edge. Declared references are then added as edges.
    pub fn update_cells(&mut self, batch: CellBatch) {
        let removed: Vec<CellId> = self
            .cells
            .keys()
            .filter(|id| !batch.contains_key(id))
            .copied()
            .collect();
        for id in removed {
            self.remove_cell(id);
        }

        let mut changed = Vec::new();
        let mut undeclared = Vec::new();
        for (id, update) in batch {
            let cell = self.cells.entry(id).or_insert_with(|| Cell::new(id));
            let before: Vec<CellId> = cell.input_refs().keys().copied().collect();
            if cell.update(update) {
                changed.push(id);
            } else {
                undeclared.extend(
                    before
                        .into_iter()
                        .filter(|parent| !cell.declares_input(*parent))
                        .map(|parent| (parent, id)),
                );
            }
        }

        for id in changed {
            debug!(cell = %id, "persistent code changed");
            self.links.remove_links(id);
            self.graph.remove_all_parents(id);
            self.set_downstream_stale(id);
        }
        for (parent, child) in undeclared {
            if self.graph.remove_edge(parent, child) {
                debug!(parent = %parent, child = %child, "dropped undeclared dependency");
            }
        }

        let declared: Vec<(CellId, CellId)> = self
            .cells
            .values()
            .flat_map(|cell| cell.input_refs().keys().map(move |parent| (*parent, cell.id())))
            .filter(|(parent, _)| self.cells.contains_key(parent))
            .collect();
        for (parent, child) in declared {
            self.graph.add_edge(parent, child);
        }
    }

    fn remove_cell(&mut self, id: CellId) {
        info!(cell = %id, "removing cell");
        self.graph.remove_node(id);
        self.links.remove_links(id);
        self.cells.remove(&id);
        self.deleted_cells.push(id);
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Produce the result of a cell, running it only if its cache is unusable.
    pub fn execute_cell<R>(
        &mut self,
        id: CellId,
        runner: &mut R,
        overrides: &RunOverrides,
    ) -> Result<CellResult<V>, DataflowError>
    where
        R: CellRunner<V> + ?Sized,
    {
        let cell = self.cells.get(&id).ok_or(DataflowError::UnknownCell(id))?;
        if cell.should_use_cached() {
            debug!(cell = %id, "using cached result");
            return cell
                .result()
                .cloned()
                .ok_or(DataflowError::NotYetComputed(id));
        }
        self.run_fresh(id, runner, overrides)
    }

    /// Run a cell unconditionally (cycle check included).
    fn run_fresh<R>(
        &mut self,
        id: CellId,
        runner: &mut R,
        overrides: &RunOverrides,
    ) -> Result<CellResult<V>, DataflowError>
    where
        R: CellRunner<V> + ?Sized,
    {
        if self.graph.has_cycle() {
            warn!(cell = %id, "rejecting execution: dependency cycle");
            return Err(DataflowError::CyclicDependency(id));
        }

        let cell = self.cells.get_mut(&id).ok_or(DataflowError::UnknownCell(id))?;
        cell.set_running();
        cell.record_executed_code();
        let code = cell.runnable_code().to_string();

        let flags = self.flags.apply(overrides);
        let ctx = ExecutionContext::new(id);
        let previous = self.executing.replace(id);
        info!(cell = %id, silent = flags.silent, "executing cell");

        let outcome = runner.run_cell(
            self,
            ctx,
            RunRequest {
                cell: id,
                code: &code,
                flags,
            },
        );

        // Publish while `id` still owns the executing slot.
        let published = match outcome {
            Ok(result) => self.write(&ctx, id, result.clone()).map(|()| result),
            Err(err) => {
                warn!(cell = %id, error = %err, "cell execution failed");
                self.mark_failed(id);
                Err(DataflowError::ExecutionFailure {
                    cell: id,
                    message: err.to_string(),
                })
            }
        };
        self.executing = previous;
        published
    }

    /// Record a failure and forget the edges the failed run discovered.
    fn mark_failed(&mut self, id: CellId) {
        let Some(cell) = self.cells.get_mut(&id) else {
            return;
        };
        cell.set_failed();

        let discovered: Vec<CellId> = self
            .graph
            .children_of(id)
            .filter(|child| {
                self.cells
                    .get(child)
                    .is_none_or(|cell| !cell.declares_input(id))
            })
            .collect();
        for child in discovered {
            self.graph.remove_edge(id, child);
        }
    }

    /// Read another cell's output on behalf of the running cell.
    ///
    /// Records the edge `id -> ctx.cell()`, then executes `id` (cached or
    /// fresh). A tagged result carrying no names and a single value is
    /// returned as that plain value.
    pub fn read<R>(
        &mut self,
        ctx: &ExecutionContext,
        id: CellId,
        runner: &mut R,
    ) -> Result<CellResult<V>, DataflowError>
    where
        R: CellRunner<V> + ?Sized,
    {
        if !self.cells.contains_key(&id) {
            return Err(DataflowError::UnknownCell(id));
        }
        if id == ctx.cell() {
            warn!(cell = %id, "rejecting self reference");
            return Err(DataflowError::CyclicDependency(id));
        }
        if self.graph.add_edge(id, ctx.cell()) {
            debug!(parent = %id, child = %ctx.cell(), "recorded dependency");
        }

        let result = self.execute_cell(id, runner, &RunOverrides::default())?;
        Ok(result.unwrap_view())
    }

    /// Publish a result for `id`. Only the executing cell may publish its own.
    ///
    /// The context must name `id` and `id` must be the innermost cell still
    /// running, so a context kept past the end of its run is refused. The
    /// cell's output tags become current links and its downstream is marked
    /// stale.
    pub fn write(
        &mut self,
        ctx: &ExecutionContext,
        id: CellId,
        result: CellResult<V>,
    ) -> Result<(), DataflowError> {
        if id != ctx.cell() || self.executing != Some(id) {
            return Err(DataflowError::UnauthorizedWrite {
                target: id,
                executing: ctx.cell(),
            });
        }
        let cell = self.cells.get_mut(&id).ok_or(DataflowError::UnknownCell(id))?;
        cell.set_result(result);

        let tags: Vec<Tag> = cell.output_tags().iter().cloned().collect();
        for tag in tags {
            self.links.add_link(tag, id, true);
        }
        self.set_downstream_stale(id);
        Ok(())
    }

    /// Force the next execution of `id` to run its code.
    pub fn invalidate(&mut self, id: CellId) -> Result<(), DataflowError> {
        self.cells
            .get_mut(&id)
            .map(Cell::mark_stale)
            .ok_or(DataflowError::UnknownCell(id))
    }

    /// The stored result of `id`, without running anything.
    pub fn cached_result(&self, id: CellId) -> Result<&CellResult<V>, DataflowError> {
        self.cells
            .get(&id)
            .ok_or(DataflowError::UnknownCell(id))?
            .result()
            .ok_or(DataflowError::NotYetComputed(id))
    }

    // =========================================================================
    // PROPAGATION
    // =========================================================================

    /// Mark every transitive child of `id` stale.
    pub fn set_downstream_stale(&mut self, id: CellId) {
        for child in self.graph.downstream(id) {
            if let Some(cell) = self.cells.get_mut(&child) {
                debug!(cell = %child, upstream = %id, "marking stale");
                cell.mark_stale();
            }
        }
    }

    /// Re-run the auto-updating cells downstream of `id`.
    ///
    /// Cells are visited once each in breadth-first order. A cell is skipped
    /// when it is running, has a running ancestor, already ran during this
    /// request, or does not opt into auto-update. No per-cell error stops the
    /// walk (a cached cell with no result fails as well as one whose code
    /// raised); every failing cell is reported once the walk ends.
    pub fn downstream_update<R>(&mut self, id: CellId, runner: &mut R) -> Result<(), DataflowError>
    where
        R: CellRunner<V> + ?Sized,
    {
        let mut failures = Vec::new();
        for child in self.graph.downstream_order(id) {
            let Some(cell) = self.cells.get(&child) else {
                continue;
            };
            let upstream_running = || {
                self.graph
                    .upstream(child)
                    .iter()
                    .any(|parent| self.cells.get(parent).is_some_and(Cell::is_running))
            };
            if cell.is_running() || upstream_running() || cell.did_run() || !cell.auto_update() {
                continue;
            }

            if let Err(err) = self.execute_cell(child, runner, &RunOverrides::default()) {
                debug!(cell = %child, error = %err, "auto-update failed");
                failures.push(child);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(cells = ?failures, "downstream update failed");
            Err(DataflowError::CascadeFailure(failures))
        }
    }

    /// Handle an explicit execution request end to end.
    ///
    /// Applies the batch, registers declared output tags, resets the
    /// per-request run markers, runs the target cell unconditionally and,
    /// on success, cascades to auto-updating dependents.
    pub fn run_request<R>(&mut self, request: ExecuteRequest, runner: &mut R) -> RequestOutcome<V>
    where
        R: CellRunner<V> + ?Sized,
    {
        let ExecuteRequest {
            cell,
            batch,
            overrides,
        } = request;

        self.update_cells(batch);
        let declared = self.output_tags();
        self.links.add_links(&declared);
        self.reset_did_run();

        let result = self
            .invalidate(cell)
            .and_then(|()| self.run_fresh(cell, runner, &overrides));

        let cascade = match &result {
            Ok(_) => {
                self.set_downstream_stale(cell);
                self.downstream_update(cell, runner).err()
            }
            Err(_) => None,
        };

        RequestOutcome {
            cell,
            result,
            cascade,
            cells: self.snapshot(),
            edges: self.edge_list(),
            deleted_cells: self.pop_deleted_cells(),
        }
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Rebuild from persisted state. Restored cells start stale.
    pub fn restore(&mut self, state: NotebookState) {
        self.clear();
        let batch: CellBatch = state
            .cells
            .into_iter()
            .map(|(id, snapshot)| (id, CellUpdate::from(snapshot)))
            .collect();
        self.update_cells(batch);
        for (parent, child) in state.edges {
            if self.cells.contains_key(&parent) && self.cells.contains_key(&child) {
                self.graph.add_edge(parent, child);
            }
        }
        self.deleted_cells.clear();
    }

    #[must_use]
    pub fn state(&self) -> NotebookState {
        NotebookState {
            cells: self.snapshot(),
            edges: self.edge_list(),
        }
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl<V> Controller<V> {
    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<&Cell<V>> {
        self.cells.get(&id)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell<V>> {
        self.cells.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    #[must_use]
    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    /// The cell whose run is in progress, if any.
    #[must_use]
    pub fn executing(&self) -> Option<CellId> {
        self.executing
    }

    #[must_use]
    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    /// Merge overrides into the controller-wide defaults.
    pub fn update_flags(&mut self, overrides: &RunOverrides) {
        self.flags = self.flags.apply(overrides);
    }

    pub fn set_running(&mut self, id: CellId) -> Result<(), DataflowError> {
        self.cells
            .get_mut(&id)
            .map(Cell::set_running)
            .ok_or(DataflowError::UnknownCell(id))
    }

    /// Clear every cell's per-request `did_run` marker.
    pub fn reset_did_run(&mut self) {
        for cell in self.cells.values_mut() {
            cell.reset_did_run();
        }
    }

    /// Drain the queue of deleted cells.
    pub fn pop_deleted_cells(&mut self) -> Vec<CellId> {
        std::mem::take(&mut self.deleted_cells)
    }

    /// Declared output tags of every cell, as tag -> definers.
    #[must_use]
    pub fn output_tags(&self) -> BTreeMap<Tag, BTreeSet<CellId>> {
        let mut tags: BTreeMap<Tag, BTreeSet<CellId>> = BTreeMap::new();
        for cell in self.cells.values() {
            for tag in cell.output_tags() {
                tags.entry(tag.clone()).or_default().insert(cell.id());
            }
        }
        tags
    }

    /// Names of the cells that have one.
    #[must_use]
    pub fn cell_names(&self) -> BTreeMap<CellId, String> {
        self.cells
            .values()
            .filter_map(|cell| cell.name().map(|name| (cell.id(), name.to_string())))
            .collect()
    }

    /// Reverse of [`Controller::cell_names`]. On duplicate names the highest id wins.
    #[must_use]
    pub fn cell_ids_by_name(&self) -> BTreeMap<String, CellId> {
        self.cells
            .values()
            .filter_map(|cell| cell.name().map(|name| (name.to_string(), cell.id())))
            .collect()
    }

    #[must_use]
    pub fn edge_list(&self) -> Vec<(CellId, CellId)> {
        self.graph.edge_list()
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<CellId, CellSnapshot> {
        self.cells
            .iter()
            .map(|(id, cell)| (*id, cell.snapshot()))
            .collect()
    }

    // =========================================================================
    // LINK PASSTHROUGHS
    // =========================================================================

    pub fn add_link(&mut self, tag: Tag, cell: CellId, make_current: bool) {
        self.links.add_link(tag, cell, make_current);
    }

    pub fn add_links(&mut self, output_tags: &BTreeMap<Tag, BTreeSet<CellId>>) {
        self.links.add_links(output_tags);
    }

    pub fn remove_links(&mut self, cell: CellId) {
        self.links.remove_links(cell);
    }

    #[must_use]
    pub fn has_external_link(&self, tag: &str, requester: CellId) -> bool {
        self.links.has_external_link(tag, requester)
    }

    pub fn get_external_link(&self, tag: &str, requester: CellId) -> Result<CellId, DataflowError> {
        self.links.get_external_link(tag, requester)
    }

    #[must_use]
    pub fn complete(&self, prefix: &str, input_tags: &BTreeMap<String, CellId>) -> Vec<String> {
        self.links.complete(prefix, input_tags)
    }
}

// =============================================================================
// TESTS
// =============================================================================
