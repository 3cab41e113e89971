//! Shared fixtures for integration tests.
//!
//! `ScriptRunner` evaluates a tiny cell language over `i64`:
//!
//! - statements are separated by `;`
//! - `out NAME = EXPR` binds `NAME` and exports it as a tag
//! - `NAME = EXPR` binds `NAME` in the namespace
//! - `fail` raises an error
//! - any other statement is an expression
//!
//! An expression is a `+`-separated sum of integers, namespace names,
//! `$hex` (plain read of a cell), `$hex.tag` (named entry of a cell) and
//! `@tag` (the tag as defined by another cell).

#![allow(dead_code)]

use dfkernel_core::{
    CellBatch, CellId, CellResult, CellRunner, CellUpdate, Controller, ExecutionContext,
    NamedTuple, Namespace, RunError, RunOverrides, RunRequest, Tag,
};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ScriptRunner {
    pub vars: BTreeMap<String, i64>,
    pub runs: BTreeMap<CellId, usize>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the code of `cell` was run.
    pub fn runs(&self, cell: u64) -> usize {
        self.runs.get(&CellId(cell)).copied().unwrap_or_default()
    }

    pub fn total_runs(&self) -> usize {
        self.runs.values().sum()
    }

    fn eval(
        &mut self,
        controller: &mut Controller<i64>,
        ctx: ExecutionContext,
        expr: &str,
    ) -> Result<i64, RunError> {
        let mut total = 0i64;
        for term in expr.split('+').map(str::trim) {
            total = total.saturating_add(self.term(controller, ctx, term)?);
        }
        Ok(total)
    }

    fn term(
        &mut self,
        controller: &mut Controller<i64>,
        ctx: ExecutionContext,
        term: &str,
    ) -> Result<i64, RunError> {
        if let Some(reference) = term.strip_prefix('$') {
            let (hex, tag) = match reference.split_once('.') {
                Some((hex, tag)) => (hex, Some(tag)),
                None => (reference, None),
            };
            let cell: CellId = hex.parse()?;
            let result = controller.read(&ctx, cell, self)?;
            return pick(result, tag);
        }
        if let Some(tag) = term.strip_prefix('@') {
            let cell = controller.get_external_link(tag, ctx.cell())?;
            let result = controller.read(&ctx, cell, self)?;
            return pick(result, Some(tag));
        }
        if let Ok(value) = term.parse::<i64>() {
            return Ok(value);
        }
        self.lookup(term)
            .ok_or_else(|| RunError::new("NameError", format!("name '{term}' is not defined")))
    }
}

fn pick(result: CellResult<i64>, tag: Option<&str>) -> Result<i64, RunError> {
    match (result, tag) {
        (CellResult::Plain(value), None) => Ok(value),
        (CellResult::Tagged(tuple), Some(tag)) => tuple
            .get(tag)
            .copied()
            .ok_or_else(|| RunError::new("KeyError", tag)),
        (CellResult::Tagged(_), None) => Err(RunError::new("TypeError", "tagged result")),
        (CellResult::Plain(_), Some(tag)) => Err(RunError::new("KeyError", tag)),
    }
}

impl Namespace<i64> for ScriptRunner {
    fn bind(&mut self, name: &str, value: i64) {
        self.vars.insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Option<i64> {
        self.vars.get(name).copied()
    }
}

impl CellRunner<i64> for ScriptRunner {
    fn run_cell(
        &mut self,
        controller: &mut Controller<i64>,
        ctx: ExecutionContext,
        request: RunRequest<'_>,
    ) -> Result<CellResult<i64>, RunError> {
        *self.runs.entry(request.cell).or_default() += 1;

        let mut outs = NamedTuple::new();
        let mut last = 0;
        for statement in request.code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if statement == "fail" {
                return Err(RunError::new("ValueError", "cell failed on purpose"));
            }
            let (exported, statement) = match statement.strip_prefix("out ") {
                Some(rest) => (true, rest.trim()),
                None => (false, statement),
            };
            last = match statement.split_once('=') {
                Some((name, expr)) => {
                    let name = name.trim();
                    let value = self.eval(controller, ctx, expr)?;
                    self.bind(name, value);
                    if exported {
                        outs.push(Some(Tag::new(name)), value);
                    }
                    value
                }
                None => self.eval(controller, ctx, statement)?,
            };
        }

        if outs.is_empty() {
            Ok(CellResult::Plain(last))
        } else {
            Ok(CellResult::Tagged(outs))
        }
    }
}

// =============================================================================
// BATCH HELPERS
// =============================================================================

pub fn id(n: u64) -> CellId {
    CellId(n)
}

/// A batch entry with declared references and output tags read off the code,
/// the way a front-end would supply them.
pub fn declared(code: &str) -> CellUpdate {
    let mut update = CellUpdate::new(code);
    for token in code.split(|c: char| c.is_whitespace() || c == '+' || c == ';') {
        if let Some(reference) = token.strip_prefix('$') {
            let (hex, tag) = match reference.split_once('.') {
                Some((hex, tag)) => (hex, vec![tag]),
                None => (reference, Vec::new()),
            };
            if let Ok(cell) = hex.parse::<CellId>() {
                update = update.with_input(cell, tag);
            }
        }
    }
    for statement in code.split(';').map(str::trim) {
        if let Some(rest) = statement.strip_prefix("out ") {
            if let Some((name, _)) = rest.split_once('=') {
                update = update.with_output_tag(name.trim());
            }
        }
    }
    update
}

/// Batch whose entries declare their references.
pub fn batch(cells: &[(u64, &str)]) -> CellBatch {
    cells
        .iter()
        .map(|(cell, code)| (CellId(*cell), declared(code)))
        .collect()
}

/// Batch with no declared references: edges only appear through reads.
pub fn raw_batch(cells: &[(u64, &str)]) -> CellBatch {
    cells
        .iter()
        .map(|(cell, code)| (CellId(*cell), CellUpdate::new(*code)))
        .collect()
}

pub fn execute(
    controller: &mut Controller<i64>,
    runner: &mut ScriptRunner,
    cell: u64,
) -> Result<CellResult<i64>, dfkernel_core::DataflowError> {
    controller.execute_cell(CellId(cell), runner, &RunOverrides::default())
}
