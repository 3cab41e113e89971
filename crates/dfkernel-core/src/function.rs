//! # Cell Functions
//!
//! Exposes a cell as a callable unit with declared input and output
//! variable names.
//!
//! A call binds the arguments into the runner's namespace under the input
//! names, re-runs the cell, and reads the output names back. The first call
//! runs the cell once beforehand to establish its body.

use crate::config::RunOverrides;
use crate::controller::{CellRunner, Controller};
use crate::{CellId, CellResult, DataflowError, NamedTuple, Tag};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Variable storage shared between calls and cell runs.
pub trait Namespace<V> {
    fn bind(&mut self, name: &str, value: V);
    fn lookup(&self, name: &str) -> Option<V>;
}

/// Declared variables of a function cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSignature {
    pub ivars: Vec<String>,
    pub ovars: Vec<String>,
}

/// The value of a function call, shaped by the number of output variables.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutput<V> {
    /// No output variables: the cell's own result.
    Result(CellResult<V>),
    /// Exactly one output variable.
    Value(V),
    /// Several output variables, named and in declared order.
    Tuple(NamedTuple<V>),
}

#[derive(Debug, Clone, Default)]
pub struct FunctionBinder {
    signatures: BTreeMap<CellId, FunctionSignature>,
    established: BTreeSet<CellId>,
}

impl FunctionBinder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.signatures.clear();
        self.established.clear();
    }

    pub fn set_signature(&mut self, id: CellId, ivars: Vec<String>, ovars: Vec<String>) {
        self.signatures.insert(id, FunctionSignature { ivars, ovars });
    }

    pub fn set_cell_ivars(&mut self, id: CellId, ivars: Vec<String>) {
        self.signatures.entry(id).or_default().ivars = ivars;
    }

    pub fn set_cell_ovars(&mut self, id: CellId, ovars: Vec<String>) {
        self.signatures.entry(id).or_default().ovars = ovars;
    }

    #[must_use]
    pub fn signature(&self, id: CellId) -> Option<&FunctionSignature> {
        self.signatures.get(&id)
    }

    /// Mark the function body of `id` as established.
    pub fn set_function_body(&mut self, id: CellId) {
        self.established.insert(id);
    }

    #[must_use]
    pub fn has_function_body(&self, id: CellId) -> bool {
        self.established.contains(&id)
    }

    /// Forget a deleted cell.
    pub fn remove(&mut self, id: CellId) {
        self.signatures.remove(&id);
        self.established.remove(&id);
    }

    /// Call cell `id` with positional `args`.
    pub fn call<V, R>(
        &mut self,
        controller: &mut Controller<V>,
        runner: &mut R,
        id: CellId,
        args: Vec<V>,
    ) -> Result<FunctionOutput<V>, DataflowError>
    where
        V: Clone,
        R: CellRunner<V> + Namespace<V> + ?Sized,
    {
        let signature = self
            .signatures
            .get(&id)
            .cloned()
            .ok_or(DataflowError::NotAFunction(id))?;
        if !controller.contains(id) {
            return Err(DataflowError::UnknownCell(id));
        }
        if args.len() != signature.ivars.len() {
            return Err(DataflowError::ArgumentCount {
                cell: id,
                expected: signature.ivars.len(),
                got: args.len(),
            });
        }

        let defaults = RunOverrides::default();
        if !self.has_function_body(id) {
            debug!(cell = %id, "establishing function body");
            controller.execute_cell(id, &mut *runner, &defaults)?;
            self.set_function_body(id);
        }

        for (name, arg) in signature.ivars.iter().zip(args) {
            runner.bind(name, arg);
        }
        controller.invalidate(id)?;
        let result = controller.execute_cell(id, &mut *runner, &defaults)?;

        let output = |name: &String| {
            runner
                .lookup(name)
                .ok_or_else(|| DataflowError::MissingOutputVariable {
                    cell: id,
                    name: name.clone(),
                })
        };

        match signature.ovars.as_slice() {
            [] => Ok(FunctionOutput::Result(result)),
            [single] => output(single).map(FunctionOutput::Value),
            many => {
                let mut tuple = NamedTuple::new();
                for name in many {
                    tuple.push(Some(Tag::new(name.as_str())), output(name)?);
                }
                Ok(FunctionOutput::Tuple(tuple))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellUpdate;
    use crate::controller::{ExecutionContext, RunRequest};
    use crate::RunError;

    /// Code is `target = a + b + ...` over integers and namespace names.
    #[derive(Default)]
    struct AssignRunner {
        vars: BTreeMap<String, i64>,
        runs: usize,
    }

    impl Namespace<i64> for AssignRunner {
        fn bind(&mut self, name: &str, value: i64) {
            self.vars.insert(name.to_string(), value);
        }

        fn lookup(&self, name: &str) -> Option<i64> {
            self.vars.get(name).copied()
        }
    }

    impl CellRunner<i64> for AssignRunner {
        fn run_cell(
            &mut self,
            _: &mut Controller<i64>,
            _: ExecutionContext,
            request: RunRequest<'_>,
        ) -> Result<CellResult<i64>, RunError> {
            self.runs += 1;
            let mut last = 0;
            for statement in request.code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                let (target, expr) = statement
                    .split_once('=')
                    .ok_or_else(|| RunError::new("SyntaxError", statement))?;
                let mut value = 0;
                for term in expr.split('+').map(str::trim) {
                    value += match term.parse::<i64>() {
                        Ok(n) => n,
                        Err(_) => self
                            .lookup(term)
                            .ok_or_else(|| RunError::new("NameError", term))?,
                    };
                }
                self.bind(target.trim(), value);
                last = value;
            }
            Ok(CellResult::Plain(last))
        }
    }

    fn setup(code: &str) -> (Controller<i64>, AssignRunner) {
        let mut controller = Controller::new();
        controller.update_cells([(CellId(1), CellUpdate::new(code))].into_iter().collect());
        let mut runner = AssignRunner::default();
        runner.bind("x", 0);
        runner.bind("y", 0);
        (controller, runner)
    }

    #[test]
    fn single_output_is_a_value() {
        let (mut controller, mut runner) = setup("y = x + 1");
        let mut binder = FunctionBinder::new();
        binder.set_signature(CellId(1), vec!["x".into()], vec!["y".into()]);

        let out = binder
            .call(&mut controller, &mut runner, CellId(1), vec![41])
            .expect("call");
        assert_eq!(out, FunctionOutput::Value(42));
        assert!(binder.has_function_body(CellId(1)));
    }

    #[test]
    fn body_is_established_once() {
        let (mut controller, mut runner) = setup("y = x + 1");
        let mut binder = FunctionBinder::new();
        binder.set_signature(CellId(1), vec!["x".into()], vec!["y".into()]);

        binder.call(&mut controller, &mut runner, CellId(1), vec![1]).expect("first");
        assert_eq!(runner.runs, 2);
        binder.call(&mut controller, &mut runner, CellId(1), vec![2]).expect("second");
        assert_eq!(runner.runs, 3);
    }

    #[test]
    fn several_outputs_form_a_tuple() {
        let (mut controller, mut runner) = setup("y = x + 1; z = y + y");
        let mut binder = FunctionBinder::new();
        binder.set_cell_ivars(CellId(1), vec!["x".into()]);
        binder.set_cell_ovars(CellId(1), vec!["z".into(), "y".into()]);

        let out = binder
            .call(&mut controller, &mut runner, CellId(1), vec![1])
            .expect("call");
        assert_eq!(out, FunctionOutput::Tuple(NamedTuple::named([("z", 4), ("y", 2)])));
    }

    #[test]
    fn no_outputs_returns_cell_result() {
        let (mut controller, mut runner) = setup("y = x + 5");
        let mut binder = FunctionBinder::new();
        binder.set_signature(CellId(1), vec!["x".into()], Vec::new());

        let out = binder
            .call(&mut controller, &mut runner, CellId(1), vec![1])
            .expect("call");
        assert_eq!(out, FunctionOutput::Result(CellResult::Plain(6)));
    }

    #[test]
    fn argument_count_is_strict() {
        let (mut controller, mut runner) = setup("y = x + 1");
        let mut binder = FunctionBinder::new();
        binder.set_signature(CellId(1), vec!["x".into()], vec!["y".into()]);

        let err = binder
            .call(&mut controller, &mut runner, CellId(1), vec![1, 2])
            .expect_err("must fail");
        assert_eq!(
            err,
            DataflowError::ArgumentCount {
                cell: CellId(1),
                expected: 1,
                got: 2,
            }
        );
        assert_eq!(runner.runs, 0);
    }

    #[test]
    fn missing_signature_is_not_a_function() {
        let (mut controller, mut runner) = setup("y = 1");
        let mut binder = FunctionBinder::new();
        assert_eq!(
            binder.call(&mut controller, &mut runner, CellId(1), Vec::new()),
            Err(DataflowError::NotAFunction(CellId(1)))
        );
    }

    #[test]
    fn undefined_output_is_reported() {
        let (mut controller, mut runner) = setup("y = x + 1");
        let mut binder = FunctionBinder::new();
        binder.set_signature(CellId(1), vec!["x".into()], vec!["w".into()]);

        let err = binder
            .call(&mut controller, &mut runner, CellId(1), vec![1])
            .expect_err("must fail");
        assert!(matches!(err, DataflowError::MissingOutputVariable { name, .. } if name == "w"));
    }

    #[test]
    fn deleted_cell_is_unknown() {
        let (mut controller, mut runner) = setup("y = 1");
        let mut binder = FunctionBinder::new();
        binder.set_signature(CellId(2), Vec::new(), Vec::new());
        assert_eq!(
            binder.call(&mut controller, &mut runner, CellId(2), Vec::new()),
            Err(DataflowError::UnknownCell(CellId(2)))
        );
    }
}
