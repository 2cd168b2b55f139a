//! Tree-walking evaluator.
//!
//! Evaluation is pure: the only state is the environment of bound names,
//! seeded with the caller's bindings (`df` or `tables`) and extended by each
//! `def`. Every node visited costs one step against the budget.

use indexmap::IndexMap;

use crate::ast::{Call, Expr, Position, Program};
use crate::errors::{ScriptError, ScriptResult};
use crate::ops::{self, Args, Ctx, Kwargs, Op};
use crate::parser::DEFAULT_MAX_DEPTH;
use crate::value::Value;

/// Evaluation budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of expression nodes evaluated.
    pub max_steps: u64,
    /// Maximum rows in any produced table.
    pub max_rows: usize,
    /// Maximum nesting of calls and lists, `def` included.
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_rows: 1_000_000,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// One active form at the time of failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Short rendering of the form, e.g. `(filter ...)`.
    pub label: String,
    /// Where the form starts.
    pub position: Position,
}

/// An evaluation error with the forms it unwound through, innermost first.
#[derive(Debug)]
pub struct Failure {
    /// The error.
    pub error: ScriptError,
    /// Active forms, innermost first.
    pub frames: Vec<Frame>,
}

impl Failure {
    fn bare(error: ScriptError) -> Self {
        Self {
            error,
            frames: Vec::new(),
        }
    }

    /// Render the trace: one line per form, outermost first, then the error.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev() {
            out.push_str(&format!(
                "  at line {}, column {}: {}\n",
                frame.position.line, frame.position.column, frame.label
            ));
        }
        out.push_str(&format!("error: {}", self.error));
        out
    }
}

/// Evaluates a parsed program against a set of bindings.
pub struct Interpreter<'s> {
    source: &'s str,
    env: IndexMap<String, Value>,
    steps: u64,
    depth: usize,
    limits: Limits,
}

impl<'s> Interpreter<'s> {
    /// Create an interpreter for `source` with initial bindings.
    pub fn new(source: &'s str, limits: Limits, bindings: IndexMap<String, Value>) -> Self {
        Self {
            source,
            env: bindings,
            steps: 0,
            depth: 1,
            limits,
        }
    }

    /// Evaluate every definition in order and return the final environment.
    pub fn run(mut self, program: &Program) -> Result<IndexMap<String, Value>, Failure> {
        for definition in &program.definitions {
            let value = self.eval(&definition.value).map_err(|mut failure| {
                failure.frames.push(Frame {
                    label: format!("(def {} ...)", definition.name),
                    position: Position::locate(self.source, definition.span.start),
                });
                failure
            })?;
            let _ = self.env.insert(definition.name.clone(), value);
        }
        Ok(self.env)
    }

    /// Steps consumed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn step(&mut self) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            Err(ScriptError::StepLimit(self.limits.max_steps))
        } else {
            Ok(())
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, Failure> {
        self.step().map_err(Failure::bare)?;
        match expr {
            Expr::Literal { value, .. } => Ok(Value::Scalar(value.clone())),
            Expr::Ident { name, .. } => self.env.get(name).cloned().ok_or_else(|| {
                let available: Vec<&str> = self.env.keys().map(String::as_str).collect();
                Failure::bare(ScriptError::Undefined {
                    name: name.clone(),
                    available: available.join(", "),
                })
            }),
            Expr::List { items, .. } => self.nested(|this| {
                items
                    .iter()
                    .map(|item| this.eval(item))
                    .collect::<Result<_, _>>()
                    .map(Value::List)
            }),
            Expr::Call(call) => self.nested(|this| this.eval_call(call)).map_err(|mut failure| {
                failure.frames.push(Frame {
                    label: format!("({} ...)", call.op),
                    position: Position::locate(self.source, call.span.start),
                });
                failure
            }),
        }
    }

    /// Run `f` one nesting level deeper, failing past `max_depth`.
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Value, Failure>,
    ) -> Result<Value, Failure> {
        if self.depth >= self.limits.max_depth {
            return Err(Failure::bare(ScriptError::DepthLimit(self.limits.max_depth)));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn eval_call(&mut self, call: &Call) -> Result<Value, Failure> {
        let op = Op::from_name(&call.op)
            .ok_or_else(|| Failure::bare(ScriptError::UnknownOperation(call.op.clone())))?;

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.eval(arg)?);
        }
        let mut kwargs = IndexMap::with_capacity(call.kwargs.len());
        for (key, expr) in &call.kwargs {
            let value = self.eval(expr)?;
            if kwargs.insert(key.clone(), value).is_some() {
                return Err(Failure::bare(ScriptError::runtime(format!(
                    "keyword ':{key}' given twice"
                ))));
            }
        }

        let ctx = Ctx {
            max_rows: self.limits.max_rows,
        };
        ops::apply(op, Args::new(op, args), Kwargs::new(op, kwargs), &ctx).map_err(Failure::bare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use tabula_core::Cell;

    fn run(src: &str) -> Result<IndexMap<String, Value>, Failure> {
        let program = parse_program(src).unwrap();
        Interpreter::new(src, Limits::default(), IndexMap::new()).run(&program)
    }

    #[test]
    fn later_definitions_see_earlier_ones() {
        let env = run("(def a 2)\n(def b (* a 3 2))").unwrap();
        assert_eq!(env["b"], Value::Scalar(Cell::Int(12)));
    }

    #[test]
    fn redefinition_shadows() {
        let env = run("(def a 1)\n(def a (+ a 1))").unwrap();
        assert_eq!(env["a"], Value::Scalar(Cell::Int(2)));
    }

    #[test]
    fn undefined_name_lists_scope() {
        let failure = run("(def a 1)\n(def b (+ c 1))").unwrap_err();
        assert_eq!(
            failure.error.to_string(),
            "name 'c' is not defined. Defined names: a"
        );
        let trace = failure.render();
        assert_eq!(
            trace,
            "  at line 2, column 1: (def b ...)\n  at line 2, column 8: (+ ...)\nerror: name 'c' is not defined. Defined names: a"
        );
    }

    #[test]
    fn unknown_operation() {
        let failure = run("(def a (exec \"rm\"))").unwrap_err();
        assert_eq!(failure.error, ScriptError::UnknownOperation("exec".into()));
    }

    #[test]
    fn duplicate_keyword_is_rejected() {
        let failure = run("(def f (figure :title \"a\" :title \"b\"))").unwrap_err();
        assert!(failure.error.to_string().contains("given twice"));
    }

    #[test]
    fn step_budget_is_enforced() {
        let src = "(def a (+ 1 2 3 4 5 6 7 8 9 10))";
        let program = parse_program(src).unwrap();
        let limits = Limits {
            max_steps: 5,
            max_rows: 10,
            ..Limits::default()
        };
        let failure = Interpreter::new(src, limits, IndexMap::new())
            .run(&program)
            .unwrap_err();
        assert_eq!(failure.error, ScriptError::StepLimit(5));
    }

    #[test]
    fn nesting_depth_is_enforced() {
        let src = "(def a (+ 1 (+ 2 (+ 3 4))))";
        let program = parse_program(src).unwrap();
        let limits = Limits {
            max_depth: 3,
            ..Limits::default()
        };
        let failure = Interpreter::new(src, limits, IndexMap::new())
            .run(&program)
            .unwrap_err();
        assert_eq!(failure.error, ScriptError::DepthLimit(3));
        assert_eq!(failure.frames.len(), 4);

        let limits = Limits {
            max_depth: 4,
            ..Limits::default()
        };
        let env = Interpreter::new(src, limits, IndexMap::new()).run(&program).unwrap();
        assert_eq!(env["a"], Value::Scalar(Cell::Int(10)));
    }
}
