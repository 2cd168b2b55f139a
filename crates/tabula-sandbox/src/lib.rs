//! # tabula-sandbox
//!
//! Executes LLM-generated table scripts without giving them access to the
//! host. Scripts are written in a small s-expression language:
//!
//! - [`parser`]: nom grammar producing an [`ast::Program`]
//! - [`eval`]: pure evaluator with step and row budgets
//! - [`ops`]: the closed set of primitives (column math, table verbs, figures)
//! - [`reference`]: the language reference shown to the LLM
//!
//! [`Sandbox::execute`] binds the input tables, runs the script and checks
//! that the required output variable exists and has the right type.

#![deny(unsafe_code)]

pub mod ast;
pub mod errors;
pub mod eval;
pub mod ops;
pub mod parser;
pub mod reference;
pub mod value;

use std::sync::Arc;

use indexmap::IndexMap;
use tabula_core::{Figure, Table, TableSet};
use tracing::debug;

pub use errors::{CodeExecutionError, ParseError, SandboxError, ScriptError};
pub use eval::Limits;
pub use reference::LANGUAGE_REFERENCE;
pub use value::Value;

/// Name the single input table is bound to.
pub const TABLE_BINDING: &str = "df";
/// Name the input dictionary of tables is bound to.
pub const TABLES_BINDING: &str = "tables";
/// Output variable for single-table transforms.
pub const TRANSFORMED_TABLE: &str = "transformed_df";
/// Output variable for multi-table transforms.
pub const RESULT_TABLES: &str = "result_tables";
/// Output variable for plots.
pub const FIGURE: &str = "fig";

/// Inputs visible to a script.
#[derive(Clone, Debug)]
pub enum Bindings {
    /// One table, bound as `df`.
    Table(Arc<Table>),
    /// Named tables, bound as the dictionary `tables`.
    Tables(TableSet),
}

/// Which output variable a script must define.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expected {
    /// `transformed_df`, a table.
    Table,
    /// `result_tables`, a dictionary of tables.
    Tables,
    /// `fig`, a figure.
    Figure,
}

/// Validated script output.
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    /// From `transformed_df`.
    Table(Arc<Table>),
    /// From `result_tables`.
    Tables(TableSet),
    /// From `fig`.
    Figure(Arc<Figure>),
}

/// Script runner with fixed limits.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sandbox {
    limits: Limits,
}

impl Sandbox {
    /// Create a sandbox.
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Configured limits.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Run `code` against `bindings` and extract the `expected` output.
    pub fn execute(
        &self,
        code: &str,
        bindings: Bindings,
        expected: Expected,
    ) -> Result<Output, SandboxError> {
        let program =
            parser::parse_program_with_depth(code, self.limits.max_depth).map_err(|e| {
                let position = e.position;
                execution_error(
                    &ScriptError::Syntax(e),
                    format!("  at line {}, column {}", position.line, position.column),
                )
            })?;

        let mut env = IndexMap::new();
        match bindings {
            Bindings::Table(table) => {
                let _ = env.insert(TABLE_BINDING.to_owned(), Value::Table(table));
            }
            Bindings::Tables(tables) => {
                let dict = tables
                    .into_iter()
                    .map(|(name, table)| (name, Value::Table(table)))
                    .collect();
                let _ = env.insert(TABLES_BINDING.to_owned(), Value::Dict(dict));
            }
        }

        let mut env = eval::Interpreter::new(code, self.limits, env)
            .run(&program)
            .map_err(|failure| execution_error(&failure.error, failure.render()))?;

        debug!(
            definitions = program.definitions.len(),
            ?expected,
            "script evaluated"
        );
        extract(&mut env, expected)
    }

    /// Run a single-table transform and return `transformed_df`.
    pub fn transform_table(&self, code: &str, table: Arc<Table>) -> Result<Arc<Table>, SandboxError> {
        match self.execute(code, Bindings::Table(table), Expected::Table)? {
            Output::Table(t) => Ok(t),
            other => Err(unexpected(&other)),
        }
    }

    /// Run a multi-table transform and return `result_tables`.
    pub fn transform_tables(&self, code: &str, tables: TableSet) -> Result<TableSet, SandboxError> {
        match self.execute(code, Bindings::Tables(tables), Expected::Tables)? {
            Output::Tables(t) => Ok(t),
            other => Err(unexpected(&other)),
        }
    }

    /// Run a plot script and return `fig`.
    pub fn plot(&self, code: &str, table: Arc<Table>) -> Result<Arc<Figure>, SandboxError> {
        match self.execute(code, Bindings::Table(table), Expected::Figure)? {
            Output::Figure(f) => Ok(f),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(output: &Output) -> SandboxError {
    SandboxError::output(format!("unexpected script output: {output:?}"))
}

fn execution_error(error: &ScriptError, trace: String) -> SandboxError {
    let message = format!("Error executing generated code: {error}");
    debug!(%message, "script failed");
    SandboxError::Execution(CodeExecutionError {
        message,
        stack_trace: trace,
    })
}

fn extract(env: &mut IndexMap<String, Value>, expected: Expected) -> Result<Output, SandboxError> {
    match expected {
        Expected::Table => match env.shift_remove(TRANSFORMED_TABLE) {
            None => Err(SandboxError::output(
                "The executed code did not define a variable named 'transformed_df'. \
                 Make sure to assign the transformed table to a variable named 'transformed_df'.",
            )),
            Some(Value::Table(table)) => Ok(Output::Table(table)),
            Some(other) => Err(SandboxError::output(format!(
                "The 'transformed_df' variable is not a table (got {}). \
                 Make sure to assign a table to a variable named 'transformed_df'.",
                other.type_name()
            ))),
        },
        Expected::Tables => match env.shift_remove(RESULT_TABLES) {
            None => Err(SandboxError::output(
                "The executed code did not define a variable named 'result_tables'. \
                 Make sure to assign the transformed tables to a dictionary named 'result_tables' \
                 where keys are table names and values are tables.",
            )),
            Some(Value::Dict(entries)) => {
                let mut tables = TableSet::new();
                for (key, value) in entries {
                    match value {
                        Value::Table(table) => {
                            let _ = tables.insert(key, table);
                        }
                        _ => {
                            return Err(SandboxError::output(format!(
                                "The value for key '{key}' in 'result_tables' is not a table. \
                                 Make sure all values in the 'result_tables' dictionary are tables."
                            )));
                        }
                    }
                }
                Ok(Output::Tables(tables))
            }
            Some(other) => Err(SandboxError::output(format!(
                "The 'result_tables' variable is not a dictionary (got {}). \
                 Make sure to assign a dictionary to a variable named 'result_tables'.",
                other.type_name()
            ))),
        },
        Expected::Figure => match env.shift_remove(FIGURE) {
            None => Err(SandboxError::output(
                "The executed code did not define a variable named 'fig'. \
                 Make sure to assign the figure to a variable named 'fig'.",
            )),
            Some(Value::Figure(figure)) => Ok(Output::Figure(figure)),
            Some(other) => Err(SandboxError::output(format!(
                "The 'fig' variable is not a figure (got {}). \
                 Make sure to assign a figure to a variable named 'fig'.",
                other.type_name()
            ))),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
