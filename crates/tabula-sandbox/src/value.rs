//! Runtime values.

use std::sync::Arc;

use indexmap::IndexMap;
use tabula_core::{Cell, Figure, Table};

use crate::errors::{ScriptError, ScriptResult};

/// A value produced by evaluating an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A single cell.
    Scalar(Cell),
    /// `[...]` literal or list-returning primitive.
    List(Vec<Value>),
    /// An unnamed column of cells.
    Column(Vec<Cell>),
    /// A table snapshot.
    Table(Arc<Table>),
    /// Name-to-value mapping in insertion order.
    Dict(IndexMap<String, Value>),
    /// A figure under construction.
    Figure(Arc<Figure>),
}

impl Value {
    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(cell) => cell.type_name(),
            Self::List(_) => "list",
            Self::Column(_) => "column",
            Self::Table(_) => "table",
            Self::Dict(_) => "dictionary",
            Self::Figure(_) => "figure",
        }
    }

    /// The value as a table.
    pub fn into_table(self, what: &str) -> ScriptResult<Arc<Table>> {
        match self {
            Self::Table(t) => Ok(t),
            other => Err(ScriptError::runtime(format!(
                "{what} must be a table, got {}",
                other.type_name()
            ))),
        }
    }

    /// The value as a figure.
    pub fn into_figure(self, what: &str) -> ScriptResult<Arc<Figure>> {
        match self {
            Self::Figure(f) => Ok(f),
            other => Err(ScriptError::runtime(format!(
                "{what} must be a figure, got {}",
                other.type_name()
            ))),
        }
    }

    /// The value as a text scalar.
    pub fn into_text(self, what: &str) -> ScriptResult<String> {
        match self {
            Self::Scalar(Cell::Text(s)) => Ok(s),
            other => Err(ScriptError::runtime(format!(
                "{what} must be a string, got {}",
                other.type_name()
            ))),
        }
    }

    /// The value as an integer scalar.
    pub fn into_int(self, what: &str) -> ScriptResult<i64> {
        match self {
            Self::Scalar(Cell::Int(i)) => Ok(i),
            other => Err(ScriptError::runtime(format!(
                "{what} must be an integer, got {}",
                other.type_name()
            ))),
        }
    }

    /// The value as a boolean scalar.
    pub fn into_bool(self, what: &str) -> ScriptResult<bool> {
        match self {
            Self::Scalar(Cell::Bool(b)) => Ok(b),
            other => Err(ScriptError::runtime(format!(
                "{what} must be true or false, got {}",
                other.type_name()
            ))),
        }
    }

    /// One or more names: a string or a list of strings.
    pub fn into_names(self, what: &str) -> ScriptResult<Vec<String>> {
        match self {
            Self::Scalar(Cell::Text(s)) => Ok(vec![s]),
            Self::List(items) => items.into_iter().map(|v| v.into_text(what)).collect(),
            other => Err(ScriptError::runtime(format!(
                "{what} must be a string or a list of strings, got {}",
                other.type_name()
            ))),
        }
    }

    /// The value as a sequence of cells: a column or a list of scalars.
    pub fn into_cells(self, what: &str) -> ScriptResult<Vec<Cell>> {
        match self {
            Self::Column(cells) => Ok(cells),
            Self::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Scalar(cell) => Ok(cell),
                    other => Err(ScriptError::runtime(format!(
                        "{what} must contain only scalars, got {}",
                        other.type_name()
                    ))),
                })
                .collect(),
            other => Err(ScriptError::runtime(format!(
                "{what} must be a column or a list, got {}",
                other.type_name()
            ))),
        }
    }
}

impl From<Cell> for Value {
    fn from(cell: Cell) -> Self {
        Self::Scalar(cell)
    }
}
