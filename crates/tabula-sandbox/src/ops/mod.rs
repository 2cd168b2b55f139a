//! The closed set of primitives a script may call.
//!
//! Scripts cannot define functions, so this table is the whole surface the
//! generated code can reach. Each primitive receives already-evaluated
//! positional and keyword arguments.

mod arith;
mod figure_ops;
mod table_ops;

use std::vec;

use indexmap::IndexMap;

use crate::errors::{ScriptError, ScriptResult};
use crate::value::Value;

/// Every primitive, by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Op {
    // Access and construction
    Col,
    Get,
    Columns,
    Nrows,
    Table,
    Dict,
    // Element-wise
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Abs,
    Round,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    IsNull,
    FillNull,
    Upper,
    Lower,
    Contains,
    ConcatStr,
    AsInt,
    AsFloat,
    AsText,
    // Aggregates
    Sum,
    Mean,
    Min,
    Max,
    Count,
    // Table verbs
    Select,
    Drop,
    Rename,
    WithColumn,
    Filter,
    Sort,
    Head,
    Tail,
    DropNulls,
    Distinct,
    Join,
    ConcatRows,
    GroupBy,
    MapNumeric,
    // Figure verbs
    Figure,
    Scatter,
    Line,
    Bar,
    Histogram,
    Box,
    Pie,
    UpdateLayout,
}

const NAMES: &[(&str, Op)] = &[
    ("col", Op::Col),
    ("get", Op::Get),
    ("columns", Op::Columns),
    ("nrows", Op::Nrows),
    ("table", Op::Table),
    ("dict", Op::Dict),
    ("+", Op::Add),
    ("-", Op::Sub),
    ("*", Op::Mul),
    ("/", Op::Div),
    ("%", Op::Rem),
    ("abs", Op::Abs),
    ("round", Op::Round),
    ("neg", Op::Neg),
    ("=", Op::Eq),
    ("!=", Op::Ne),
    ("<", Op::Lt),
    ("<=", Op::Le),
    (">", Op::Gt),
    (">=", Op::Ge),
    ("and", Op::And),
    ("or", Op::Or),
    ("not", Op::Not),
    ("is-null", Op::IsNull),
    ("fill-null", Op::FillNull),
    ("upper", Op::Upper),
    ("lower", Op::Lower),
    ("contains", Op::Contains),
    ("concat-str", Op::ConcatStr),
    ("as-int", Op::AsInt),
    ("as-float", Op::AsFloat),
    ("as-text", Op::AsText),
    ("sum", Op::Sum),
    ("mean", Op::Mean),
    ("min", Op::Min),
    ("max", Op::Max),
    ("count", Op::Count),
    ("select", Op::Select),
    ("drop", Op::Drop),
    ("rename", Op::Rename),
    ("with-column", Op::WithColumn),
    ("filter", Op::Filter),
    ("sort", Op::Sort),
    ("head", Op::Head),
    ("tail", Op::Tail),
    ("drop-nulls", Op::DropNulls),
    ("distinct", Op::Distinct),
    ("join", Op::Join),
    ("concat-rows", Op::ConcatRows),
    ("group-by", Op::GroupBy),
    ("map-numeric", Op::MapNumeric),
    ("figure", Op::Figure),
    ("scatter", Op::Scatter),
    ("line", Op::Line),
    ("bar", Op::Bar),
    ("histogram", Op::Histogram),
    ("box", Op::Box),
    ("pie", Op::Pie),
    ("update-layout", Op::UpdateLayout),
];

impl Op {
    /// Look up a primitive by its script name.
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, op)| *op)
    }

    /// Script name of the primitive.
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, op)| *op == self)
            .map_or("?", |(n, _)| n)
    }

    /// All script names, in reference order.
    pub fn names() -> impl Iterator<Item = &'static str> {
        NAMES.iter().map(|(n, _)| *n)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument access
// ─────────────────────────────────────────────────────────────────────────────

/// Positional arguments of one call, consumed front to back.
pub struct Args {
    op: &'static str,
    values: vec::IntoIter<Value>,
    taken: usize,
}

impl Args {
    /// Wrap evaluated arguments for `op`.
    pub fn new(op: Op, values: Vec<Value>) -> Self {
        Self {
            op: op.name(),
            values: values.into_iter(),
            taken: 0,
        }
    }

    /// Next argument, which must be present.
    pub fn next(&mut self, what: &str) -> ScriptResult<Value> {
        self.taken += 1;
        self.values.next().ok_or_else(|| {
            ScriptError::runtime(format!(
                "'{}' expects {what} as argument {}",
                self.op, self.taken
            ))
        })
    }

    /// Next argument, if any.
    pub fn next_opt(&mut self) -> Option<Value> {
        let value = self.values.next();
        if value.is_some() {
            self.taken += 1;
        }
        value
    }

    /// All remaining arguments.
    pub fn rest(&mut self) -> Vec<Value> {
        let rest: Vec<Value> = self.values.by_ref().collect();
        self.taken += rest.len();
        rest
    }

    /// Fail if arguments are left over.
    pub fn finish(mut self) -> ScriptResult<()> {
        let extra = self.values.by_ref().count();
        if extra == 0 {
            Ok(())
        } else {
            Err(ScriptError::runtime(format!(
                "'{}' takes {} positional arguments, got {}",
                self.op,
                self.taken,
                self.taken + extra
            )))
        }
    }
}

/// Keyword arguments of one call.
pub struct Kwargs {
    op: &'static str,
    values: IndexMap<String, Value>,
}

impl Kwargs {
    /// Wrap evaluated keyword arguments for `op`.
    pub fn new(op: Op, values: IndexMap<String, Value>) -> Self {
        Self {
            op: op.name(),
            values,
        }
    }

    /// Remove and return one keyword.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Remove every keyword, in source order.
    pub fn drain(&mut self) -> Vec<(String, Value)> {
        self.values.drain(..).collect()
    }

    /// Fail if unrecognised keywords are left over.
    pub fn finish(self) -> ScriptResult<()> {
        match self.values.keys().next() {
            None => Ok(()),
            Some(key) => Err(ScriptError::runtime(format!(
                "'{}' does not accept the keyword ':{key}'",
                self.op
            ))),
        }
    }
}

/// Resource limits visible to primitives.
#[derive(Clone, Copy, Debug)]
pub struct Ctx {
    /// Largest row count any produced table may have.
    pub max_rows: usize,
}

impl Ctx {
    /// Fail once `rows` exceeds the limit.
    pub fn check_rows(&self, rows: usize) -> ScriptResult<()> {
        if rows > self.max_rows {
            Err(ScriptError::RowLimit {
                rows,
                limit: self.max_rows,
            })
        } else {
            Ok(())
        }
    }
}

/// Run one primitive.
pub fn apply(op: Op, mut args: Args, mut kwargs: Kwargs, ctx: &Ctx) -> ScriptResult<Value> {
    let value = match op {
        Op::Col => table_ops::col(&mut args)?,
        Op::Get => table_ops::get(&mut args)?,
        Op::Columns => table_ops::columns(&mut args)?,
        Op::Nrows => table_ops::nrows(&mut args)?,
        Op::Table => table_ops::table(&mut args, &mut kwargs, ctx)?,
        Op::Dict => table_ops::dict(&mut args, &mut kwargs)?,

        Op::Add => arith::fold_arith(&mut args, arith::Arith::Add)?,
        Op::Sub => arith::binary_arith(&mut args, arith::Arith::Sub)?,
        Op::Mul => arith::fold_arith(&mut args, arith::Arith::Mul)?,
        Op::Div => arith::binary_arith(&mut args, arith::Arith::Div)?,
        Op::Rem => arith::binary_arith(&mut args, arith::Arith::Rem)?,
        Op::Abs => arith::unary(&mut args, "abs", arith::abs)?,
        Op::Neg => arith::unary(&mut args, "neg", arith::neg)?,
        Op::Round => arith::round(&mut args)?,
        Op::Eq => arith::compare(&mut args, arith::Cmp::Eq)?,
        Op::Ne => arith::compare(&mut args, arith::Cmp::Ne)?,
        Op::Lt => arith::compare(&mut args, arith::Cmp::Lt)?,
        Op::Le => arith::compare(&mut args, arith::Cmp::Le)?,
        Op::Gt => arith::compare(&mut args, arith::Cmp::Gt)?,
        Op::Ge => arith::compare(&mut args, arith::Cmp::Ge)?,
        Op::And => arith::logic(&mut args, true)?,
        Op::Or => arith::logic(&mut args, false)?,
        Op::Not => arith::unary(&mut args, "not", arith::not)?,
        Op::IsNull => arith::unary(&mut args, "is-null", |c| Ok(c.is_null().into()))?,
        Op::FillNull => arith::fill_null(&mut args)?,
        Op::Upper => arith::unary(&mut args, "upper", |c| arith::text_map(c, "upper", str::to_uppercase))?,
        Op::Lower => arith::unary(&mut args, "lower", |c| arith::text_map(c, "lower", str::to_lowercase))?,
        Op::Contains => arith::contains(&mut args)?,
        Op::ConcatStr => arith::concat_str(&mut args)?,
        Op::AsInt => arith::unary(&mut args, "as-int", arith::as_int)?,
        Op::AsFloat => arith::unary(&mut args, "as-float", arith::as_float)?,
        Op::AsText => arith::unary(&mut args, "as-text", |c| Ok(arith::as_text(c)))?,

        Op::Sum => arith::aggregate(&mut args, arith::Agg::Sum)?,
        Op::Mean => arith::aggregate(&mut args, arith::Agg::Mean)?,
        Op::Min => arith::aggregate(&mut args, arith::Agg::Min)?,
        Op::Max => arith::aggregate(&mut args, arith::Agg::Max)?,
        Op::Count => arith::aggregate(&mut args, arith::Agg::Count)?,

        Op::Select => table_ops::select(&mut args)?,
        Op::Drop => table_ops::drop(&mut args)?,
        Op::Rename => table_ops::rename(&mut args)?,
        Op::WithColumn => table_ops::with_column(&mut args)?,
        Op::Filter => table_ops::filter(&mut args)?,
        Op::Sort => table_ops::sort(&mut args, &mut kwargs)?,
        Op::Head => table_ops::head_tail(&mut args, true)?,
        Op::Tail => table_ops::head_tail(&mut args, false)?,
        Op::DropNulls => table_ops::drop_nulls(&mut args, &mut kwargs)?,
        Op::Distinct => table_ops::distinct(&mut args, &mut kwargs)?,
        Op::Join => table_ops::join(&mut args, &mut kwargs, ctx)?,
        Op::ConcatRows => table_ops::concat_rows(&mut args, ctx)?,
        Op::GroupBy => table_ops::group_by(&mut args, &mut kwargs)?,
        Op::MapNumeric => table_ops::map_numeric(&mut args)?,

        Op::Figure => figure_ops::figure(&mut kwargs)?,
        Op::Scatter => figure_ops::xy_trace(&mut args, &mut kwargs, figure_ops::XyKind::Scatter)?,
        Op::Line => figure_ops::xy_trace(&mut args, &mut kwargs, figure_ops::XyKind::Line)?,
        Op::Bar => figure_ops::xy_trace(&mut args, &mut kwargs, figure_ops::XyKind::Bar)?,
        Op::Histogram => figure_ops::histogram(&mut args, &mut kwargs)?,
        Op::Box => figure_ops::box_trace(&mut args, &mut kwargs)?,
        Op::Pie => figure_ops::pie(&mut args, &mut kwargs)?,
        Op::UpdateLayout => figure_ops::update_layout(&mut args, &mut kwargs)?,
    };
    args.finish()?;
    kwargs.finish()?;
    if let Value::Table(table) = &value {
        ctx.check_rows(table.nrows())?;
    }
    Ok(value)
}
