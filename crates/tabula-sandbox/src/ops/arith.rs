//! Element-wise primitives and column aggregates.
//!
//! Binary operations broadcast: scalar with scalar gives a scalar, anything
//! with a column gives a column, and two columns must have equal length.
//! Nulls propagate through arithmetic; division or remainder by zero is null.

use std::cmp::Ordering;

use tabula_core::Cell;

use super::Args;
use crate::errors::{ScriptError, ScriptResult};
use crate::value::Value;

enum Shape {
    Scalar(Cell),
    Column(Vec<Cell>),
}

fn shape(value: Value, op: &str) -> ScriptResult<Shape> {
    match value {
        Value::Scalar(cell) => Ok(Shape::Scalar(cell)),
        Value::Column(cells) => Ok(Shape::Column(cells)),
        list @ Value::List(_) => Ok(Shape::Column(list.into_cells(op)?)),
        other => Err(ScriptError::runtime(format!(
            "'{op}' cannot be applied to a {}",
            other.type_name()
        ))),
    }
}

pub(super) fn zip_with(
    op: &str,
    a: Value,
    b: Value,
    f: impl Fn(&Cell, &Cell) -> ScriptResult<Cell>,
) -> ScriptResult<Value> {
    match (shape(a, op)?, shape(b, op)?) {
        (Shape::Scalar(x), Shape::Scalar(y)) => Ok(Value::Scalar(f(&x, &y)?)),
        (Shape::Column(xs), Shape::Scalar(y)) => {
            xs.iter().map(|x| f(x, &y)).collect::<ScriptResult<_>>().map(Value::Column)
        }
        (Shape::Scalar(x), Shape::Column(ys)) => {
            ys.iter().map(|y| f(&x, y)).collect::<ScriptResult<_>>().map(Value::Column)
        }
        (Shape::Column(xs), Shape::Column(ys)) => {
            if xs.len() != ys.len() {
                return Err(ScriptError::runtime(format!(
                    "'{op}' needs columns of equal length, got {} and {}",
                    xs.len(),
                    ys.len()
                )));
            }
            xs.iter()
                .zip(&ys)
                .map(|(x, y)| f(x, y))
                .collect::<ScriptResult<_>>()
                .map(Value::Column)
        }
    }
}

pub(super) fn map_cells(
    op: &str,
    value: Value,
    f: impl Fn(&Cell) -> ScriptResult<Cell>,
) -> ScriptResult<Value> {
    match shape(value, op)? {
        Shape::Scalar(x) => Ok(Value::Scalar(f(&x)?)),
        Shape::Column(xs) => xs.iter().map(f).collect::<ScriptResult<_>>().map(Value::Column),
    }
}

fn type_error(op: &str, a: &Cell, b: &Cell) -> ScriptError {
    ScriptError::runtime(format!(
        "'{op}' cannot combine {} and {}",
        a.type_name(),
        b.type_name()
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Arithmetic
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }

    /// Parse the operator names accepted by `map-numeric`.
    pub(crate) fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            "%" => Some(Self::Rem),
            _ => None,
        }
    }
}

/// Remainder with the sign of the divisor.
fn floor_rem_int(x: i64, y: i64) -> Option<i64> {
    let r = x.checked_rem(y)?;
    Some(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn arith_cell(op: Arith, a: &Cell, b: &Cell) -> ScriptResult<Cell> {
    match (a, b) {
        (Cell::Null, _) | (_, Cell::Null) => Ok(Cell::Null),
        (Cell::Int(x), Cell::Int(y)) => {
            let (x, y) = (*x, *y);
            let widened = || (x as f64, y as f64);
            Ok(match op {
                Arith::Add => x.checked_add(y).map_or_else(
                    || {
                        let (fx, fy) = widened();
                        Cell::float(fx + fy)
                    },
                    Cell::Int,
                ),
                Arith::Sub => x.checked_sub(y).map_or_else(
                    || {
                        let (fx, fy) = widened();
                        Cell::float(fx - fy)
                    },
                    Cell::Int,
                ),
                Arith::Mul => x.checked_mul(y).map_or_else(
                    || {
                        let (fx, fy) = widened();
                        Cell::float(fx * fy)
                    },
                    Cell::Int,
                ),
                Arith::Div if y == 0 => Cell::Null,
                Arith::Div => {
                    let (fx, fy) = widened();
                    Cell::float(fx / fy)
                }
                Arith::Rem if y == 0 => Cell::Null,
                Arith::Rem => floor_rem_int(x, y).map_or(Cell::Null, Cell::Int),
            })
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(match op {
                Arith::Add => Cell::float(x + y),
                Arith::Sub => Cell::float(x - y),
                Arith::Mul => Cell::float(x * y),
                Arith::Div | Arith::Rem if y == 0.0 => Cell::Null,
                Arith::Div => Cell::float(x / y),
                Arith::Rem => Cell::float(x - y * (x / y).floor()),
            }),
            _ => Err(type_error(op.symbol(), a, b)),
        },
    }
}

/// `(+ a b c ...)` and `(* a b c ...)`: left fold over two or more operands.
pub(super) fn fold_arith(args: &mut Args, op: Arith) -> ScriptResult<Value> {
    let first = args.next("an operand")?;
    let second = args.next("an operand")?;
    let mut acc = zip_with(op.symbol(), first, second, |a, b| arith_cell(op, a, b))?;
    for next in args.rest() {
        acc = zip_with(op.symbol(), acc, next, |a, b| arith_cell(op, a, b))?;
    }
    Ok(acc)
}

pub(super) fn binary_arith(args: &mut Args, op: Arith) -> ScriptResult<Value> {
    let a = args.next("an operand")?;
    let b = args.next("an operand")?;
    zip_with(op.symbol(), a, b, |x, y| arith_cell(op, x, y))
}

pub(super) fn unary(
    args: &mut Args,
    op: &str,
    f: impl Fn(&Cell) -> ScriptResult<Cell>,
) -> ScriptResult<Value> {
    let value = args.next("a value")?;
    map_cells(op, value, f)
}

pub(super) fn abs(cell: &Cell) -> ScriptResult<Cell> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Int(i) => Ok(i.checked_abs().map_or(Cell::Null, Cell::Int)),
        Cell::Float(f) => Ok(Cell::Float(f.abs())),
        other => Err(ScriptError::runtime(format!(
            "'abs' needs a number, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn neg(cell: &Cell) -> ScriptResult<Cell> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Int(i) => Ok(i.checked_neg().map_or(Cell::Null, Cell::Int)),
        Cell::Float(f) => Ok(Cell::Float(-f)),
        other => Err(ScriptError::runtime(format!(
            "'neg' needs a number, got {}",
            other.type_name()
        ))),
    }
}

/// `(round x)` or `(round x digits)`. Integers are left unchanged.
pub(super) fn round(args: &mut Args) -> ScriptResult<Value> {
    let value = args.next("a value")?;
    let digits = match args.next_opt() {
        Some(d) => d.into_int("'round' digits")?,
        None => 0,
    };
    let digits = i32::try_from(digits.clamp(-15, 15)).unwrap_or_default();
    let scale = 10f64.powi(digits);
    map_cells("round", value, |cell| match cell {
        Cell::Null | Cell::Int(_) => Ok(cell.clone()),
        Cell::Float(f) => Ok(Cell::float((f * scale).round() / scale)),
        other => Err(ScriptError::runtime(format!(
            "'round' needs a number, got {}",
            other.type_name()
        ))),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Comparison and logic
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

fn compare_cell(op: Cmp, a: &Cell, b: &Cell) -> ScriptResult<Cell> {
    // Anything compared with null is false, except "not equal"
    if a.is_null() || b.is_null() {
        return Ok(Cell::Bool(op == Cmp::Ne));
    }
    let ordering = match op {
        Cmp::Eq => return Ok(Cell::Bool(a.key() == b.key())),
        Cmp::Ne => return Ok(Cell::Bool(a.key() != b.key())),
        _ => match (a, b) {
            (Cell::Int(x), Cell::Int(y)) => x.cmp(y),
            (Cell::Text(x), Cell::Text(y)) => x.cmp(y),
            (Cell::Bool(x), Cell::Bool(y)) => x.cmp(y),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => return Err(type_error(op.symbol(), a, b)),
            },
        },
    };
    Ok(Cell::Bool(match op {
        Cmp::Lt => ordering.is_lt(),
        Cmp::Le => ordering.is_le(),
        Cmp::Gt => ordering.is_gt(),
        Cmp::Ge | Cmp::Eq | Cmp::Ne => ordering.is_ge(),
    }))
}

pub(super) fn compare(args: &mut Args, op: Cmp) -> ScriptResult<Value> {
    let a = args.next("an operand")?;
    let b = args.next("an operand")?;
    zip_with(op.symbol(), a, b, |x, y| compare_cell(op, x, y))
}

/// Boolean view of a cell where null counts as false.
pub(super) fn truthy(cell: &Cell, op: &str) -> ScriptResult<bool> {
    match cell {
        Cell::Bool(b) => Ok(*b),
        Cell::Null => Ok(false),
        other => Err(ScriptError::runtime(format!(
            "'{op}' needs booleans, got {}",
            other.type_name()
        ))),
    }
}

/// `(and a b ...)` / `(or a b ...)`
pub(super) fn logic(args: &mut Args, all: bool) -> ScriptResult<Value> {
    let op = if all { "and" } else { "or" };
    let mut acc = args.next("an operand")?;
    let mut operands = args.rest();
    if operands.is_empty() {
        operands.push(args.next("a second operand")?);
    }
    for next in operands {
        acc = zip_with(op, acc, next, |a, b| {
            let (x, y) = (truthy(a, op)?, truthy(b, op)?);
            Ok(Cell::Bool(if all { x && y } else { x || y }))
        })?;
    }
    Ok(acc)
}

pub(super) fn not(cell: &Cell) -> ScriptResult<Cell> {
    Ok(Cell::Bool(!truthy(cell, "not")?))
}

pub(super) fn fill_null(args: &mut Args) -> ScriptResult<Value> {
    let value = args.next("a value")?;
    let replacement = match args.next("a replacement scalar")? {
        Value::Scalar(cell) => cell,
        other => {
            return Err(ScriptError::runtime(format!(
                "'fill-null' replacement must be a scalar, got {}",
                other.type_name()
            )));
        }
    };
    map_cells("fill-null", value, |cell| {
        Ok(if cell.is_null() {
            replacement.clone()
        } else {
            cell.clone()
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Text and casts
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn text_map(cell: &Cell, op: &str, f: fn(&str) -> String) -> ScriptResult<Cell> {
    match cell {
        Cell::Null => Ok(Cell::Null),
        Cell::Text(s) => Ok(Cell::Text(f(s))),
        other => Err(ScriptError::runtime(format!(
            "'{op}' needs text, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn contains(args: &mut Args) -> ScriptResult<Value> {
    let value = args.next("a value")?;
    let needle = args.next("a pattern")?.into_text("'contains' pattern")?;
    map_cells("contains", value, |cell| match cell {
        Cell::Null => Ok(Cell::Bool(false)),
        Cell::Text(s) => Ok(Cell::Bool(s.contains(needle.as_str()))),
        other => Err(ScriptError::runtime(format!(
            "'contains' needs text, got {}",
            other.type_name()
        ))),
    })
}

pub(super) fn concat_str(args: &mut Args) -> ScriptResult<Value> {
    let mut acc = args.next("a value")?;
    for next in args.rest() {
        acc = zip_with("concat-str", acc, next, |a, b| {
            Ok(if a.is_null() || b.is_null() {
                Cell::Null
            } else {
                Cell::Text(format!("{a}{b}"))
            })
        })?;
    }
    // Single argument: render as text
    map_cells("concat-str", acc, |c| Ok(as_text(c)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(f: f64) -> Option<i64> {
    let t = f.trunc();
    (t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

pub(super) fn as_int(cell: &Cell) -> ScriptResult<Cell> {
    let fail = || ScriptError::runtime(format!("cannot convert '{cell}' to integer"));
    match cell {
        Cell::Null | Cell::Int(_) => Ok(cell.clone()),
        Cell::Bool(b) => Ok(Cell::Int(i64::from(*b))),
        Cell::Float(f) => float_to_int(*f).map(Cell::Int).ok_or_else(fail),
        Cell::Text(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(Cell::Int(i))
            } else {
                s.parse::<f64>()
                    .ok()
                    .and_then(float_to_int)
                    .map(Cell::Int)
                    .ok_or_else(fail)
            }
        }
    }
}

pub(super) fn as_float(cell: &Cell) -> ScriptResult<Cell> {
    match cell {
        Cell::Null | Cell::Float(_) => Ok(cell.clone()),
        Cell::Bool(b) => Ok(Cell::Float(if *b { 1.0 } else { 0.0 })),
        Cell::Int(_) => Ok(cell.as_f64().map_or(Cell::Null, Cell::float)),
        Cell::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Cell::float)
            .map_err(|_| ScriptError::runtime(format!("cannot convert '{s}' to float"))),
    }
}

pub(super) fn as_text(cell: &Cell) -> Cell {
    match cell {
        Cell::Null => Cell::Null,
        Cell::Text(_) => cell.clone(),
        other => Cell::Text(other.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregates
// ─────────────────────────────────────────────────────────────────────────────

/// Column reductions. Nulls are skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Agg {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    First,
}

impl Agg {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "mean" => Some(Self::Mean),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "first" => Some(Self::First),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::First => "first",
        }
    }

    /// Whether the reduction only makes sense for numbers.
    pub(crate) fn numeric_only(self) -> bool {
        matches!(self, Self::Sum | Self::Mean)
    }
}

fn numeric_values<'a>(cells: impl Iterator<Item = &'a Cell>, agg: Agg) -> ScriptResult<Vec<&'a Cell>> {
    cells
        .filter(|c| !c.is_null())
        .map(|c| match c {
            Cell::Int(_) | Cell::Float(_) => Ok(c),
            other => Err(ScriptError::runtime(format!(
                "'{}' needs numbers, got {}",
                agg.name(),
                other.type_name()
            ))),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn reduce<'a>(mut cells: impl Iterator<Item = &'a Cell>, agg: Agg) -> ScriptResult<Cell> {
    match agg {
        Agg::Sum => {
            let values = numeric_values(cells, agg)?;
            let mut int_sum: Option<i64> = Some(0);
            let mut float_sum = 0.0;
            for cell in &values {
                match cell {
                    Cell::Int(i) => int_sum = int_sum.and_then(|s| s.checked_add(*i)),
                    _ => int_sum = None,
                }
                float_sum += cell.as_f64().unwrap_or_default();
            }
            Ok(int_sum.map_or_else(|| Cell::float(float_sum), Cell::Int))
        }
        Agg::Mean => {
            let values = numeric_values(cells, agg)?;
            if values.is_empty() {
                return Ok(Cell::Null);
            }
            let total: f64 = values.iter().filter_map(|c| c.as_f64()).sum();
            Ok(Cell::float(total / values.len() as f64))
        }
        Agg::Min => Ok(cells
            .filter(|c| !c.is_null())
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Cell::Null)),
        Agg::Max => Ok(cells
            .filter(|c| !c.is_null())
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Cell::Null)),
        Agg::Count => Ok(Cell::Int(
            i64::try_from(cells.filter(|c| !c.is_null()).count()).unwrap_or(i64::MAX),
        )),
        Agg::First => Ok(cells.find(|c| !c.is_null()).cloned().unwrap_or(Cell::Null)),
    }
}

pub(super) fn aggregate(args: &mut Args, agg: Agg) -> ScriptResult<Value> {
    let cells = args.next("a column")?.into_cells(agg.name())?;
    reduce(cells.iter(), agg).map(Value::Scalar)
}
