//! Column access, table construction and table verbs.
//!
//! Every verb returns a new table; inputs are shared snapshots and are never
//! modified.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use tabula_core::table::CellKey;
use tabula_core::{Cell, Column, Table};

use super::arith::{self, Agg, Arith};
use super::{Args, Ctx, Kwargs};
use crate::errors::{ScriptError, ScriptResult};
use crate::value::Value;

fn build(columns: Vec<Column>) -> ScriptResult<Value> {
    Table::new(columns)
        .map(|t| Value::Table(Arc::new(t)))
        .map_err(|e| ScriptError::runtime(e.to_string()))
}

fn missing_column(table: &Table, name: &str) -> ScriptError {
    ScriptError::runtime(format!(
        "Column '{name}' not found. Available columns: {}",
        table.column_names().join(", ")
    ))
}

fn column<'t>(table: &'t Table, name: &str) -> ScriptResult<&'t Column> {
    table.column(name).ok_or_else(|| missing_column(table, name))
}

/// Collect names from the remaining arguments; each may be a string or a list.
fn rest_names(args: &mut Args, what: &str) -> ScriptResult<Vec<String>> {
    let mut names = Vec::new();
    for value in args.rest() {
        names.extend(value.into_names(what)?);
    }
    Ok(names)
}

fn take_rows(table: &Table, rows: &[usize]) -> ScriptResult<Value> {
    let columns = table
        .columns()
        .iter()
        .map(|c| Column::new(c.name.clone(), rows.iter().map(|&r| c.values[r].clone()).collect()))
        .collect();
    build(columns)
}

fn row_key(columns: &[&Column], row: usize) -> Vec<CellKey> {
    columns.iter().map(|c| c.values[row].key()).collect()
}

/// Row indices by key, skipping rows with a null key.
fn key_index(keys: &[&Column], rows: usize) -> HashMap<Vec<CellKey>, Vec<usize>> {
    let mut map: HashMap<Vec<CellKey>, Vec<usize>> = HashMap::new();
    for r in 0..rows {
        if keys.iter().any(|c| c.values[r].is_null()) {
            continue;
        }
        map.entry(row_key(keys, r)).or_default().push(r);
    }
    map
}

fn pick(column: &Column, row: Option<usize>) -> Cell {
    row.map_or(Cell::Null, |r| column.values[r].clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Access and construction
// ─────────────────────────────────────────────────────────────────────────────

/// `(col T "name")`
pub(super) fn col(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'col' input")?;
    let name = args.next("a column name")?.into_text("'col' column name")?;
    Ok(Value::Column(column(&table, &name)?.values.clone()))
}

/// `(get D "key")` on dictionaries, or `(get T "name")` on tables.
pub(super) fn get(args: &mut Args) -> ScriptResult<Value> {
    let container = args.next("a dictionary")?;
    let key = args.next("a key")?.into_text("'get' key")?;
    match container {
        Value::Dict(map) => map.get(&key).cloned().ok_or_else(|| {
            let available: Vec<&str> = map.keys().map(String::as_str).collect();
            ScriptError::runtime(format!(
                "Key '{key}' not found. Available keys: {}",
                available.join(", ")
            ))
        }),
        Value::Table(table) => Ok(Value::Column(column(&table, &key)?.values.clone())),
        other => Err(ScriptError::runtime(format!(
            "'get' needs a dictionary or a table, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn columns(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'columns' input")?;
    Ok(Value::List(
        table
            .column_names()
            .into_iter()
            .map(|n| Value::Scalar(n.into()))
            .collect(),
    ))
}

pub(super) fn nrows(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'nrows' input")?;
    Ok(Value::Scalar(Cell::Int(
        i64::try_from(table.nrows()).unwrap_or(i64::MAX),
    )))
}

/// Pairs from `"name" value ...` positionals followed by `:name value` keywords.
fn named_pairs(args: &mut Args, kwargs: &mut Kwargs, op: &str) -> ScriptResult<Vec<(String, Value)>> {
    let positional = args.rest();
    if positional.len() % 2 != 0 {
        return Err(ScriptError::runtime(format!(
            "'{op}' expects name and value pairs"
        )));
    }
    let mut pairs = Vec::new();
    let mut iter = positional.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((name.into_text(&format!("'{op}' name"))?, value));
    }
    pairs.extend(kwargs.drain());
    Ok(pairs)
}

/// `(table :a [1 2] :b (col df "x"))`. Scalars are repeated to the common length.
pub(super) fn table(args: &mut Args, kwargs: &mut Kwargs, ctx: &Ctx) -> ScriptResult<Value> {
    let pairs = named_pairs(args, kwargs, "table")?;
    let mut length: Option<usize> = None;
    let mut staged = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        match value {
            Value::Scalar(cell) => staged.push((name, Err(cell))),
            other => {
                let cells = other.into_cells(&format!("column '{name}'"))?;
                match length {
                    Some(n) if n != cells.len() => {
                        return Err(ScriptError::runtime(format!(
                            "column '{name}' has {} values, expected {n}",
                            cells.len()
                        )));
                    }
                    _ => length = Some(cells.len()),
                }
                staged.push((name, Ok(cells)));
            }
        }
    }
    let rows = length.unwrap_or(1);
    ctx.check_rows(rows)?;
    let columns = staged
        .into_iter()
        .map(|(name, cells)| {
            let values = cells.unwrap_or_else(|scalar| vec![scalar; rows]);
            Column::new(name, values)
        })
        .collect();
    build(columns)
}

/// `(dict "a" x "b" y)` or `(dict :a x :b y)`
pub(super) fn dict(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let pairs = named_pairs(args, kwargs, "dict")?;
    Ok(Value::Dict(pairs.into_iter().collect()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Column selection
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn select(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'select' input")?;
    let names = rest_names(args, "'select' columns")?;
    let columns = names
        .iter()
        .map(|n| column(&table, n).cloned())
        .collect::<ScriptResult<_>>()?;
    build(columns)
}

pub(super) fn drop(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'drop' input")?;
    let names = rest_names(args, "'drop' columns")?;
    for name in &names {
        let _ = column(&table, name)?;
    }
    let columns = table
        .columns()
        .iter()
        .filter(|c| !names.contains(&c.name))
        .cloned()
        .collect();
    build(columns)
}

/// `(rename T "old" "new" ...)` or `(rename T (dict "old" "new"))`
pub(super) fn rename(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'rename' input")?;
    let mut names = Vec::new();
    for value in args.rest() {
        match value {
            Value::Dict(map) => {
                for (old, new) in map {
                    names.push(old);
                    names.push(new.into_text("'rename' new name")?);
                }
            }
            other => names.extend(other.into_names("'rename' names")?),
        }
    }
    if names.len() % 2 != 0 {
        return Err(ScriptError::runtime(
            "'rename' expects pairs of old and new names",
        ));
    }
    let mapping: Vec<(&String, &String)> = names.chunks(2).map(|pair| (&pair[0], &pair[1])).collect();
    for (old, _) in &mapping {
        let _ = column(&table, old)?;
    }
    let columns = table
        .columns()
        .iter()
        .map(|c| {
            let name = mapping
                .iter()
                .find(|(old, _)| **old == c.name)
                .map_or_else(|| c.name.clone(), |(_, new)| (*new).clone());
            Column::new(name, c.values.clone())
        })
        .collect();
    build(columns)
}

/// `(with-column T "name" EXPR)`: replaces an existing column in place or appends.
pub(super) fn with_column(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'with-column' input")?;
    let name = args.next("a column name")?.into_text("'with-column' name")?;
    let rows = table.nrows();
    let values = match args.next("column values")? {
        Value::Scalar(cell) => vec![cell; rows],
        other => {
            let cells = other.into_cells("'with-column' values")?;
            if cells.len() != rows && table.ncols() > 0 {
                return Err(ScriptError::runtime(format!(
                    "column '{name}' has {} values but the table has {rows} rows",
                    cells.len()
                )));
            }
            cells
        }
    };
    let mut columns: Vec<Column> = table.columns().to_vec();
    match columns.iter_mut().find(|c| c.name == name) {
        Some(existing) => existing.values = values,
        None => columns.push(Column::new(name, values)),
    }
    build(columns)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row selection and ordering
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn filter(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'filter' input")?;
    let mask = args.next("a boolean mask")?.into_cells("'filter' mask")?;
    if mask.len() != table.nrows() {
        return Err(ScriptError::runtime(format!(
            "'filter' mask has {} values but the table has {} rows",
            mask.len(),
            table.nrows()
        )));
    }
    let mut rows = Vec::new();
    for (i, cell) in mask.iter().enumerate() {
        if arith::truthy(cell, "filter")? {
            rows.push(i);
        }
    }
    take_rows(&table, &rows)
}

/// `(sort T "col" :descending true)`. Stable; nulls always sort last.
pub(super) fn sort(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'sort' input")?;
    let names = rest_names(args, "'sort' columns")?;
    if names.is_empty() {
        return Err(ScriptError::runtime("'sort' needs at least one column"));
    }
    let descending = match kwargs.take("descending") {
        Some(v) => v.into_bool("'sort' :descending")?,
        None => false,
    };
    let keys: Vec<&Column> = names
        .iter()
        .map(|n| column(&table, n))
        .collect::<ScriptResult<_>>()?;

    let mut rows: Vec<usize> = (0..table.nrows()).collect();
    rows.sort_by(|&a, &b| {
        for key in &keys {
            let (x, y) = (&key.values[a], &key.values[b]);
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) if descending => y.total_cmp(x),
                (false, false) => x.total_cmp(y),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    take_rows(&table, &rows)
}

/// `(head T n)` / `(tail T n)`, `n` defaulting to 5.
pub(super) fn head_tail(args: &mut Args, head: bool) -> ScriptResult<Value> {
    let op = if head { "head" } else { "tail" };
    let table = args.next("a table")?.into_table(&format!("'{op}' input"))?;
    let n = match args.next_opt() {
        Some(v) => v.into_int(&format!("'{op}' row count"))?,
        None => 5,
    };
    let n = usize::try_from(n)
        .map_err(|_| ScriptError::runtime(format!("'{op}' row count must not be negative")))?;
    let total = table.nrows();
    let n = n.min(total);
    let rows: Vec<usize> = if head {
        (0..n).collect()
    } else {
        (total - n..total).collect()
    };
    take_rows(&table, &rows)
}

fn subset<'t>(table: &'t Table, kwargs: &mut Kwargs, op: &str) -> ScriptResult<Vec<&'t Column>> {
    match kwargs.take("subset") {
        Some(v) => v
            .into_names(&format!("'{op}' :subset"))?
            .iter()
            .map(|n| column(table, n))
            .collect(),
        None => Ok(table.columns().iter().collect()),
    }
}

/// `(drop-nulls T :subset [...])`
pub(super) fn drop_nulls(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'drop-nulls' input")?;
    let checked = subset(&table, kwargs, "drop-nulls")?;
    let rows: Vec<usize> = (0..table.nrows())
        .filter(|&r| checked.iter().all(|c| !c.values[r].is_null()))
        .collect();
    take_rows(&table, &rows)
}

/// `(distinct T :subset [...])`: first occurrence wins.
pub(super) fn distinct(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'distinct' input")?;
    let checked = subset(&table, kwargs, "distinct")?;
    let mut seen = HashSet::new();
    let rows: Vec<usize> = (0..table.nrows())
        .filter(|&r| seen.insert(row_key(&checked, r)))
        .collect();
    take_rows(&table, &rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// Combining tables
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum How {
    Inner,
    Left,
    Right,
    Outer,
}

/// `(join L R :on "key" :how "left")`
///
/// Output columns are the keys, then the left table's other columns, then
/// the right table's. Clashing non-key names get `_x` and `_y` suffixes.
/// Null keys never match.
pub(super) fn join(args: &mut Args, kwargs: &mut Kwargs, ctx: &Ctx) -> ScriptResult<Value> {
    let left = args.next("a left table")?.into_table("'join' left input")?;
    let right = args.next("a right table")?.into_table("'join' right input")?;
    let on = kwargs
        .take("on")
        .ok_or_else(|| ScriptError::runtime("'join' needs :on key columns"))?
        .into_names("'join' :on")?;
    let how = match kwargs.take("how") {
        None => How::Inner,
        Some(v) => match v.into_text("'join' :how")?.as_str() {
            "inner" => How::Inner,
            "left" => How::Left,
            "right" => How::Right,
            "outer" => How::Outer,
            other => {
                return Err(ScriptError::runtime(format!(
                    "'join' :how must be inner, left, right or outer, got '{other}'"
                )));
            }
        },
    };

    let left_keys: Vec<&Column> = on.iter().map(|n| column(&left, n)).collect::<ScriptResult<_>>()?;
    let right_keys: Vec<&Column> = on.iter().map(|n| column(&right, n)).collect::<ScriptResult<_>>()?;

    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let push = |pair: (Option<usize>, Option<usize>),
                pairs: &mut Vec<(Option<usize>, Option<usize>)>|
     -> ScriptResult<()> {
        pairs.push(pair);
        ctx.check_rows(pairs.len())
    };

    if how == How::Right {
        let left_index = key_index(&left_keys, left.nrows());
        for r in 0..right.nrows() {
            match left_index.get(&row_key(&right_keys, r)) {
                Some(matches) => {
                    for &l in matches {
                        push((Some(l), Some(r)), &mut pairs)?;
                    }
                }
                _ => push((None, Some(r)), &mut pairs)?,
            }
        }
    } else {
        let right_index = key_index(&right_keys, right.nrows());
        let mut matched_right = HashSet::new();
        for l in 0..left.nrows() {
            let matches = if left_keys.iter().any(|c| c.values[l].is_null()) {
                None
            } else {
                right_index.get(&row_key(&left_keys, l))
            };
            match matches {
                Some(matches) => {
                    for &r in matches {
                        let _ = matched_right.insert(r);
                        push((Some(l), Some(r)), &mut pairs)?;
                    }
                }
                None if how != How::Inner => push((Some(l), None), &mut pairs)?,
                None => {}
            }
        }
        if how == How::Outer {
            for r in 0..right.nrows() {
                if !matched_right.contains(&r) {
                    push((None, Some(r)), &mut pairs)?;
                }
            }
        }
    }

    let left_rest: Vec<&Column> = left.columns().iter().filter(|c| !on.contains(&c.name)).collect();
    let right_rest: Vec<&Column> = right.columns().iter().filter(|c| !on.contains(&c.name)).collect();
    let left_names: HashSet<&str> = left_rest.iter().map(|c| c.name.as_str()).collect();
    let right_names: HashSet<&str> = right_rest.iter().map(|c| c.name.as_str()).collect();

    let mut columns = Vec::new();
    for (lk, rk) in left_keys.iter().zip(&right_keys) {
        let values = pairs
            .iter()
            .map(|&(l, r)| match l {
                Some(_) => pick(lk, l),
                None => pick(rk, r),
            })
            .collect();
        columns.push(Column::new(lk.name.clone(), values));
    }
    for c in &left_rest {
        let name = if right_names.contains(c.name.as_str()) {
            format!("{}_x", c.name)
        } else {
            c.name.clone()
        };
        columns.push(Column::new(name, pairs.iter().map(|&(l, _)| pick(c, l)).collect()));
    }
    for c in &right_rest {
        let name = if left_names.contains(c.name.as_str()) {
            format!("{}_y", c.name)
        } else {
            c.name.clone()
        };
        columns.push(Column::new(name, pairs.iter().map(|&(_, r)| pick(c, r)).collect()));
    }
    build(columns)
}

/// `(concat-rows A B ...)`: union of columns in first-appearance order; gaps are null.
pub(super) fn concat_rows(args: &mut Args, ctx: &Ctx) -> ScriptResult<Value> {
    let first = args.next("a table")?.into_table("'concat-rows' input")?;
    let mut tables = vec![first];
    for value in args.rest() {
        tables.push(value.into_table("'concat-rows' input")?);
    }
    let total: usize = tables.iter().map(|t| t.nrows()).sum();
    ctx.check_rows(total)?;

    let mut merged: IndexMap<String, Vec<Cell>> = IndexMap::new();
    let mut filled = 0;
    for table in &tables {
        for c in table.columns() {
            merged
                .entry(c.name.clone())
                .or_insert_with(|| vec![Cell::Null; filled])
                .extend(c.values.iter().cloned());
        }
        filled += table.nrows();
        for values in merged.values_mut() {
            values.resize(filled, Cell::Null);
        }
    }
    build(merged.into_iter().map(|(n, v)| Column::new(n, v)).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregation
// ─────────────────────────────────────────────────────────────────────────────

/// `(group-by T keys :agg "sum" :columns [...])`
///
/// Groups appear in first-appearance order; rows with a null key are
/// dropped. Without `:columns`, `sum` and `mean` aggregate only the numeric
/// columns and the other reductions take every non-key column.
pub(super) fn group_by(args: &mut Args, kwargs: &mut Kwargs) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'group-by' input")?;
    let keys = args.next("key columns")?.into_names("'group-by' keys")?;
    let agg_name = match kwargs.take("agg") {
        Some(v) => v.into_text("'group-by' :agg")?,
        None => "sum".to_owned(),
    };
    let agg = Agg::from_name(&agg_name).ok_or_else(|| {
        ScriptError::runtime(format!(
            "'group-by' :agg must be sum, mean, min, max, count or first, got '{agg_name}'"
        ))
    })?;
    let key_columns: Vec<&Column> = keys.iter().map(|n| column(&table, n)).collect::<ScriptResult<_>>()?;
    let value_columns: Vec<&Column> = match kwargs.take("columns") {
        Some(v) => v
            .into_names("'group-by' :columns")?
            .iter()
            .map(|n| column(&table, n))
            .collect::<ScriptResult<_>>()?,
        None => table
            .columns()
            .iter()
            .filter(|c| !keys.contains(&c.name))
            .filter(|c| !agg.numeric_only() || c.dtype().is_numeric())
            .collect(),
    };

    let mut groups: IndexMap<Vec<CellKey>, Vec<usize>> = IndexMap::new();
    for r in 0..table.nrows() {
        if key_columns.iter().any(|c| c.values[r].is_null()) {
            continue;
        }
        groups.entry(row_key(&key_columns, r)).or_default().push(r);
    }

    let mut columns: Vec<Column> = key_columns
        .iter()
        .map(|c| {
            let values = groups.values().map(|rows| c.values[rows[0]].clone()).collect();
            Column::new(c.name.clone(), values)
        })
        .collect();
    for c in value_columns {
        let values = groups
            .values()
            .map(|rows| arith::reduce(rows.iter().map(|&r| &c.values[r]), agg))
            .collect::<ScriptResult<_>>()?;
        columns.push(Column::new(c.name.clone(), values));
    }
    build(columns)
}

/// `(map-numeric T "*" 2)`: applies an arithmetic operator to every numeric column.
pub(super) fn map_numeric(args: &mut Args) -> ScriptResult<Value> {
    let table = args.next("a table")?.into_table("'map-numeric' input")?;
    let symbol = args.next("an operator")?.into_text("'map-numeric' operator")?;
    let op = Arith::from_symbol(&symbol).ok_or_else(|| {
        ScriptError::runtime(format!(
            "'map-numeric' operator must be one of + - * / %, got '{symbol}'"
        ))
    })?;
    let operand = match args.next("a scalar operand")? {
        Value::Scalar(cell) => cell,
        other => {
            return Err(ScriptError::runtime(format!(
                "'map-numeric' operand must be a scalar, got {}",
                other.type_name()
            )));
        }
    };
    let columns = table
        .columns()
        .iter()
        .map(|c| {
            if !c.dtype().is_numeric() {
                return Ok(c.clone());
            }
            let values = c
                .values
                .iter()
                .map(|v| arith::arith_cell(op, v, &operand))
                .collect::<ScriptResult<_>>()?;
            Ok(Column::new(c.name.clone(), values))
        })
        .collect::<ScriptResult<_>>()?;
    build(columns)
}
