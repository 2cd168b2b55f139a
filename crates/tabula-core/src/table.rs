//! Immutable tabular data.
//!
//! A [`Table`] is an ordered set of equally long, uniquely named [`Column`]s.
//! Tables are never mutated once built: every transform produces a new table,
//! and agents share them as `Arc<Table>` snapshots inside a [`TableSet`].
//!
//! The structural description produced by [`Table::describe`] is what the LLM
//! sees. It contains column names, types and counts, never cell values.

use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named tables in insertion order.
pub type TableSet = IndexMap<String, Arc<Table>>;

/// Errors raised while building or (de)serializing tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A column does not have the same number of rows as the first column.
    #[error("column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        /// Offending column.
        column: String,
        /// Row count of the first column.
        expected: usize,
        /// Row count of the offending column.
        actual: usize,
    },

    /// Two columns share a name.
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    /// CSV parsing or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Cells
// ─────────────────────────────────────────────────────────────────────────────

/// A single table value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Missing value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Finite float. Use [`Cell::float`] to build one.
    Float(f64),
    /// UTF-8 text.
    Text(String),
}

impl Cell {
    /// Build a float cell; NaN and infinities become [`Cell::Null`].
    #[must_use]
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            Self::Float(value)
        } else {
            Self::Null
        }
    }

    /// Whether the cell is missing.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the cell (integers widen to `f64`).
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean view of the cell.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text view of the cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Total order used for sorting: booleans, then numbers, then text, nulls last.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            match cell {
                Cell::Bool(_) => 0,
                Cell::Int(_) | Cell::Float(_) => 1,
                Cell::Text(_) => 2,
                Cell::Null => 3,
            }
        }
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => rank(a).cmp(&rank(b)),
            },
        }
    }

    /// Hashable key with integral floats folded onto integers, so `1` and `1.0`
    /// group and join together.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn key(&self) -> CellKey {
        match self {
            Self::Null => CellKey::Null,
            Self::Bool(b) => CellKey::Bool(*b),
            Self::Int(i) => CellKey::Int(*i),
            Self::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    CellKey::Int(*f as i64)
                } else {
                    CellKey::Float(f.to_bits())
                }
            }
            Self::Text(s) => CellKey::Text(s.clone()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Hash/equality key for a [`Cell`]. See [`Cell::key`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CellKey {
    /// Missing value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer (or integral float).
    Int(i64),
    /// Non-integral float bit pattern.
    Float(u64),
    /// Text.
    Text(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Columns
// ─────────────────────────────────────────────────────────────────────────────

/// Column type derived from its non-null values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// All values are integers.
    Integer,
    /// Numeric with at least one float.
    Float,
    /// All values are booleans.
    Boolean,
    /// All values are text.
    Text,
    /// More than one kind of value.
    Mixed,
    /// No non-null values.
    Empty,
}

impl DataType {
    /// Whether arithmetic applies to the column.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Mixed => "mixed",
            Self::Empty => "empty",
        };
        f.write_str(name)
    }
}

/// A named sequence of cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Values, one per row.
    pub values: Vec<Cell>,
}

impl Column {
    /// Create a column.
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of null cells.
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|c| c.is_null()).count()
    }

    /// Type derived from the non-null values.
    pub fn dtype(&self) -> DataType {
        let mut current: Option<DataType> = None;
        for cell in &self.values {
            let kind = match cell {
                Cell::Null => continue,
                Cell::Bool(_) => DataType::Boolean,
                Cell::Int(_) => DataType::Integer,
                Cell::Float(_) => DataType::Float,
                Cell::Text(_) => DataType::Text,
            };
            current = Some(match (current, kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(DataType::Integer | DataType::Float), DataType::Integer | DataType::Float) => {
                    DataType::Float
                }
                _ => return DataType::Mixed,
            });
        }
        current.unwrap_or(DataType::Empty)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tables
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TableRepr {
    columns: Vec<Column>,
}

impl TryFrom<TableRepr> for Table {
    type Error = TableError;

    fn try_from(repr: TableRepr) -> Result<Self, Self::Error> {
        Self::new(repr.columns)
    }
}

/// An immutable table. Construction validates equal lengths and unique names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableRepr")]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table from columns.
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let expected = columns.first().map_or(0, Column::len);
        for (i, column) in columns.iter().enumerate() {
            if column.len() != expected {
                return Err(TableError::LengthMismatch {
                    column: column.name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Consume the table, returning its columns.
    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Structural description for LLM instructions: shape, names, types and
    /// missing-value counts. Never includes cell values.
    pub fn describe(&self) -> String {
        let mut out = format!("{} rows x {} columns\nColumns:", self.nrows(), self.ncols());
        for column in &self.columns {
            out.push_str(&format!(
                "\n- '{}': {} ({} missing)",
                column.name,
                column.dtype(),
                column.null_count()
            ));
        }
        out
    }

    /// Read a CSV document with a header row, inferring each column's type.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_owned).collect();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in csv_reader.records() {
            let record = record?;
            for (i, slot) in raw.iter_mut().enumerate() {
                slot.push(record.get(i).unwrap_or_default().to_owned());
            }
        }
        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, values)| Column::new(name, infer_cells(values)))
            .collect();
        Self::new(columns)
    }

    /// Read a CSV file.
    pub fn from_csv_path(path: &Path) -> Result<Self, TableError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Write the table as CSV with a header row. Nulls become empty fields.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.column_names())?;
        for row in 0..self.nrows() {
            csv_writer.write_record(self.columns.iter().map(|c| c.values[row].to_string()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Render the table as a CSV string.
    pub fn to_csv_string(&self) -> Result<String, TableError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Infer a typed column from raw CSV fields. Empty fields are nulls; the
/// remaining fields decide between integer, float, boolean and text.
fn infer_cells(raw: Vec<String>) -> Vec<Cell> {
    let present = || raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty());

    if present().all(|s| s.parse::<i64>().is_ok()) {
        return raw
            .iter()
            .map(|s| s.trim().parse::<i64>().map_or(Cell::Null, Cell::Int))
            .collect();
    }
    if present().all(|s| s.parse::<f64>().is_ok()) {
        return raw
            .iter()
            .map(|s| s.trim().parse::<f64>().map_or(Cell::Null, Cell::float))
            .collect();
    }
    if present().all(|s| parse_bool(s).is_some()) {
        return raw
            .iter()
            .map(|s| parse_bool(s.trim()).map_or(Cell::Null, Cell::Bool))
            .collect();
    }
    raw.into_iter()
        .map(|s| if s.is_empty() { Cell::Null } else { Cell::Text(s) })
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample() -> Table {
        Table::new(vec![
            Column::new("hello", vec![1.into(), 2.into(), 3.into()]),
            Column::new("label", vec!["a".into(), Cell::Null, "c".into()]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_length_mismatch() {
        let err = Table::new(vec![
            Column::new("a", vec![1.into()]),
            Column::new("b", vec![1.into(), 2.into()]),
        ])
        .unwrap_err();
        assert_matches!(err, TableError::LengthMismatch { expected: 1, actual: 2, .. });
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Table::new(vec![
            Column::new("a", vec![1.into()]),
            Column::new("a", vec![2.into()]),
        ])
        .unwrap_err();
        assert_matches!(err, TableError::DuplicateColumn(name) if name == "a");
    }

    #[test]
    fn describe_has_structure_but_no_values() {
        let text = sample().describe();
        assert_eq!(
            text,
            "3 rows x 2 columns\nColumns:\n- 'hello': integer (0 missing)\n- 'label': text (1 missing)"
        );
        assert!(!text.contains("\"a\""));
    }

    #[test]
    fn dtype_widens_integers_to_float() {
        let column = Column::new("x", vec![1.into(), 2.5.into(), Cell::Null]);
        assert_eq!(column.dtype(), DataType::Float);
        let mixed = Column::new("y", vec![1.into(), "a".into()]);
        assert_eq!(mixed.dtype(), DataType::Mixed);
        let empty = Column::new("z", vec![Cell::Null]);
        assert_eq!(empty.dtype(), DataType::Empty);
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(Cell::float(f64::NAN), Cell::Null);
        assert_eq!(Cell::float(f64::INFINITY), Cell::Null);
        assert_eq!(Cell::float(1.5), Cell::Float(1.5));
    }

    #[test]
    fn csv_inference() {
        let csv = "id,score,flag,name\n1,2.5,true,ann\n2,,false,\n3,4,TRUE,carl\n";
        let table = Table::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.nrows(), 3);
        assert_eq!(table.column("id").unwrap().dtype(), DataType::Integer);
        assert_eq!(table.column("score").unwrap().dtype(), DataType::Float);
        assert_eq!(table.column("score").unwrap().values[1], Cell::Null);
        assert_eq!(table.column("flag").unwrap().dtype(), DataType::Boolean);
        assert_eq!(table.column("name").unwrap().values[1], Cell::Null);
    }

    #[test]
    fn csv_write_then_read_keeps_values() {
        let table = sample();
        let text = table.to_csv_string().unwrap();
        assert_eq!(text, "hello,label\n1,a\n2,\n3,c\n");
        let back = Table::from_csv_reader(text.as_bytes()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn csv_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "a,b\n1,x\n").unwrap();
        let table = Table::from_csv_path(&path).unwrap();
        assert_eq!(table.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let bad = r#"{"columns":[{"name":"a","values":[1]},{"name":"b","values":[]}]}"#;
        assert!(serde_json::from_str::<Table>(bad).is_err());

        let table = sample();
        let json = serde_json::to_string(&table).unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn cell_serde_keeps_int_and_float_apart() {
        let cells = vec![Cell::Int(3), Cell::Float(3.0), Cell::Null, Cell::Bool(true)];
        let json = serde_json::to_string(&cells).unwrap();
        assert_eq!(json, "[3,3.0,null,true]");
        let back: Vec<Cell> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn total_cmp_puts_nulls_last() {
        let mut cells = vec![Cell::Null, 3.into(), 1.5.into(), "b".into(), true.into()];
        cells.sort_by(Cell::total_cmp);
        assert_eq!(cells, vec![true.into(), 1.5.into(), 3.into(), "b".into(), Cell::Null]);
    }

    #[test]
    fn key_folds_integral_floats() {
        assert_eq!(Cell::Int(1).key(), Cell::Float(1.0).key());
        assert_ne!(Cell::Float(1.5).key(), Cell::Int(1).key());
    }

    proptest::proptest! {
        #[test]
        fn json_round_trip_of_int_columns(values in proptest::collection::vec(proptest::num::i64::ANY, 0..20)) {
            let column = Column::new("v", values.into_iter().map(Cell::Int).collect());
            let table = Table::new(vec![column]).unwrap();
            let json = serde_json::to_string(&table).unwrap();
            let back: Table = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(back, table);
        }
    }
}
