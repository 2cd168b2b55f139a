//! Loading input tables and writing produced artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tabula_core::{Figure, Table, TableSet};

/// Parse a `name=path.csv` argument.
pub fn parse_table_arg(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing table name in '{raw}'"));
    }
    if path.trim().is_empty() {
        return Err(format!("missing path in '{raw}'"));
    }
    Ok((name.to_string(), PathBuf::from(path.trim())))
}

/// Read every `name=path` table, keeping argument order.
pub fn load_tables(specs: &[(String, PathBuf)]) -> Result<TableSet> {
    let mut tables = TableSet::new();
    for (name, path) in specs {
        let table = Table::from_csv_path(path)
            .with_context(|| format!("Failed to read table '{name}' from {}", path.display()))?;
        if tables.insert(name.clone(), Arc::new(table)).is_some() {
            bail!("table '{name}' given more than once");
        }
    }
    Ok(tables)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Write each table as `<dir>/<name>.csv`.
pub fn write_tables(dir: &Path, tables: &TableSet) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;
    let mut written = Vec::with_capacity(tables.len());
    for (name, table) in tables {
        let path = dir.join(format!("{name}.csv"));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        table
            .write_csv(file)
            .with_context(|| format!("Failed to write table '{name}'"))?;
        written.push(path);
    }
    Ok(written)
}

/// Write each figure as Plotly JSON, `<dir>/<key>.json`.
pub fn write_figures<'a>(
    dir: &Path,
    figures: impl IntoIterator<Item = (&'a String, &'a Arc<Figure>)>,
) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;
    let mut written = Vec::new();
    for (key, figure) in figures {
        let path = dir.join(format!("{key}.json"));
        let json = serde_json::to_string_pretty(figure.as_ref())?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::{Cell, Column};

    #[test]
    fn table_args() {
        assert_eq!(
            parse_table_arg("sales=data/sales.csv").unwrap(),
            ("sales".to_string(), PathBuf::from("data/sales.csv"))
        );
        assert!(parse_table_arg("sales").is_err());
        assert!(parse_table_arg("=x.csv").is_err());
        assert!(parse_table_arg("sales=").is_err());
    }

    #[test]
    fn tables_round_trip_through_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = TableSet::new();
        let table = Table::new(vec![Column::new("a", vec![Cell::from(1_i64), Cell::Null])]).unwrap();
        let _ = tables.insert("t".into(), Arc::new(table));

        let written = write_tables(dir.path(), &tables).unwrap();
        assert_eq!(written, vec![dir.path().join("t.csv")]);

        let loaded = load_tables(&[("t".into(), written[0].clone())]).unwrap();
        assert_eq!(loaded["t"].nrows(), 2);
        assert!(loaded["t"].column("a").unwrap().values[1].is_null());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "a\n1\n").unwrap();
        let specs = vec![("t".to_string(), path.clone()), ("t".to_string(), path)];
        assert!(load_tables(&specs).is_err());
    }

    #[test]
    fn missing_file_names_the_table() {
        let err = load_tables(&[("ghost".into(), PathBuf::from("/nonexistent/ghost.csv"))])
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
