//! Command handlers over one open connection.

use std::path::Path;

use anyhow::{bail, Context, Result};
use litestmt_core::{Connection, Value};

use crate::renderer::{render_columns, RowSet};

/// Runs the subcommands against `connection`.
pub struct Cli {
    connection: Connection,
}

impl Cli {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn exec(&self, sql: &str, args: &[String]) -> Result<()> {
        let values = parse_values(args);
        let changes = self
            .connection
            .execute(sql, &values)
            .with_context(|| format!("Failed to execute: {sql}"))?;
        println!("{changes} row(s) changed");
        println!(
            "last insert rowid: {}",
            self.connection.last_insert_rowid()?
        );
        Ok(())
    }

    pub fn query(&self, sql: &str, args: &[String], json: bool) -> Result<()> {
        let values = parse_values(args);
        let mut cursor = self
            .connection
            .select(sql, &values)
            .with_context(|| format!("Failed to run query: {sql}"))?;
        let rows = RowSet::collect(&mut cursor).context("Failed to read rows")?;

        if json {
            println!("{}", rows.to_json()?);
        } else {
            print!("{rows}");
        }
        Ok(())
    }

    pub fn script(&self, file: &Path) -> Result<()> {
        let sql = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        self.connection
            .execute_script(&sql)
            .with_context(|| format!("Failed to run {}", file.display()))?;
        println!("Script {} completed", file.display());
        Ok(())
    }

    pub fn schema(&self, table: Option<&str>) -> Result<()> {
        let schema = self.connection.schema(table)?;
        if schema.is_empty() {
            if let Some(table) = table {
                bail!("No such table: {table}");
            }
        }
        print!("{schema}");
        Ok(())
    }

    pub fn columns(&self, table: &str, json: bool) -> Result<()> {
        let columns = self.connection.table_columns(table)?;
        if columns.is_empty() {
            bail!("No such table: {table}");
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&columns)?);
        } else {
            print!("{}", render_columns(&columns));
        }
        Ok(())
    }
}

fn parse_values(args: &[String]) -> Vec<Value> {
    args.iter().map(|arg| parse_value(arg)).collect()
}

/// Reads a command-line argument as the most specific scalar it spells.
pub fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(integer) = raw.parse::<i64>() {
        return Value::Integer(integer);
    }
    // Rust also parses "inf" and "NaN", which are text here.
    if let Ok(real) = raw.parse::<f64>() {
        if real.is_finite() {
            return Value::Real(real);
        }
    }
    if let Some(bytes) = parse_blob(raw) {
        return Value::Blob(bytes);
    }
    Value::Text(raw.to_string())
}

/// Decodes the `x'0aff'` literal form.
fn parse_blob(raw: &str) -> Option<Vec<u8>> {
    let hex = raw
        .strip_prefix("x'")
        .or_else(|| raw.strip_prefix("X'"))?
        .strip_suffix('\'')?;
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_value("NULL"), Value::Null);
        assert_eq!(parse_value("-42"), Value::Integer(-42));
        assert_eq!(parse_value("2.5"), Value::Real(2.5));
        assert_eq!(parse_value("x'0aFF'"), Value::Blob(vec![0x0a, 0xff]));
        assert_eq!(parse_value("x''"), Value::Blob(Vec::new()));
        assert_eq!(parse_value("hello"), Value::Text("hello".to_string()));
    }

    #[test]
    fn test_parse_falls_back_to_text() {
        assert_eq!(parse_value("inf"), Value::Text("inf".to_string()));
        assert_eq!(parse_value("x'abc'"), Value::Text("x'abc'".to_string()));
        assert_eq!(parse_value("x'zz'"), Value::Text("x'zz'".to_string()));
        assert_eq!(parse_value("2009-09-13"), Value::Text("2009-09-13".to_string()));
    }
}
