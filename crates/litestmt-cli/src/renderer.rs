//! Plain-text and JSON rendering of query results.

use std::fmt;

use litestmt_core::{ColumnInfo, ResultCursor, Value};
use serde_json::{Map, Value as Json};

/// Every row of a finished query.
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Drains `cursor`.
    pub fn collect(cursor: &mut ResultCursor<'_>) -> litestmt_core::Result<Self> {
        let columns = cursor.column_names().to_vec();
        let mut rows = Vec::new();
        while cursor.next()? {
            rows.push(cursor.values()?);
        }
        Ok(Self { columns, rows })
    }

    /// Rows as a JSON array of objects keyed by column name.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| Ok((column.clone(), serde_json::to_value(value)?)))
                    .collect::<serde_json::Result<Map<String, Json>>>()
                    .map(Json::Object)
            })
            .collect::<serde_json::Result<Vec<_>>>()?;
        serde_json::to_string_pretty(&rows)
    }
}

/// Tab-separated, with a header line.
impl fmt::Display for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// One line per column.
pub fn render_columns(columns: &[ColumnInfo]) -> String {
    columns
        .iter()
        .map(|column| format!("{column}\n"))
        .collect()
}
