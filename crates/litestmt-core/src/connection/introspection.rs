//! Table and column metadata read through the connection's own statements.

use std::fmt;

use serde::Serialize;

use super::Connection;
use crate::error::Result;
use crate::value::Value;

const TABLE_INFO_SQL: &str =
    "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)";

const TABLE_EXISTS_SQL: &str =
    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE";

const SCHEMA_SQL: &str = "SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY rowid";

const TABLE_SCHEMA_SQL: &str = "SELECT sql FROM sqlite_master \
     WHERE sql IS NOT NULL AND tbl_name = ?1 COLLATE NOCASE ORDER BY rowid";

/// One column of a table, as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    /// Position in the table, starting at 0
    pub cid: i32,
    pub name: String,
    /// Declared type text, possibly empty
    pub declared_type: String,
    pub nullable: bool,
    /// Default expression as written in the schema
    pub default_value: Option<String>,
    pub primary_key: bool,
}

impl fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.cid, self.name)?;
        if !self.declared_type.is_empty() {
            write!(f, " {}", self.declared_type)?;
        }
        if !self.nullable {
            f.write_str(" NOT NULL")?;
        }
        if let Some(default) = &self.default_value {
            write!(f, " DEFAULT {default}")?;
        }
        if self.primary_key {
            f.write_str(" PRIMARY KEY")?;
        }
        Ok(())
    }
}

impl Connection {
    /// Columns of `table` in declaration order. Unknown tables have none.
    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut cursor = self.select(TABLE_INFO_SQL, &[Value::from(table)])?;
        let mut columns = Vec::new();
        while cursor.next()? {
            let default_value = if cursor.is_null("dflt_value")? {
                None
            } else {
                Some(cursor.text("dflt_value")?)
            };
            columns.push(ColumnInfo {
                cid: cursor.int("cid")?,
                name: cursor.text("name")?,
                declared_type: cursor.text("type")?,
                nullable: !cursor.bool("notnull")?,
                default_value,
                primary_key: cursor.int("pk")? > 0,
            });
        }
        Ok(columns)
    }

    /// One column of `table`, matched case-insensitively.
    pub fn column_info(&self, table: &str, column: &str) -> Result<Option<ColumnInfo>> {
        Ok(self
            .table_columns(table)?
            .into_iter()
            .find(|info| info.name.eq_ignore_ascii_case(column)))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.select(TABLE_EXISTS_SQL, &[Value::from(table)])?.next()
    }

    /// DDL of `table` and its indexes and triggers, or of the whole
    /// database when `table` is `None`. One statement per line, each ending
    /// in `;`. Unknown tables give an empty string.
    pub fn schema(&self, table: Option<&str>) -> Result<String> {
        let mut cursor = match table {
            Some(table) => self.select(TABLE_SCHEMA_SQL, &[Value::from(table)])?,
            None => self.select(SCHEMA_SQL, &[])?,
        };
        let mut schema = String::new();
        while cursor.next()? {
            schema.push_str(&cursor.text(0)?);
            schema.push_str(";\n");
        }
        Ok(schema)
    }
}
