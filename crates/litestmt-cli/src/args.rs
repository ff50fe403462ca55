use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use litestmt_core::{ConnectionBuilder, Trace, DEFAULT_BUSY_RETRIES};

/// Run statements and queries against SQLite stores
///
/// A store is opened in one of four modes: straight from a bundled file
/// (read-only), from a writable copy of a bundled file (read-write), from a
/// writable store created on demand with an optional schema (cache), or as a
/// transient in-memory store (memory).
#[derive(Parser)]
#[command(version, about, name = "litestmt")]
pub struct Args {
    /// How to open the store
    #[arg(long, global = true, value_enum, default_value_t = Mode::Memory)]
    pub mode: Mode,

    /// Logical database name; stores are named `<NAME>.sqlite`
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Exact store path. The bundled file in read-only mode, the writable
    /// file otherwise
    #[arg(long, global = true)]
    pub database_file: Option<PathBuf>,

    /// Exact bundled file copied on first open in read-write mode
    #[arg(long, global = true)]
    pub template: Option<PathBuf>,

    /// Directory of writable stores. Defaults to $XDG_DATA_HOME/litestmt
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory of bundled stores. Defaults to the working directory
    #[arg(long, global = true)]
    pub bundle_dir: Option<PathBuf>,

    /// Busy signals tolerated per step before giving up
    #[arg(long, global = true, default_value_t = DEFAULT_BUSY_RETRIES)]
    pub busy_retries: u32,

    /// SQL script applied when a cache store is created
    #[arg(long, global = true)]
    pub schema_file: Option<PathBuf>,

    /// Activities to trace at debug level: lifecycle, queries, files, all
    #[arg(long, global = true, default_value = "none")]
    pub trace: Trace,

    #[command(subcommand)]
    pub command: Commands,
}

/// Store modes accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
    Cache,
    Memory,
}

/// Available commands for the litestmt CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Execute one statement and report the changed rows
    #[command(alias = "x")]
    Exec {
        /// The statement, with ?N placeholders
        sql: String,
        /// Values for the placeholders: null, integers, reals, x'hex' blobs
        /// or text
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a query and print its rows
    #[command(alias = "q")]
    Query {
        /// The query, with ?N placeholders
        sql: String,
        /// Values for the placeholders
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        /// Print rows as a JSON array of objects
        #[arg(long)]
        json: bool,
    },
    /// Run every statement in a file
    Script {
        /// File holding the statements
        file: PathBuf,
    },
    /// Show the columns of a table
    Columns {
        /// Table name
        table: String,
        /// Print columns as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the DDL of a table, or of the whole database
    Schema {
        /// Table name; all tables when omitted
        table: Option<String>,
    },
    /// Print the SQLite library version
    EngineVersion,
}

impl Args {
    /// Translates the global options into a connection builder.
    pub fn connection_builder(&self) -> Result<ConnectionBuilder> {
        let name = self.name.clone().or_else(|| {
            self.database_file
                .as_ref()
                .and_then(|path| path.file_stem())
                .map(|stem| stem.to_string_lossy().into_owned())
        });
        let name = name.unwrap_or_else(|| "litestmt".to_string());

        let builder = match self.mode {
            Mode::ReadOnly => ConnectionBuilder::read_only(name)
                .with_bundle_dir(self.bundle_dir.as_ref())
                .with_bundled_path(self.database_file.as_ref()),
            Mode::ReadWrite => ConnectionBuilder::read_write(name)
                .with_bundle_dir(self.bundle_dir.as_ref())
                .with_bundled_path(self.template.as_ref())
                .with_data_dir(self.data_dir.as_ref())
                .with_local_path(self.database_file.as_ref()),
            Mode::Cache => {
                let schema = match &self.schema_file {
                    Some(path) => vec![std::fs::read_to_string(path).with_context(|| {
                        format!("Failed to read schema file {}", path.display())
                    })?],
                    None => Vec::new(),
                };
                ConnectionBuilder::cache(name)
                    .with_data_dir(self.data_dir.as_ref())
                    .with_local_path(self.database_file.as_ref())
                    .with_schema(schema)
            }
            Mode::Memory => ConnectionBuilder::memory(),
        };

        Ok(builder
            .with_busy_retries(self.busy_retries)
            .with_trace(self.trace))
    }
}
