//! litestmt CLI Application
//!
//! Command-line interface for running statements and queries against SQLite
//! stores opened in any of the four connection modes.

mod args;
mod cli;
mod renderer;

use anyhow::{Context, Result};
use args::{Args, Commands};
use clap::Parser;
use cli::Cli;
use log::info;
use Commands::*;

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut connection = args
        .connection_builder()?
        .build()
        .context("Failed to configure connection")?;

    if let EngineVersion = args.command {
        println!("{}", connection.engine_version());
        return Ok(());
    }

    connection
        .open()
        .with_context(|| format!("Failed to open {}", connection.mode()))?;
    info!("litestmt started on {}", connection.mode());

    let cli = Cli::new(connection);
    match args.command {
        Exec { sql, args: values } => cli.exec(&sql, &values),
        Query { sql, args: values, json } => cli.query(&sql, &values, json),
        Script { file } => cli.script(&file),
        Columns { table, json } => cli.columns(&table, json),
        Schema { table } => cli.schema(table.as_deref()),
        EngineVersion => Ok(()),
    }
}
