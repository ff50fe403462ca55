//! Builder for creating and configuring Connection instances.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::OpenFlags;

use super::{Connection, Policy, Trace};
use crate::{
    engine::{Engine, SqliteEngine},
    error::{DatabaseError, Result, ResultExt},
};

/// File extension of every on-disk store.
pub const DATABASE_EXTENSION: &str = "sqlite";

/// How a connection reaches its store, with the resolved paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// Opened straight from the bundled file, never written.
    ReadOnly { bundled: PathBuf },
    /// The bundled file is copied to `local` on first open.
    ReadWrite { bundled: PathBuf, local: PathBuf },
    /// A writable store created on demand from `schema`.
    Cache { local: PathBuf, schema: Vec<String> },
    /// A private transient store.
    Memory,
}

impl OpenMode {
    pub fn bundled_path(&self) -> Option<&Path> {
        match self {
            OpenMode::ReadOnly { bundled } | OpenMode::ReadWrite { bundled, .. } => Some(bundled),
            OpenMode::Cache { .. } | OpenMode::Memory => None,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            OpenMode::ReadWrite { local, .. } | OpenMode::Cache { local, .. } => Some(local),
            OpenMode::ReadOnly { .. } | OpenMode::Memory => None,
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::ReadOnly { bundled } => write!(f, "read-only {}", bundled.display()),
            OpenMode::ReadWrite { local, .. } => write!(f, "read-write {}", local.display()),
            OpenMode::Cache { local, .. } => write!(f, "cache {}", local.display()),
            OpenMode::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeKind {
    ReadOnly,
    ReadWrite,
    Cache,
    Memory,
}

/// Builder for creating and configuring Connection instances.
///
/// ```no_run
/// use litestmt_core::ConnectionBuilder;
///
/// # fn example() -> litestmt_core::Result<()> {
/// let mut connection = ConnectionBuilder::cache("sessions")
///     .with_schema(vec!["CREATE TABLE session (id INTEGER PRIMARY KEY, token TEXT)".into()])
///     .with_busy_retries(10)
///     .build()?;
/// connection.open()?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder {
    kind: ModeKind,
    name: Option<String>,
    bundle_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    bundled_path: Option<PathBuf>,
    local_path: Option<PathBuf>,
    schema: Vec<String>,
    policy: Policy,
    busy_timeout: Option<Duration>,
    open_flags: Option<OpenFlags>,
    engine: Option<Box<dyn Engine>>,
}

impl ConnectionBuilder {
    fn new(kind: ModeKind, name: Option<String>) -> Self {
        Self {
            kind,
            name,
            bundle_dir: None,
            data_dir: None,
            bundled_path: None,
            local_path: None,
            schema: Vec::new(),
            policy: Policy::default(),
            busy_timeout: None,
            open_flags: None,
            engine: None,
        }
    }

    /// A connection that reads the bundled `<name>.sqlite` in place.
    pub fn read_only(name: impl Into<String>) -> Self {
        Self::new(ModeKind::ReadOnly, Some(name.into()))
    }

    /// A connection to a writable copy of the bundled `<name>.sqlite`.
    pub fn read_write(name: impl Into<String>) -> Self {
        Self::new(ModeKind::ReadWrite, Some(name.into()))
    }

    /// A connection to a writable store created on demand.
    pub fn cache(name: impl Into<String>) -> Self {
        Self::new(ModeKind::Cache, Some(name.into()))
    }

    /// A connection to a private transient store.
    pub fn memory() -> Self {
        Self::new(ModeKind::Memory, None)
    }

    /// Sets the logical name, which also names the store file.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Directory holding bundled stores. Defaults to the working directory.
    pub fn with_bundle_dir<P: AsRef<Path>>(mut self, dir: Option<P>) -> Self {
        if let Some(dir) = dir {
            self.bundle_dir = Some(dir.as_ref().to_path_buf());
        }
        self
    }

    /// Directory holding writable stores.
    ///
    /// If not specified, uses XDG Base Directory specification:
    /// `$XDG_DATA_HOME/litestmt/` or `~/.local/share/litestmt/`
    pub fn with_data_dir<P: AsRef<Path>>(mut self, dir: Option<P>) -> Self {
        if let Some(dir) = dir {
            self.data_dir = Some(dir.as_ref().to_path_buf());
        }
        self
    }

    /// Exact bundled file, overriding the bundle directory.
    pub fn with_bundled_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.bundled_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Exact writable file, overriding the data directory.
    pub fn with_local_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.local_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Scripts run in one transaction when a Cache store is created.
    pub fn with_schema(mut self, schema: Vec<String>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_busy_retries(mut self, retries: u32) -> Self {
        self.policy.busy_retries = retries;
        self
    }

    /// How long the engine itself waits on a lock before reporting busy.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Extra open flags. The read/write/create bits always follow the mode.
    pub fn with_open_flags(mut self, flags: OpenFlags) -> Self {
        self.open_flags = Some(flags);
        self
    }

    pub fn with_log_errors(mut self, enabled: bool) -> Self {
        self.policy.log_errors = enabled;
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.policy.trace = trace;
        self
    }

    /// Replaces the SQLite engine.
    pub fn with_engine(mut self, engine: impl Engine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    /// Resolves paths and returns an unopened connection.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Configuration` if a file-backed mode has no
    /// name, or the working directory cannot be resolved.
    /// Returns `DatabaseError::XdgDirectory` if the default data directory
    /// cannot be created.
    pub fn build(self) -> Result<Connection> {
        let name = self.name.clone().unwrap_or_default();
        let mode = match self.kind {
            ModeKind::ReadOnly => OpenMode::ReadOnly {
                bundled: self.resolve_bundled(&name)?,
            },
            ModeKind::ReadWrite => OpenMode::ReadWrite {
                bundled: self.resolve_bundled(&name)?,
                local: self.resolve_local(&name)?,
            },
            ModeKind::Cache => OpenMode::Cache {
                local: self.resolve_local(&name)?,
                schema: self.schema.clone(),
            },
            ModeKind::Memory => OpenMode::Memory,
        };
        let name = if name.is_empty() {
            "memory".to_string()
        } else {
            name
        };

        Ok(Connection::new(
            self.engine.unwrap_or_else(|| Box::new(SqliteEngine)),
            name,
            mode,
            self.policy,
            self.open_flags,
            self.busy_timeout,
        ))
    }

    /// Builds and opens in one step.
    pub fn open(self) -> Result<Connection> {
        let mut connection = self.build()?;
        connection.open()?;
        Ok(connection)
    }

    fn resolve_bundled(&self, name: &str) -> Result<PathBuf> {
        if let Some(path) = &self.bundled_path {
            return Ok(path.clone());
        }
        let file_name = Self::file_name(name)?;
        match &self.bundle_dir {
            Some(dir) => Ok(dir.join(file_name)),
            None => Ok(std::env::current_dir()
                .with_context("Cannot resolve working directory")?
                .join(file_name)),
        }
    }

    fn resolve_local(&self, name: &str) -> Result<PathBuf> {
        if let Some(path) = &self.local_path {
            return Ok(path.clone());
        }
        let file_name = Self::file_name(name)?;
        match &self.data_dir {
            Some(dir) => Ok(dir.join(file_name)),
            None => Self::default_local_path(&file_name),
        }
    }

    fn file_name(name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(DatabaseError::Configuration {
                message: "A database name is required for file-backed connections".to_string(),
            });
        }
        Ok(format!("{name}.{DATABASE_EXTENSION}"))
    }

    /// Returns the default store path following XDG Base Directory
    /// specification.
    fn default_local_path(file_name: &str) -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix("litestmt")
            .place_data_file(file_name)
            .map_err(|e| DatabaseError::XdgDirectory(e.to_string()))
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("bundle_dir", &self.bundle_dir)
            .field("data_dir", &self.data_dir)
            .field("policy", &self.policy)
            .field("custom_engine", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}
