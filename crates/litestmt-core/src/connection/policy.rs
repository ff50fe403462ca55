//! Execution settings shared by a connection and every statement it creates.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Busy signals a step tolerates before giving up, unless configured.
pub const DEFAULT_BUSY_RETRIES: u32 = 5;

/// Which activities are traced through the `log` facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Trace(u8);

impl Trace {
    /// Nothing is traced.
    pub const NONE: Trace = Trace(0);
    /// Open, close, prepare and finalize.
    pub const LIFECYCLE: Trace = Trace(1 << 1);
    /// The SQL of every execution.
    pub const QUERIES: Trace = Trace(1 << 2);
    /// Template copies and store creation.
    pub const FILE_OPERATIONS: Trace = Trace(1 << 3);
    /// Everything above.
    pub const ALL: Trace = Trace(Self::LIFECYCLE.0 | Self::QUERIES.0 | Self::FILE_OPERATIONS.0);

    /// True when every flag in `other` is set.
    pub fn contains(self, other: Trace) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True when no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Trace {
    type Output = Trace;

    fn bitor(self, rhs: Trace) -> Trace {
        Trace(self.0 | rhs.0)
    }
}

impl FromStr for Trace {
    type Err = String;

    /// Parses a comma-separated list such as `lifecycle,queries`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Trace::NONE, |acc, part| {
                let flag = match part.to_lowercase().as_str() {
                    "none" => Trace::NONE,
                    "lifecycle" | "life" => Trace::LIFECYCLE,
                    "queries" | "query" => Trace::QUERIES,
                    "files" | "file" => Trace::FILE_OPERATIONS,
                    "all" => Trace::ALL,
                    _ => return Err(format!("Invalid trace flag: {part}")),
                };
                Ok(acc | flag)
            })
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (Trace::LIFECYCLE, "lifecycle"),
            (Trace::QUERIES, "queries"),
            (Trace::FILE_OPERATIONS, "files"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(","))
    }
}

/// Settings read by statements at the moment they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Busy signals a single step tolerates; reaching this count fails.
    pub busy_retries: u32,
    /// Log failed engine calls at error level.
    pub log_errors: bool,
    /// Activities traced at debug/info level.
    pub trace: Trace,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            busy_retries: DEFAULT_BUSY_RETRIES,
            log_errors: true,
            trace: Trace::NONE,
        }
    }
}
