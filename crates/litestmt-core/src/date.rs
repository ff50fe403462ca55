//! Textual and numeric date encodings found in stored columns.

use std::fmt;

use jiff::{civil::Date, Timestamp};

use crate::error::{DatabaseError, Result};

/// Layout of a date stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateFormat {
    /// `CCYYMMDD`, e.g. `20090913`
    Compact,
    /// `CCYY-MM-DD`, e.g. `2009-09-13`
    Dashed,
    /// `CCYY/MM/DD`, e.g. `2009/09/13`
    Slashed,
}

impl DateFormat {
    /// Human-readable layout, used in error messages.
    pub fn layout(self) -> &'static str {
        match self {
            DateFormat::Compact => "CCYYMMDD",
            DateFormat::Dashed => "CCYY-MM-DD",
            DateFormat::Slashed => "CCYY/MM/DD",
        }
    }

    fn strptime_format(self) -> &'static str {
        match self {
            DateFormat::Compact => "%Y%m%d",
            DateFormat::Dashed => "%Y-%m-%d",
            DateFormat::Slashed => "%Y/%m/%d",
        }
    }

    fn expected_len(self) -> usize {
        match self {
            DateFormat::Compact => 8,
            DateFormat::Dashed | DateFormat::Slashed => 10,
        }
    }

    /// Parses `text` in this layout.
    ///
    /// Surrounding whitespace is ignored. Anything else that is not exactly
    /// the layout, including impossible calendar days, is an
    /// [`DatabaseError::InvalidDate`].
    pub fn parse(self, text: &str) -> Result<Date> {
        let trimmed = text.trim();
        let invalid = || DatabaseError::InvalidDate {
            value: text.to_string(),
            format: self.layout(),
        };

        // %Y accepts signed and short years; the stored layouts never do.
        if trimmed.len() != self.expected_len() || !trimmed.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        Date::strptime(self.strptime_format(), trimmed).map_err(|_| invalid())
    }

    /// Formats `date` in this layout.
    pub fn format(self, date: Date) -> String {
        date.strftime(self.strptime_format()).to_string()
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.layout())
    }
}

/// Converts fractional seconds since the Unix epoch into a timestamp.
pub(crate) fn timestamp_from_epoch_seconds(seconds: f64) -> Result<Timestamp> {
    let out_of_range = || DatabaseError::InvalidDate {
        value: seconds.to_string(),
        format: "seconds since 1970-01-01",
    };

    if !seconds.is_finite() {
        return Err(out_of_range());
    }

    let nanos = (seconds * 1_000_000_000.0).round();
    if nanos.abs() >= i128::MAX as f64 {
        return Err(out_of_range());
    }

    Timestamp::from_nanosecond(nanos as i128).map_err(|_| out_of_range())
}
