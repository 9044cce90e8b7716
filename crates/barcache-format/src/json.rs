//! JSON output format.

use barcache_types::Bar;
use std::io::Write;

use crate::{FormatError, Formatter};

/// JSON output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    /// One JSON array.
    #[default]
    Array,
    /// One object per line.
    Ndjson,
}

/// JSON formatter.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    style: JsonStyle,
    pretty: bool,
}

impl JsonFormatter {
    /// Creates an array formatter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            style: JsonStyle::Array,
            pretty: false,
        }
    }

    /// Creates an NDJSON formatter.
    #[must_use]
    pub const fn ndjson() -> Self {
        Self {
            style: JsonStyle::Ndjson,
            pretty: false,
        }
    }

    /// Sets pretty-printing (array style only).
    #[must_use]
    pub const fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Sets the output style.
    #[must_use]
    pub const fn with_style(mut self, style: JsonStyle) -> Self {
        self.style = style;
        self
    }
}

impl Formatter for JsonFormatter {
    fn write_bars<W: Write + Send>(&self, bars: &[Bar], mut writer: W) -> Result<(), FormatError> {
        match self.style {
            JsonStyle::Array if self.pretty => {
                serde_json::to_writer_pretty(&mut writer, bars)?;
                writeln!(writer)?;
            }
            JsonStyle::Array => {
                serde_json::to_writer(&mut writer, bars)?;
                writeln!(writer)?;
            }
            JsonStyle::Ndjson => {
                for bar in bars {
                    serde_json::to_writer(&mut writer, bar)?;
                    writeln!(writer)?;
                }
            }
        }
        Ok(())
    }

    fn extension(&self) -> &str {
        match self.style {
            JsonStyle::Array => "json",
            JsonStyle::Ndjson => "ndjson",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap(),
            187.15,
            188.0,
            186.9,
            187.5,
            12_345.0,
        )
    }

    #[test]
    fn test_json_array_omits_unknown_fields() {
        let mut output = Vec::new();
        JsonFormatter::new().write_bars(&[bar()], &mut output).unwrap();

        let result = String::from_utf8(output).unwrap();
        assert!(result.starts_with('['));
        assert!(result.contains("\"open\":187.15"));
        assert!(!result.contains("vwap"));

        let parsed: Vec<Bar> = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed, vec![bar()]);
    }

    #[test]
    fn test_ndjson() {
        let formatter = JsonFormatter::ndjson();
        let mut output = Vec::new();
        formatter.write_bars(&[bar(), bar()], &mut output).unwrap();

        let result = String::from_utf8(output).unwrap();
        let lines: Vec<_> = result.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with('{')));
        assert_eq!(formatter.extension(), "ndjson");
    }

    #[test]
    fn test_pretty_json() {
        let mut output = Vec::new();
        JsonFormatter::new()
            .with_pretty(true)
            .write_bars(&[bar()], &mut output)
            .unwrap();

        let result = String::from_utf8(output).unwrap();
        assert!(result.contains("\n  "));
    }
}
