//! CSV output format.

use barcache_types::Bar;
use std::io::Write;

use crate::{FormatError, Formatter};

/// CSV formatter.
#[derive(Debug, Clone)]
pub struct CsvFormatter {
    delimiter: char,
    include_header: bool,
}

impl Default for CsvFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvFormatter {
    /// Creates a comma-separated formatter with a header row.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            delimiter: ',',
            include_header: true,
        }
    }

    /// Sets the field delimiter.
    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets whether to write a header row.
    #[must_use]
    pub const fn with_header(mut self, include: bool) -> Self {
        self.include_header = include;
        self
    }

    /// Creates a tab-separated formatter.
    #[must_use]
    pub const fn tsv() -> Self {
        Self::new().with_delimiter('\t')
    }
}

impl Formatter for CsvFormatter {
    fn write_bars<W: Write + Send>(&self, bars: &[Bar], mut writer: W) -> Result<(), FormatError> {
        let d = self.delimiter;

        if self.include_header {
            writeln!(
                writer,
                "timestamp{d}open{d}high{d}low{d}close{d}volume{d}vwap{d}trade_count"
            )?;
        }

        for bar in bars {
            let vwap = bar.vwap.map(|v| v.to_string()).unwrap_or_default();
            let trades = bar.trade_count.map(|n| n.to_string()).unwrap_or_default();
            writeln!(
                writer,
                "{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{vwap}{d}{trades}",
                bar.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
            )?;
        }

        Ok(())
    }

    fn extension(&self) -> &str {
        if self.delimiter == '\t' { "tsv" } else { "csv" }
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
    fn test_csv_bars() {
        let mut output = Vec::new();
        CsvFormatter::new()
            .write_bars(&[bar(), bar().with_vwap(187.4).with_trade_count(812)], &mut output)
            .unwrap();

        let result = String::from_utf8(output).unwrap();
        let lines: Vec<_> = result.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,open,high,low,close,volume,vwap,trade_count"
        );
        assert_eq!(lines[1], "2024-01-15T14:30:00Z,187.15,188,186.9,187.5,12345,,");
        assert!(lines[2].ends_with(",187.4,812"));
    }

    #[test]
    fn test_csv_no_header() {
        let mut output = Vec::new();
        CsvFormatter::new()
            .with_header(false)
            .write_bars(&[bar()], &mut output)
            .unwrap();

        let result = String::from_utf8(output).unwrap();
        assert!(!result.contains("timestamp"));
        assert_eq!(result.lines().count(), 1);
    }

    #[test]
    fn test_tsv() {
        let formatter = CsvFormatter::tsv();
        let mut output = Vec::new();
        formatter.write_bars(&[bar()], &mut output).unwrap();

        assert!(String::from_utf8(output).unwrap().contains("timestamp\topen\thigh"));
        assert_eq!(formatter.extension(), "tsv");
    }
}
