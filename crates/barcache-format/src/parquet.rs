//! Apache Parquet output format.

use arrow::array::{Float64Array, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use barcache_types::Bar;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::sync::Arc;

use crate::{FormatError, Formatter};

/// Parquet formatter.
#[derive(Debug, Clone)]
pub struct ParquetFormatter {
    row_group_size: usize,
    compression: Compression,
}

impl Default for ParquetFormatter {
    fn default() -> Self {
        Self {
            row_group_size: 100_000,
            compression: Compression::SNAPPY,
        }
    }
}

impl ParquetFormatter {
    /// Creates a Snappy-compressed formatter with 100k-row groups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rows per row group.
    #[must_use]
    pub const fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size;
        self
    }

    /// Sets the compression codec.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("open", DataType::Float64, false),
            Field::new("high", DataType::Float64, false),
            Field::new("low", DataType::Float64, false),
            Field::new("close", DataType::Float64, false),
            Field::new("volume", DataType::Float64, false),
            Field::new("vwap", DataType::Float64, true),
            Field::new("trade_count", DataType::UInt64, true),
        ]))
    }

    fn to_batch(schema: &SchemaRef, bars: &[Bar]) -> Result<RecordBatch, FormatError> {
        let column = |f: fn(&Bar) -> f64| Arc::new(Float64Array::from_iter_values(bars.iter().map(f)));
        let timestamps = TimestampMicrosecondArray::from_iter_values(
            bars.iter().map(|b| b.timestamp.timestamp_micros()),
        )
        .with_timezone("UTC");

        RecordBatch::try_new(
            Arc::clone(schema),
            vec![
                Arc::new(timestamps),
                column(|b| b.open),
                column(|b| b.high),
                column(|b| b.low),
                column(|b| b.close),
                column(|b| b.volume),
                Arc::new(bars.iter().map(|b| b.vwap).collect::<Float64Array>()),
                Arc::new(bars.iter().map(|b| b.trade_count).collect::<UInt64Array>()),
            ],
        )
        .map_err(|e| FormatError::Parquet(e.to_string()))
    }
}

impl Formatter for ParquetFormatter {
    fn write_bars<W: Write + Send>(&self, bars: &[Bar], writer: W) -> Result<(), FormatError> {
        let schema = Self::schema();
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut arrow_writer = ArrowWriter::try_new(writer, Arc::clone(&schema), Some(props))
            .map_err(|e| FormatError::Parquet(e.to_string()))?;

        for chunk in bars.chunks(self.row_group_size.max(1)) {
            let batch = Self::to_batch(&schema, chunk)?;
            arrow_writer
                .write(&batch)
                .map_err(|e| FormatError::Parquet(e.to_string()))?;
        }

        arrow_writer
            .close()
            .map_err(|e| FormatError::Parquet(e.to_string()))?;
        Ok(())
    }

    fn extension(&self) -> &str {
        "parquet"
    }
}
