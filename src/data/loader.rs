use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use log::debug;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use crate::config::DataConfig;
use crate::error::{DisaggError, Result};

use super::meter::ChunkSource;
use super::model::{Chunk, Timestamp};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Open a meter file as a lazy chunk source. Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – a timestamp column plus numeric value columns (recommended)
/// * `.csv`     – header row; a timestamp column plus numeric value columns
///
/// Nothing is read until the returned source is iterated.
pub fn open_source(path: &Path, config: &DataConfig) -> Result<Arc<dyn ChunkSource + Send + Sync>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => Ok(Arc::new(ParquetSource::new(path, config))),
        "csv" => Ok(Arc::new(CsvSource::new(path, config))),
        other => Err(DisaggError::UnsupportedFormat(other.to_string())),
    }
}

/// Parse a timestamp cell: RFC 3339, or Unix seconds (integer or fractional).
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    let secs = s.parse::<f64>().ok().filter(|f| f.is_finite())?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

// ---------------------------------------------------------------------------
// CSV source
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names. The index column holds
/// timestamps; every other column is a numeric reading, empty cells are NaN.
///
/// ```text
/// timestamp,power/active
/// 2011-04-18T13:22:00Z,221.3
/// 1303132926,219.8
/// ```
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    index_column: String,
    chunk_size: usize,
}

impl CsvSource {
    pub fn new(path: &Path, config: &DataConfig) -> Self {
        CsvSource {
            path: path.to_path_buf(),
            index_column: config.index_column.clone(),
            chunk_size: config.chunk_size.max(1),
        }
    }

    fn open(&self) -> Result<CsvChunks> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let index_idx = headers
            .iter()
            .position(|h| *h == self.index_column)
            .ok_or_else(|| {
                DisaggError::InvalidChunk(format!(
                    "{}: missing index column '{}'",
                    self.path.display(),
                    self.index_column
                ))
            })?;

        debug!(
            "opened {} ({} value columns, chunk size {})",
            self.path.display(),
            headers.len() - 1,
            self.chunk_size
        );

        Ok(CsvChunks {
            reader,
            headers,
            index_idx,
            chunk_size: self.chunk_size,
            row_no: 0,
            done: false,
        })
    }
}

impl ChunkSource for CsvSource {
    fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_> {
        match self.open() {
            Ok(chunks) => Box::new(chunks),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

struct CsvChunks {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    index_idx: usize,
    chunk_size: usize,
    row_no: usize,
    done: bool,
}

impl CsvChunks {
    fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut record = csv::StringRecord::new();
        let mut index = Vec::with_capacity(self.chunk_size);
        let mut values: Vec<Vec<f64>> =
            vec![Vec::with_capacity(self.chunk_size); self.headers.len()];

        while index.len() < self.chunk_size {
            if !self.reader.read_record(&mut record)? {
                self.done = true;
                break;
            }
            let row = self.row_no;
            self.row_no += 1;

            let cell = record.get(self.index_idx).unwrap_or("");
            let ts = parse_timestamp(cell).ok_or_else(|| {
                DisaggError::invalid_column(
                    self.headers[self.index_idx].as_str(),
                    format!("row {row}: '{cell}' is not a timestamp"),
                )
            })?;
            index.push(ts);

            for (col_idx, column) in values.iter_mut().enumerate() {
                if col_idx == self.index_idx {
                    continue;
                }
                let cell = record.get(col_idx).unwrap_or("").trim();
                let value = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse::<f64>().map_err(|_| {
                        DisaggError::invalid_column(
                            self.headers[col_idx].as_str(),
                            format!("row {row}: '{cell}' is not a number"),
                        )
                    })?
                };
                column.push(value);
            }
        }

        if index.is_empty() {
            return Ok(None);
        }

        let mut chunk = Chunk::new(index);
        for (col_idx, column) in values.into_iter().enumerate() {
            if col_idx == self.index_idx {
                continue;
            }
            chunk.push_column(self.headers[col_idx].clone(), column)?;
        }
        Ok(Some(chunk))
    }
}

impl Iterator for CsvChunks {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parquet source
// ---------------------------------------------------------------------------

/// Parquet meter file, read one record batch per chunk.
///
/// Expected schema:
/// - the index column: `Timestamp(s|ms|us|ns)`, `Int64` Unix seconds, or
///   `Utf8` RFC 3339
/// - any other numeric column (Float64/32, Int64/32) is a reading; nulls
///   become NaN and non-numeric columns are skipped
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
    index_column: String,
    chunk_size: usize,
}

impl ParquetSource {
    pub fn new(path: &Path, config: &DataConfig) -> Self {
        ParquetSource {
            path: path.to_path_buf(),
            index_column: config.index_column.clone(),
            chunk_size: config.chunk_size.max(1),
        }
    }

    fn open(&self) -> Result<ParquetRecordBatchReader> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(self.chunk_size)
            .build()?;
        debug!("opened {} (batch size {})", self.path.display(), self.chunk_size);
        Ok(reader)
    }
}

impl ChunkSource for ParquetSource {
    fn chunks(&self) -> Box<dyn Iterator<Item = Result<Chunk>> + '_> {
        match self.open() {
            Ok(reader) => {
                Box::new(reader.map(move |batch| batch_to_chunk(&batch?, &self.index_column)))
            }
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

fn batch_to_chunk(batch: &RecordBatch, index_column: &str) -> Result<Chunk> {
    let schema = batch.schema();
    let index_idx = schema
        .index_of(index_column)
        .map_err(|_| DisaggError::InvalidChunk(format!("missing index column '{index_column}'")))?;

    let index = extract_index(batch.column(index_idx), index_column)?;
    let mut chunk = Chunk::new(index);

    for (i, field) in schema.fields().iter().enumerate() {
        if i == index_idx {
            continue;
        }
        match extract_values(batch.column(i)) {
            Some(values) => chunk.push_column(field.name().clone(), values)?,
            None => debug!(
                "skipping non-numeric column '{}' ({:?})",
                field.name(),
                field.data_type()
            ),
        }
    }
    Ok(chunk)
}

// -- Arrow helpers --

/// Convert the index column to timestamps. Nulls are rejected.
fn extract_index(col: &ArrayRef, name: &str) -> Result<Vec<Timestamp>> {
    if col.null_count() > 0 {
        return Err(DisaggError::invalid_column(name, "null timestamp in index"));
    }

    let convert: Box<dyn Fn(usize) -> Option<Timestamp> + '_> = match col.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            let arr = col.as_primitive::<TimestampSecondType>();
            Box::new(move |i| DateTime::from_timestamp(arr.value(i), 0))
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let arr = col.as_primitive::<TimestampMillisecondType>();
            Box::new(move |i| DateTime::from_timestamp_millis(arr.value(i)))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let arr = col.as_primitive::<TimestampMicrosecondType>();
            Box::new(move |i| DateTime::from_timestamp_micros(arr.value(i)))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            let arr = col.as_primitive::<TimestampNanosecondType>();
            Box::new(move |i| Some(DateTime::from_timestamp_nanos(arr.value(i))))
        }
        DataType::Int64 => {
            let arr = col.as_primitive::<Int64Type>();
            Box::new(move |i| DateTime::from_timestamp(arr.value(i), 0))
        }
        DataType::Utf8 => {
            let arr = col.as_string::<i32>();
            Box::new(move |i| parse_timestamp(arr.value(i)))
        }
        DataType::LargeUtf8 => {
            let arr = col.as_string::<i64>();
            Box::new(move |i| parse_timestamp(arr.value(i)))
        }
        other => {
            return Err(DisaggError::invalid_column(
                name,
                format!("unsupported index type {other:?}"),
            ))
        }
    };

    (0..col.len())
        .map(|i| {
            convert(i).ok_or_else(|| {
                DisaggError::invalid_column(name, format!("row {i}: timestamp out of range"))
            })
        })
        .collect()
}

/// Numeric column → `Vec<f64>` with nulls as NaN. `None` for non-numeric.
fn extract_values(col: &ArrayRef) -> Option<Vec<f64>> {
    let values = match col.data_type() {
        DataType::Float64 => col
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect(),
        DataType::Float32 => col
            .as_primitive::<Float32Type>()
            .iter()
            .map(|v| v.map_or(f64::NAN, f64::from))
            .collect(),
        DataType::Int64 => col
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map_or(f64::NAN, |x| x as f64))
            .collect(),
        DataType::Int32 => col
            .as_primitive::<Int32Type>()
            .iter()
            .map(|v| v.map_or(f64::NAN, f64::from))
            .collect(),
        _ => return None,
    };
    Some(values)
}
