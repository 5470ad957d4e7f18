use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use log::{debug, info, warn};
use parquet::arrow::ArrowWriter;

use crate::data::model::Chunk;
use crate::error::{DisaggError, Result};

use super::{ChunkMetadata, DataStore, DEFAULT_KEY_PREFIX};

/// File name of the per-key metadata written by [`ParquetStore::close`].
pub const METADATA_FILE: &str = "metadata.json";

// ---------------------------------------------------------------------------
// ParquetStore – one Parquet file per key under a directory
// ---------------------------------------------------------------------------

/// Writes each key to `<dir>/<key>.parquet` with a millisecond UTC
/// `timestamp` column followed by the chunk's value columns.
///
/// Writers stay open across puts; call [`close`](ParquetStore::close) to
/// finish the files and write [`METADATA_FILE`]. Once closing has started
/// no more puts are accepted.
pub struct ParquetStore {
    dir: PathBuf,
    prefix: String,
    writers: BTreeMap<String, KeyWriter>,
    /// Metadata of finished files; `Some` once closing has started.
    finished: Option<BTreeMap<String, ChunkMetadata>>,
    closed: bool,
}

struct KeyWriter {
    schema: SchemaRef,
    writer: ArrowWriter<File>,
    metadata: ChunkMetadata,
}

impl ParquetStore {
    /// Create the output directory (and parents) if needed.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(ParquetStore {
            dir: dir.to_path_buf(),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            writers: BTreeMap::new(),
            finished: None,
            closed: false,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `key` is written. Keys must stay inside the store directory,
    /// so `..`, `.` and empty segments are rejected.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = key.trim_start_matches('/');
        let plain = !relative.is_empty()
            && relative
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
            && Path::new(relative)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(DisaggError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{relative}.parquet")))
    }

    /// Finish every file and write the metadata index. Later puts fail.
    ///
    /// Every open file is finished even if one fails; the first failure is
    /// returned. A failed index write can be retried by calling `close`
    /// again.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let finished = self.finished.get_or_insert_with(BTreeMap::new);
        let mut first_err: Option<DisaggError> = None;
        for (key, kw) in std::mem::take(&mut self.writers) {
            match kw.writer.close() {
                Ok(_) => {
                    finished.insert(key, kw.metadata);
                }
                Err(e) => {
                    warn!("failed to finish file for {key}: {e}");
                    first_err.get_or_insert(DisaggError::from(e));
                }
            }
        }

        let file = File::create(self.dir.join(METADATA_FILE))?;
        serde_json::to_writer_pretty(file, &*finished)?;
        info!(
            "closed parquet store {} ({} keys)",
            self.dir.display(),
            finished.len()
        );
        self.closed = true;

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn open_writer(&self, key: &str, chunk: &Chunk, metadata: &ChunkMetadata) -> Result<KeyWriter> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut fields = vec![Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        )];
        fields.extend(
            chunk
                .columns
                .iter()
                .map(|c| Field::new(c.name.as_str(), DataType::Float64, true)),
        );
        let schema = Arc::new(Schema::new(fields));

        let writer = ArrowWriter::try_new(File::create(&path)?, schema.clone(), None)?;
        debug!("opened {} for key {key}", path.display());
        Ok(KeyWriter {
            schema,
            writer,
            metadata: metadata.clone(),
        })
    }
}

fn chunk_to_batch(schema: &SchemaRef, chunk: &Chunk) -> Result<RecordBatch> {
    let expected: Vec<&str> = schema.fields().iter().skip(1).map(|f| f.name().as_str()).collect();
    if chunk.column_names() != expected {
        return Err(DisaggError::InvalidChunk(format!(
            "columns {:?} do not match stored columns {:?}",
            chunk.column_names(),
            expected
        )));
    }

    let millis: Vec<i64> = chunk.index.iter().map(|ts| ts.timestamp_millis()).collect();
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(
        TimestampMillisecondArray::from(millis).with_timezone("UTC"),
    )];
    for col in &chunk.columns {
        // NaN readings are stored as nulls.
        let values: Float64Array = col
            .values
            .iter()
            .map(|v| if v.is_nan() { None } else { Some(*v) })
            .collect();
        arrays.push(Arc::new(values));
    }
    Ok(RecordBatch::try_new(schema.clone(), arrays)?)
}

impl DataStore for ParquetStore {
    fn put(&mut self, key: &str, chunk: &Chunk, metadata: &ChunkMetadata) -> Result<()> {
        if self.finished.is_some() {
            return Err(DisaggError::StoreClosed);
        }

        if !self.writers.contains_key(key) {
            let kw = self.open_writer(key, chunk, metadata)?;
            let batch = chunk_to_batch(&kw.schema, chunk)?;
            let kw = self.writers.entry(key.to_string()).or_insert(kw);
            kw.writer.write(&batch)?;
            return Ok(());
        }

        if let Some(kw) = self.writers.get_mut(key) {
            let batch = chunk_to_batch(&kw.schema, chunk)?;
            kw.writer.write(&batch)?;
            kw.metadata.merge(metadata);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.writers.keys().cloned().collect();
        if let Some(finished) = &self.finished {
            keys.extend(finished.keys().cloned());
            keys.sort();
        }
        keys
    }

    fn key_prefix(&self) -> &str {
        &self.prefix
    }
}

impl Drop for ParquetStore {
    fn drop(&mut self) {
        if !self.writers.is_empty() {
            warn!(
                "parquet store {} dropped without close(); {} files are incomplete",
                self.dir.display(),
                self.writers.len()
            );
        } else if self.finished.is_some() && !self.closed {
            warn!(
                "parquet store {} dropped without writing {METADATA_FILE}",
                self.dir.display()
            );
        }
    }
}
