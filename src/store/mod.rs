//! Output stores for disaggregated chunks.
//!
//! A store receives one single-appliance chunk at a time together with its
//! [`ChunkMetadata`]. Putting to an existing key appends.

pub mod parquet_store;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data::model::{ApplianceId, Chunk, Measurement, Timestamp};
use crate::error::Result;

pub use self::parquet_store::ParquetStore;

/// Key prefix used when a store is not told otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "/elec";

/// `"/elec"` + `fridge_1` → `"/elec/fridge_1"`.
pub fn appliance_key(prefix: &str, appliance: &ApplianceId) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), appliance)
}

/// Describes one disaggregated appliance chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub appliance: ApplianceId,
    /// Name of the disaggregator that produced the estimate.
    pub model: String,
    pub measurement: Measurement,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub rows: usize,
}

impl ChunkMetadata {
    pub fn for_chunk(appliance: ApplianceId, model: &str, chunk: &Chunk) -> Self {
        ChunkMetadata {
            appliance,
            model: model.to_string(),
            measurement: Measurement::ACTIVE_POWER,
            start: chunk.first_timestamp(),
            end: chunk.last_timestamp(),
            rows: chunk.len(),
        }
    }

    /// Widen this metadata to also cover `other` (same key, later chunk).
    pub fn merge(&mut self, other: &ChunkMetadata) {
        self.start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.rows += other.rows;
    }
}

/// Sink for disaggregated appliance chunks. Not owned by the disaggregator.
pub trait DataStore {
    /// Append `chunk` under `key`.
    fn put(&mut self, key: &str, chunk: &Chunk, metadata: &ChunkMetadata) -> Result<()>;

    /// Every key written so far, sorted.
    fn keys(&self) -> Vec<String>;

    fn key_prefix(&self) -> &str {
        DEFAULT_KEY_PREFIX
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Keeps every put in memory, in order. Handy for tests and for callers that
/// post-process results themselves.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    prefix: String,
    entries: Vec<(String, Chunk, ChunkMetadata)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_KEY_PREFIX)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        MemoryStore {
            prefix: prefix.into(),
            entries: Vec::new(),
        }
    }

    /// All puts in the order they happened.
    pub fn entries(&self) -> &[(String, Chunk, ChunkMetadata)] {
        &self.entries
    }

    /// Chunks put under `key`, oldest first.
    pub fn chunks(&self, key: &str) -> Vec<&Chunk> {
        self.entries
            .iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, c, _)| c)
            .collect()
    }

    /// Metadata covering every chunk put under `key`.
    pub fn metadata(&self, key: &str) -> Option<ChunkMetadata> {
        let mut iter = self.entries.iter().filter(|(k, _, _)| k == key);
        let (_, _, first) = iter.next()?;
        let mut merged = first.clone();
        for (_, _, meta) in iter {
            merged.merge(meta);
        }
        Some(merged)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DataStore for MemoryStore {
    fn put(&mut self, key: &str, chunk: &Chunk, metadata: &ChunkMetadata) -> Result<()> {
        self.entries
            .push((key.to_string(), chunk.clone(), metadata.clone()));
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, _, _)| k.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn key_prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn chunk(start: i64, n: usize) -> Chunk {
        let index = (0..n)
            .map(|i| Utc.timestamp_opt(start + i as i64, 0).unwrap())
            .collect();
        Chunk::new(index)
            .with_column("power/active", vec![1.0; n])
            .unwrap()
    }

    #[test]
    fn test_appliance_key() {
        let id = ApplianceId::new("fridge", 1);
        assert_eq!(appliance_key("/elec", &id), "/elec/fridge_1");
        assert_eq!(appliance_key("/building1/elec/", &id), "/building1/elec/fridge_1");
    }

    #[test]
    fn test_metadata_merge_widens_range() {
        let id = ApplianceId::new("kettle", 1);
        let mut a = ChunkMetadata::for_chunk(id.clone(), "m", &chunk(100, 3));
        let b = ChunkMetadata::for_chunk(id, "m", &chunk(10, 2));
        a.merge(&b);
        assert_eq!(a.start, Some(Utc.timestamp_opt(10, 0).unwrap()));
        assert_eq!(a.end, Some(Utc.timestamp_opt(102, 0).unwrap()));
        assert_eq!(a.rows, 5);
    }

    #[test]
    fn test_memory_store_appends_per_key() {
        let mut store = MemoryStore::new();
        let id = ApplianceId::new("fridge", 1);
        for start in [0, 10] {
            let c = chunk(start, 2);
            let meta = ChunkMetadata::for_chunk(id.clone(), "m", &c);
            store.put("/elec/fridge_1", &c, &meta).unwrap();
        }
        let kettle = chunk(0, 1);
        let meta = ChunkMetadata::for_chunk(ApplianceId::new("kettle", 1), "m", &kettle);
        store.put("/elec/kettle_1", &kettle, &meta).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.keys(), vec!["/elec/fridge_1", "/elec/kettle_1"]);
        assert_eq!(store.chunks("/elec/fridge_1").len(), 2);
        assert_eq!(store.metadata("/elec/fridge_1").unwrap().rows, 4);
        assert!(store.metadata("/elec/none_1").is_none());
    }
}
