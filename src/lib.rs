//! Energy disaggregation for non-intrusive load monitoring (NILM).
//!
//! A [`Disaggregator`] learns from metered electricity data and splits
//! aggregate site readings ("mains") into per-appliance estimates:
//!
//! ```text
//!  MeterGroup ──train()──▶ Disaggregator ◀──import_model()── model.json
//!                              │
//!  mains chunks ──disaggregate_chunk()──▶ per-appliance chunk
//!                              │
//!                 write_disaggregated_chunk_to_store()
//!                              ▼
//!                          DataStore
//! ```
//!
//! Meter data is always handled in bounded [`Chunk`]s pulled lazily from a
//! [`ChunkSource`], so streams never need to fit in memory.

pub mod config;
pub mod data;
pub mod disaggregate;
pub mod error;
pub mod store;

pub use data::meter::{ChunkSource, ElecMeter, InMemorySource, MeterGroup, MeterRole};
pub use data::model::{ApplianceId, Chunk, Column, Measurement, Timestamp};
pub use disaggregate::{Disaggregator, MeanShare, ModelState, TrainingTarget};
pub use error::{DisaggError, Result};
pub use store::{ChunkMetadata, DataStore, MemoryStore, ParquetStore};
