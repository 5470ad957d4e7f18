/// Data layer: chunk types, meters, and file-backed chunk sources.
///
/// Architecture:
/// ```text
///  .csv / .parquet / memory
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  open file → lazy ChunkSource
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │    meter      │  ElecMeter / MeterGroup (site or appliance role)
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  Chunk: timestamp index + named f64 columns
///   └──────────┘
/// ```

pub mod loader;
pub mod meter;
pub mod model;
