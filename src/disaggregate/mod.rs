//! The disaggregator role.
//!
//! A disaggregator learns from metered data and then splits aggregate
//! ("mains") readings into per-appliance estimates, one chunk at a time.
//! Concrete variants usually implement just [`Disaggregator::train_on_chunk`]
//! and [`Disaggregator::disaggregate_chunk`]; training over a whole
//! [`MeterGroup`] and disaggregating a whole mains stream are provided on top
//! of those two.

pub mod mean_share;
pub mod state;

use std::fmt;
use std::path::Path;

use log::{debug, info};

use crate::data::meter::{ChunkSource, MeterGroup, MeterRole};
use crate::data::model::{ApplianceId, Chunk, Measurement};
use crate::error::{DisaggError, Result};
use crate::store::{appliance_key, ChunkMetadata, DataStore};

pub use self::mean_share::MeanShare;
pub use self::state::ModelState;

/// Which meter a training chunk came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingTarget {
    /// Whole-site readings (unsupervised learning).
    Site,
    /// Readings of one appliance (supervised learning).
    Appliance(ApplianceId),
}

impl From<&MeterRole> for TrainingTarget {
    fn from(role: &MeterRole) -> Self {
        match role {
            MeterRole::Site => TrainingTarget::Site,
            MeterRole::Appliance(id) => TrainingTarget::Appliance(id.clone()),
        }
    }
}

impl fmt::Display for TrainingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingTarget::Site => write!(f, "site"),
            TrainingTarget::Appliance(id) => write!(f, "{id}"),
        }
    }
}

/// Common interface of every disaggregation algorithm.
///
/// Each variant owns its learned model. Until it has been trained (or a
/// model imported) it must refuse to disaggregate; [`ModelState`] gives
/// variants that guard for free.
///
/// Capabilities a variant does not provide report
/// [`DisaggError::Unimplemented`].
pub trait Disaggregator {
    /// Short identifier, recorded in output metadata and model files.
    fn name(&self) -> &str;

    /// Train on every meter of `meters`, chunk by chunk.
    ///
    /// Each chunk is handed to [`train_on_chunk`](Self::train_on_chunk)
    /// tagged with the meter's role, so appliance meters train supervised
    /// and site meters unsupervised.
    fn train(&mut self, meters: &MeterGroup) -> Result<()> {
        if meters.is_empty() {
            return Err(DisaggError::EmptyMeterGroup);
        }
        for meter in meters.iter() {
            let target = TrainingTarget::from(&meter.role);
            let mut n_chunks = 0usize;
            for chunk in meter.chunks() {
                self.train_on_chunk(&chunk?, &target)?;
                n_chunks += 1;
            }
            debug!("{}: trained on {n_chunks} chunks from {target}", self.name());
        }
        info!("{}: trained on {} meters", self.name(), meters.len());
        Ok(())
    }

    /// Incremental training on one bounded chunk.
    fn train_on_chunk(&mut self, _chunk: &Chunk, _target: &TrainingTarget) -> Result<()> {
        Err(DisaggError::unimplemented("train_on_chunk"))
    }

    /// Estimate per-appliance readings for one chunk of mains.
    ///
    /// The result shares the mains index and has one column per appliance,
    /// named after its [`ApplianceId`]. Must be callable repeatedly over
    /// successive chunks of the same stream.
    fn disaggregate_chunk(&self, _mains: &Chunk) -> Result<Chunk> {
        Err(DisaggError::unimplemented("disaggregate_chunk"))
    }

    /// Disaggregate a whole mains stream into `store`.
    ///
    /// Chunks are pulled lazily; each non-empty result goes to
    /// [`write_disaggregated_chunk_to_store`](Self::write_disaggregated_chunk_to_store)
    /// in stream order. The first error stops the run; chunks already
    /// written stay written.
    fn disaggregate(&self, mains: &dyn ChunkSource, store: &mut dyn DataStore) -> Result<()> {
        let mut n_chunks = 0usize;
        let mut n_written = 0usize;
        for chunk in mains.chunks() {
            let chunk = chunk?;
            n_chunks += 1;
            let estimate = self.disaggregate_chunk(&chunk)?;
            if estimate.is_empty() {
                debug!("{}: chunk {n_chunks} produced no estimate, skipping", self.name());
                continue;
            }
            self.write_disaggregated_chunk_to_store(&estimate, store)?;
            n_written += 1;
        }
        info!(
            "{}: disaggregated {n_chunks} chunks, wrote {n_written}",
            self.name()
        );
        Ok(())
    }

    /// Persist one disaggregated chunk, one key per appliance column.
    fn write_disaggregated_chunk_to_store(
        &self,
        chunk: &Chunk,
        store: &mut dyn DataStore,
    ) -> Result<()> {
        // Every column must name an appliance before anything is written.
        let appliances = chunk
            .columns
            .iter()
            .map(|col| col.name.parse::<ApplianceId>())
            .collect::<Result<Vec<_>>>()?;

        let measurement = Measurement::ACTIVE_POWER.to_string();
        for (appliance, col) in appliances.into_iter().zip(&chunk.columns) {
            let key = appliance_key(store.key_prefix(), &appliance);
            let single = Chunk::new(chunk.index.clone())
                .with_column(measurement.as_str(), col.values.clone())?;
            let metadata = ChunkMetadata::for_chunk(appliance, self.name(), &single);
            store.put(&key, &single, &metadata)?;
        }
        Ok(())
    }

    /// Load a learned model from `path`.
    fn import_model(&mut self, _path: &Path) -> Result<()> {
        Err(DisaggError::unimplemented("import_model"))
    }

    /// Save the learned model to `path`.
    fn export_model(&self, _path: &Path) -> Result<()> {
        Err(DisaggError::unimplemented("export_model"))
    }
}
