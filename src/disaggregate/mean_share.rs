use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::model::Chunk;
use crate::error::Result;

use super::state::ModelState;
use super::{Disaggregator, TrainingTarget};

/// Streaming mean of the finite readings seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningMean {
    pub sum: f64,
    pub count: u64,
}

impl RunningMean {
    pub fn update(&mut self, values: &[f64]) {
        for v in values.iter().filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    /// 0 when nothing has been seen.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Learned state of [`MeanShare`]: mean power per appliance, keyed by the
/// appliance's textual id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanShareModel {
    pub appliances: BTreeMap<String, RunningMean>,
}

impl MeanShareModel {
    /// Fraction of mains attributed to each appliance. All zero when no
    /// appliance ever drew power.
    pub fn shares(&self) -> BTreeMap<&str, f64> {
        let total: f64 = self.appliances.values().map(RunningMean::mean).sum();
        self.appliances
            .iter()
            .map(|(name, rm)| {
                let share = if total > 0.0 { rm.mean() / total } else { 0.0 };
                (name.as_str(), share)
            })
            .collect()
    }
}

/// Baseline supervised disaggregator.
///
/// Training records each appliance's mean power. Every mains reading is then
/// split between appliances in proportion to those means, clamped at zero.
/// Site-meter chunks carry no per-appliance signal and are ignored.
#[derive(Debug, Clone, Default)]
pub struct MeanShare {
    state: ModelState<MeanShareModel>,
}

impl MeanShare {
    pub const NAME: &'static str = "mean_share";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> Result<&MeanShareModel> {
        self.state.trained()
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_trained()
    }
}

impl Disaggregator for MeanShare {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train_on_chunk(&mut self, chunk: &Chunk, target: &TrainingTarget) -> Result<()> {
        let appliance = match target {
            TrainingTarget::Appliance(id) => id,
            TrainingTarget::Site => {
                debug!("{}: ignoring site chunk of {} rows", Self::NAME, chunk.len());
                return Ok(());
            }
        };
        let Some(power) = chunk.power_column() else {
            debug!("{}: chunk for {appliance} has no columns", Self::NAME);
            return Ok(());
        };

        self.state
            .get_or_insert_with(MeanShareModel::default)?
            .appliances
            .entry(appliance.to_string())
            .or_default()
            .update(&power.values);
        Ok(())
    }

    fn disaggregate_chunk(&self, mains: &Chunk) -> Result<Chunk> {
        let model = self.state.trained()?;
        let mut out = Chunk::new(mains.index.clone());
        let Some(power) = mains.power_column() else {
            return Ok(out);
        };

        for (name, share) in model.shares() {
            let values = power
                .values
                .iter()
                .map(|v| if v.is_nan() { f64::NAN } else { (v * share).max(0.0) })
                .collect();
            out.push_column(name, values)?;
        }
        Ok(out)
    }

    fn import_model(&mut self, path: &Path) -> Result<()> {
        self.state.load(path, Self::NAME)
    }

    fn export_model(&self, path: &Path) -> Result<()> {
        self.state.save(path, Self::NAME)
    }
}
