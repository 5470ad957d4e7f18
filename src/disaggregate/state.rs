use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DisaggError, Result};

/// Version written into every model file.
pub const MODEL_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// ModelState – untrained until trained or imported
// ---------------------------------------------------------------------------

/// A variant's learned model, tagged with whether it exists yet.
///
/// Reading the model through [`trained`](ModelState::trained) is the guard
/// that keeps an untrained disaggregator from producing output.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelState<M> {
    Untrained,
    Trained(M),
}

impl<M> Default for ModelState<M> {
    fn default() -> Self {
        ModelState::Untrained
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, M> {
    variant: &'a str,
    format_version: u32,
    model: &'a M,
}

#[derive(Deserialize)]
struct Envelope<M> {
    variant: String,
    format_version: u32,
    model: M,
}

impl<M> ModelState<M> {
    pub fn is_trained(&self) -> bool {
        matches!(self, ModelState::Trained(_))
    }

    pub fn trained(&self) -> Result<&M> {
        match self {
            ModelState::Trained(m) => Ok(m),
            ModelState::Untrained => Err(DisaggError::NotTrained),
        }
    }

    pub fn trained_mut(&mut self) -> Result<&mut M> {
        match self {
            ModelState::Trained(m) => Ok(m),
            ModelState::Untrained => Err(DisaggError::NotTrained),
        }
    }

    /// The model, creating it with `init` first if untrained.
    pub fn get_or_insert_with(&mut self, init: impl FnOnce() -> M) -> Result<&mut M> {
        if let ModelState::Untrained = self {
            *self = ModelState::Trained(init());
        }
        self.trained_mut()
    }

    /// Forget the model.
    pub fn reset(&mut self) {
        *self = ModelState::Untrained;
    }
}

impl<M: Serialize> ModelState<M> {
    /// Write the model as JSON, tagged with `variant` and the format version.
    pub fn save(&self, path: &Path, variant: &str) -> Result<()> {
        let model = self.trained()?;
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(
            &mut writer,
            &EnvelopeRef {
                variant,
                format_version: MODEL_FORMAT_VERSION,
                model,
            },
        )?;
        writer.flush()?;
        info!("{variant}: exported model to {}", path.display());
        Ok(())
    }
}

impl<M: DeserializeOwned> ModelState<M> {
    /// Replace the state with the model stored at `path`.
    ///
    /// The file must have been written by the same `variant`. On any error
    /// the current state is left untouched.
    pub fn load(&mut self, path: &Path, variant: &str) -> Result<()> {
        let reader = BufReader::new(File::open(path)?);
        let envelope: Envelope<M> = serde_json::from_reader(reader)?;

        if envelope.variant != variant {
            return Err(DisaggError::ModelMismatch {
                path: path.to_path_buf(),
                expected: variant.to_string(),
                found: envelope.variant,
            });
        }
        if envelope.format_version != MODEL_FORMAT_VERSION {
            return Err(DisaggError::ModelVersion {
                path: path.to_path_buf(),
                expected: MODEL_FORMAT_VERSION,
                found: envelope.format_version,
            });
        }

        *self = ModelState::Trained(envelope.model);
        info!("{variant}: imported model from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counts {
        seen: u64,
    }

    #[test]
    fn test_untrained_guard() {
        let state: ModelState<Counts> = ModelState::default();
        assert!(!state.is_trained());
        assert!(matches!(state.trained(), Err(DisaggError::NotTrained)));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut state = ModelState::default();
        state.get_or_insert_with(|| Counts { seen: 0 }).unwrap().seen += 2;
        state.get_or_insert_with(|| Counts { seen: 100 }).unwrap().seen += 3;
        assert_eq!(state.trained().unwrap().seen, 5);
        state.reset();
        assert!(!state.is_trained());
        assert!(matches!(state.trained_mut(), Err(DisaggError::NotTrained)));
    }

    #[test]
    fn test_save_untrained_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state: ModelState<Counts> = ModelState::Untrained;
        assert!(matches!(
            state.save(&dir.path().join("m.json"), "counts"),
            Err(DisaggError::NotTrained)
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        ModelState::Trained(Counts { seen: 7 }).save(&path, "counts").unwrap();

        let mut fresh: ModelState<Counts> = ModelState::Untrained;
        fresh.load(&path, "counts").unwrap();
        assert_eq!(fresh, ModelState::Trained(Counts { seen: 7 }));
    }

    #[test]
    fn test_load_wrong_variant_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        ModelState::Trained(Counts { seen: 7 }).save(&path, "counts").unwrap();

        let mut state = ModelState::Trained(Counts { seen: 1 });
        let err = state.load(&path, "other").unwrap_err();
        assert!(matches!(err, DisaggError::ModelMismatch { .. }));
        assert_eq!(state.trained().unwrap().seen, 1);
    }

    #[test]
    fn test_load_wrong_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(
            &path,
            r#"{"variant":"counts","format_version":99,"model":{"seen":1}}"#,
        )
        .unwrap();
        let mut state: ModelState<Counts> = ModelState::Untrained;
        assert!(matches!(
            state.load(&path, "counts"),
            Err(DisaggError::ModelVersion { found: 99, .. })
        ));
        assert!(!state.is_trained());
    }

    #[test]
    fn test_load_missing_file() {
        let mut state: ModelState<Counts> = ModelState::Untrained;
        assert!(matches!(
            state.load(Path::new("/no/such/model.json"), "counts"),
            Err(DisaggError::Io(_))
        ));
    }
}
