use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// DisaggError – every failure the library can surface
// ---------------------------------------------------------------------------

/// Errors raised by disaggregators, meter sources and output stores.
///
/// `Unimplemented` is the only error the [`Disaggregator`] role itself
/// produces: a variant was asked for a capability it never provided.
///
/// [`Disaggregator`]: crate::disaggregate::Disaggregator
#[derive(Debug, Error)]
pub enum DisaggError {
    #[error("capability not implemented: {capability}")]
    Unimplemented { capability: &'static str },

    #[error("model not trained: call train(), train_on_chunk() or import_model() first")]
    NotTrained,

    #[error("model file {path} was exported by '{found}', expected '{expected}'")]
    ModelMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("model file {path} has format version {found}, expected {expected}")]
    ModelVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("meter group is empty")]
    EmptyMeterGroup,

    #[error("meter group is misaligned: meter {meter} ran out of chunks before the others")]
    MeterGroupMisaligned { meter: usize },

    #[error("chunk indexes differ: {left} rows vs {right} rows or different timestamps")]
    IndexMismatch { left: usize, right: usize },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("column '{name}': {reason}")]
    InvalidColumn { name: String, reason: String },

    #[error("unsupported file format: .{0}")]
    UnsupportedFormat(String),

    #[error("store is closed")]
    StoreClosed,

    #[error("store key '{0}' does not name a file inside the store")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl DisaggError {
    pub fn unimplemented(capability: &'static str) -> Self {
        DisaggError::Unimplemented { capability }
    }

    pub fn invalid_column(name: impl Into<String>, reason: impl Into<String>) -> Self {
        DisaggError::InvalidColumn {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is the base role's "capability not provided" signal.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, DisaggError::Unimplemented { .. })
    }
}

/// Result type for disaggregation operations.
pub type Result<T> = std::result::Result<T, DisaggError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unimplemented_display() {
        let err = DisaggError::unimplemented("train_on_chunk");
        assert_eq!(err.to_string(), "capability not implemented: train_on_chunk");
        assert!(err.is_unimplemented());
    }

    #[test]
    fn test_not_trained_is_not_unimplemented() {
        assert!(!DisaggError::NotTrained.is_unimplemented());
    }

    #[test]
    fn test_model_mismatch_display() {
        let err = DisaggError::ModelMismatch {
            path: PathBuf::from("model.json"),
            expected: "mean_share".to_string(),
            found: "other".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "model file model.json was exported by 'other', expected 'mean_share'"
        );
    }

    #[test]
    fn test_invalid_column_display() {
        let err = DisaggError::invalid_column("power/active", "expected 3 values, got 2");
        assert_eq!(
            err.to_string(),
            "column 'power/active': expected 3 values, got 2"
        );
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<()> {
            std::fs::File::open("/definitely/not/here")?;
            Ok(())
        }
        assert!(matches!(open(), Err(DisaggError::Io(_))));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DisaggError>();
    }
}
