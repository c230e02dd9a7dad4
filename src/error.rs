use thiserror::Error;

use crate::data::model::Arm;

// ---------------------------------------------------------------------------
// Pipeline error taxonomy
// ---------------------------------------------------------------------------

/// Errors raised by the pipeline stages.
///
/// Malformed-input variants are fatal for the exposure or source they
/// concern and are turned into [`crate::pipeline::SkippedItem`]s by the
/// stage drivers; they never abort a whole batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("{arm} arm has {found} bins, expected {expected}")]
    ArmLength {
        arm: Arm,
        expected: usize,
        found: usize,
    },

    #[error("{arm} arm reading is missing")]
    MissingArm { arm: Arm },

    #[error("{arm} arm reading is duplicated")]
    DuplicateArm { arm: Arm },

    #[error("{arm} arm reading belongs to exposure {found}, expected {expected}")]
    ExposureMismatch {
        arm: Arm,
        expected: String,
        found: String,
    },

    #[error("source '{0}' not found in the classification lookup")]
    UnknownSource(String),

    #[error("source '{name}' has conflicting labels: {labels:?}")]
    LabelConflict { name: String, labels: Vec<String> },

    #[error("no valid exposures to combine")]
    NoValidExposures,

    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("dimensionality reduction failed: {0}")]
    Reduction(String),

    #[error("continuum fit failed: {0}")]
    Continuum(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Check that `found` matches `expected`, naming the call site on failure.
    pub(crate) fn check_len(context: &'static str, expected: usize, found: usize) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(PipelineError::ShapeMismatch {
                context,
                expected,
                found,
            })
        }
    }
}
