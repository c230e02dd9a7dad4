//! Arm joining, coaddition, preprocessing, continuum removal and 2-D
//! embedding of DESI white dwarf spectra.
//!
//! ```text
//!  arm files ──▶ join ──▶ stack ──▶ preprocess ──▶ [continuum] ──▶ embedding
//! ```

pub mod combine;
pub mod config;
pub mod continuum;
pub mod data;
pub mod embedding;
pub mod error;
pub mod join;
pub mod pipeline;
pub mod preprocess;
pub mod stack;

pub use config::PipelineConfig;
pub use continuum::{ContinuumFitter, ContinuumRemover};
pub use embedding::{EmbeddingProjector, Reducer, Tsne};
pub use error::{PipelineError, Result};
pub use join::ArmJoiner;
pub use pipeline::{BatchReport, PipelineContext, SkippedItem};
pub use preprocess::SpectralPreprocessor;
