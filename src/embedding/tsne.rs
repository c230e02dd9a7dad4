//! t-SNE reducer backed by `linfa-tsne`.
//!
//! An approximation threshold of 0 (the default) selects the exact O(N²)
//! gradient; a positive value switches to Barnes-Hut. The initial layout is
//! drawn from a `ChaCha8Rng` seeded from the configuration, so a fixed seed
//! reproduces the embedding.

use linfa::traits::Transformer;
use linfa::ParamGuard;
use linfa_tsne::TSneParams;
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::Reducer;
use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

const OUTPUT_DIMS: usize = 2;
/// Keeps 3 * perplexity strictly below N - 1 after rounding.
const PERPLEXITY_MARGIN: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct Tsne {
    config: EmbeddingConfig,
}

impl Tsne {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Perplexity actually used for `n` samples. Each point needs at least
    /// 3 * perplexity neighbours, so larger values are capped.
    pub(crate) fn effective_perplexity(&self, n: usize) -> f64 {
        let cap = n.saturating_sub(1) as f64 / 3.0 * (1.0 - PERPLEXITY_MARGIN);
        self.config.perplexity.min(cap)
    }
}

fn reduction_error(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Reduction(format!("{context}: {e}"))
}

impl Reducer for Tsne {
    fn reduce(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let (n, width) = data.dim();
        if n < 2 {
            return Err(PipelineError::Reduction(format!(
                "need at least 2 spectra, got {n}"
            )));
        }
        if width < OUTPUT_DIMS {
            return Err(PipelineError::Reduction(format!(
                "need at least {OUTPUT_DIMS} wavelength bins, got {width}"
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Reduction(
                "input contains non-finite values".to_string(),
            ));
        }

        let perplexity = self.effective_perplexity(n);
        if perplexity < self.config.perplexity {
            log::warn!(
                "perplexity {} too large for {n} spectra, using {perplexity:.2}",
                self.config.perplexity
            );
        }

        let samples = ndarray_linfa::Array2::from_shape_vec((n, width), data.iter().copied().collect())
            .map_err(|e| reduction_error("t-SNE input", e))?;
        let rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let params = TSneParams::<f64, ChaCha8Rng>::embedding_size_with_rng(OUTPUT_DIMS, rng)
            .perplexity(perplexity)
            .approx_threshold(self.config.approx_threshold)
            .max_iter(self.config.max_iter)
            .preliminary_iter(self.config.exaggeration_iter.min(self.config.max_iter))
            .check()
            .map_err(|e| reduction_error("t-SNE parameters", e))?;
        let embedded = params
            .transform(samples)
            .map_err(|e| reduction_error("t-SNE", e))?;

        let coords = Array2::from_shape_vec((n, OUTPUT_DIMS), embedded.into_raw_vec())
            .map_err(|e| reduction_error("t-SNE output", e))?;
        if coords.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Reduction(
                "t-SNE produced non-finite coordinates".to_string(),
            ));
        }
        log::debug!("t-SNE finished: n={n}, width={width}, perplexity={perplexity:.2}");
        Ok(coords)
    }
}
