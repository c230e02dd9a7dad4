use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Arm layout
// ---------------------------------------------------------------------------

/// Fixed bin counts of the three spectrograph arms and their overlaps.
///
/// ```text
/// |----------------------|
///                  |----------------------------------|
///                                               |-----------------------|
/// |  B - OBR       | OBR |  R - OBR - ORZ       | ORZ |  Z - ORZ        |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmLayout {
    pub blue_bins: usize,
    pub red_bins: usize,
    pub infrared_bins: usize,
    pub overlap_blue_red: usize,
    pub overlap_red_infrared: usize,
}

impl Default for ArmLayout {
    fn default() -> Self {
        Self {
            blue_bins: 2751,
            red_bins: 2326,
            infrared_bins: 2881,
            overlap_blue_red: 51,
            overlap_red_infrared: 126,
        }
    }
}

impl ArmLayout {
    /// Length of the joined spectrum: B + R + Z - OBR - ORZ.
    pub fn joined_len(&self) -> usize {
        self.blue_bins + self.red_bins + self.infrared_bins
            - self.overlap_blue_red
            - self.overlap_red_infrared
    }

    pub fn validate(&self) -> Result<()> {
        if self.overlap_blue_red > self.blue_bins {
            return Err(PipelineError::Config(format!(
                "blue/red overlap ({}) wider than the blue arm ({})",
                self.overlap_blue_red, self.blue_bins
            )));
        }
        if self.overlap_red_infrared > self.infrared_bins {
            return Err(PipelineError::Config(format!(
                "red/infrared overlap ({}) wider than the infrared arm ({})",
                self.overlap_red_infrared, self.infrared_bins
            )));
        }
        if self.overlap_blue_red + self.overlap_red_infrared > self.red_bins {
            return Err(PipelineError::Config(format!(
                "red arm ({}) narrower than both overlaps ({} + {})",
                self.red_bins, self.overlap_blue_red, self.overlap_red_infrared
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stage sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Bins with |flux| * sqrt(ivar) below this are interpolated over.
    pub snr_threshold: f64,
    /// Added to the standard deviation in mean/std normalization.
    pub normalization_epsilon: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            snr_threshold: 0.2,
            normalization_epsilon: 1e-20,
        }
    }
}

/// t-SNE parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub perplexity: f64,
    /// Barnes-Hut angle; 0 runs the exact gradient.
    pub approx_threshold: f64,
    pub max_iter: usize,
    /// Leading iterations with early exaggeration and low momentum.
    pub exaggeration_iter: usize,
    pub seed: u64,
    /// Neighbours used by the nearest-neighbour out-of-sample extension.
    pub neighbors: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            approx_threshold: 0.0,
            max_iter: 1000,
            exaggeration_iter: 250,
            seed: 0,
            neighbors: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuumConfig {
    pub median_window: usize,
    pub degree: usize,
}

impl Default for ContinuumConfig {
    fn default() -> Self {
        Self {
            median_window: 3,
            degree: 3,
        }
    }
}

/// A named set of open wavelength intervals, in Angstrom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub name: String,
    pub ranges: Vec<(f64, f64)>,
}

fn default_bands() -> Vec<BandConfig> {
    vec![
        BandConfig {
            name: "he_line".to_string(),
            ranges: vec![(5500.0, 6100.0)],
        },
        BandConfig {
            name: "cv_lines".to_string(),
            ranges: vec![(4300.0, 4400.0), (4800.0, 4900.0), (6500.0, 6600.0)],
        },
    ]
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Full configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub arms: ArmLayout,
    pub preprocess: PreprocessConfig,
    pub embedding: EmbeddingConfig,
    pub continuum: ContinuumConfig,
    pub bands: Vec<BandConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            arms: ArmLayout::default(),
            preprocess: PreprocessConfig::default(),
            embedding: EmbeddingConfig::default(),
            continuum: ContinuumConfig::default(),
            bands: default_bands(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = toml::from_str(text).context("parsing pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.arms.validate()?;

        if !(self.preprocess.snr_threshold >= 0.0) {
            return Err(PipelineError::Config(format!(
                "snr_threshold must be >= 0, got {}",
                self.preprocess.snr_threshold
            )));
        }
        if !(self.preprocess.normalization_epsilon > 0.0) {
            return Err(PipelineError::Config(
                "normalization_epsilon must be > 0".to_string(),
            ));
        }

        let emb = &self.embedding;
        if !(emb.perplexity > 0.0) {
            return Err(PipelineError::Config(format!(
                "perplexity must be > 0, got {}",
                emb.perplexity
            )));
        }
        if !(emb.approx_threshold >= 0.0) {
            return Err(PipelineError::Config(format!(
                "approx_threshold must be >= 0, got {}",
                emb.approx_threshold
            )));
        }
        if emb.exaggeration_iter > emb.max_iter {
            return Err(PipelineError::Config(format!(
                "exaggeration_iter ({}) exceeds max_iter ({})",
                emb.exaggeration_iter, emb.max_iter
            )));
        }
        if emb.neighbors == 0 {
            return Err(PipelineError::Config("neighbors must be >= 1".to_string()));
        }

        let window = self.continuum.median_window;
        if window == 0 || window % 2 == 0 {
            return Err(PipelineError::Config(format!(
                "median_window must be odd and positive, got {window}"
            )));
        }

        for band in &self.bands {
            if band.ranges.is_empty() {
                return Err(PipelineError::Config(format!(
                    "band '{}' has no ranges",
                    band.name
                )));
            }
            if let Some((lo, hi)) = band.ranges.iter().find(|(lo, hi)| !(lo < hi)) {
                return Err(PipelineError::Config(format!(
                    "band '{}' has an empty range ({lo}, {hi})",
                    band.name
                )));
            }
        }
        Ok(())
    }

    pub fn band(&self, name: &str) -> Option<&BandConfig> {
        self.bands.iter().find(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.arms.joined_len(), 2751 + 2326 + 2881 - 51 - 126);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [preprocess]
            snr_threshold = 0.5

            [embedding]
            perplexity = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(config.preprocess.snr_threshold, 0.5);
        assert_eq!(config.preprocess.normalization_epsilon, 1e-20);
        assert_eq!(config.embedding.perplexity, 5.0);
        assert_eq!(config.embedding.seed, 0);
        assert_eq!(config.bands.len(), 2);
    }

    #[test]
    fn custom_bands_replace_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [[bands]]
            name = "halpha"
            ranges = [[6500.0, 6600.0]]
            "#,
        )
        .unwrap();
        assert_eq!(config.bands.len(), 1);
        assert!(config.band("halpha").is_some());
        assert!(config.band("he_line").is_none());
    }

    #[test]
    fn rejects_overlap_wider_than_red_arm() {
        let mut config = PipelineConfig::default();
        config.arms.red_bins = 100;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn rejects_even_median_window() {
        let err = PipelineConfig::from_toml_str("[continuum]\nmedian_window = 4\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_exaggeration_longer_than_run() {
        let err = PipelineConfig::from_toml_str("[embedding]\nmax_iter = 100\nexaggeration_iter = 250\n");
        assert!(err.is_err());
        let err = PipelineConfig::from_toml_str("[embedding]\napprox_threshold = -0.5\n");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_inverted_band() {
        let err = PipelineConfig::from_toml_str(
            "[[bands]]\nname = \"bad\"\nranges = [[6100.0, 5500.0]]\n",
        );
        assert!(err.is_err());
    }
}
