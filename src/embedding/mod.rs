//! Embedding layer: reducer abstraction and projection of spectra.
//!
//! ```text
//!   flux, ivar (N x W)         extra spectrum (W), optional
//!        │                              │
//!        ├──────────── append as row N+1 ┘
//!        ▼
//!   ┌───────────────┐
//!   │ band mask      │  keep masked wavelength columns
//!   └───────────────┘
//!        ▼
//!   ┌───────────────┐
//!   │ preprocessor   │  denoise → normalize, per row
//!   └───────────────┘
//!        ▼
//!   ┌───────────────┐
//!   │ Reducer (tSNE) │  N(+1) x 2, seeded
//!   └───────────────┘
//! ```

pub mod tsne;

use ndarray::{concatenate, Array2, ArrayView1, ArrayView2, Axis};

use crate::config::PipelineConfig;
use crate::data::filter::WavelengthMask;
use crate::error::{PipelineError, Result};
use crate::preprocess::SpectralPreprocessor;

pub use tsne::Tsne;

/// A nonlinear reduction of N row vectors to N two-dimensional points.
///
/// Implementations must be deterministic for a fixed configuration.
pub trait Reducer: Send + Sync {
    fn reduce(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>>;
}

// ---------------------------------------------------------------------------
// EmbeddingProjector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EmbeddingProjector<R = Tsne> {
    reducer: R,
    preprocessor: SpectralPreprocessor,
    neighbors: usize,
}

impl EmbeddingProjector<Tsne> {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Tsne::new(config.embedding),
            SpectralPreprocessor::new(config.preprocess),
            config.embedding.neighbors,
        )
    }
}

impl<R: Reducer> EmbeddingProjector<R> {
    pub fn new(reducer: R, preprocessor: SpectralPreprocessor, neighbors: usize) -> Self {
        Self {
            reducer,
            preprocessor,
            neighbors: neighbors.max(1),
        }
    }

    pub fn preprocessor(&self) -> &SpectralPreprocessor {
        &self.preprocessor
    }

    fn reduce_checked(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let coords = self.reducer.reduce(data)?;
        if coords.dim() != (data.nrows(), 2) {
            return Err(PipelineError::Reduction(format!(
                "reducer returned shape {:?} for {} spectra",
                coords.shape(),
                data.nrows()
            )));
        }
        Ok(coords)
    }

    /// Reduce already preprocessed spectra, keeping only the masked
    /// wavelength columns when a mask is given.
    pub fn embed(
        &self,
        preprocessed: ArrayView2<'_, f64>,
        mask: Option<&WavelengthMask>,
    ) -> Result<Array2<f64>> {
        match mask {
            Some(mask) => {
                let columns = mask.select_columns(&preprocessed)?;
                self.reduce_checked(columns.view())
            }
            None => self.reduce_checked(preprocessed),
        }
    }

    /// Restrict raw spectra to the band, then denoise and normalize within
    /// it, then reduce.
    pub fn embed_spectra(
        &self,
        wavelength: ArrayView1<'_, f64>,
        flux: ArrayView2<'_, f64>,
        ivar: ArrayView2<'_, f64>,
        mask: Option<&WavelengthMask>,
    ) -> Result<Array2<f64>> {
        let preprocessed = match mask {
            Some(mask) => {
                let wl = mask.select(&wavelength)?;
                self.preprocessor.apply(
                    wl.view(),
                    &mask.select_columns(&flux)?,
                    &mask.select_columns(&ivar)?,
                )?
            }
            None => self.preprocessor.apply(wavelength, &flux, &ivar)?,
        };
        self.reduce_checked(preprocessed.view())
    }

    /// Embed the reference batch together with one extra spectrum.
    ///
    /// The extra spectrum is appended as the last row before preprocessing
    /// and the reducer is refit on all N + 1 rows; row N of the result is its
    /// position.
    pub fn embed_augmented(
        &self,
        wavelength: ArrayView1<'_, f64>,
        flux: ArrayView2<'_, f64>,
        ivar: ArrayView2<'_, f64>,
        extra_flux: ArrayView1<'_, f64>,
        extra_ivar: ArrayView1<'_, f64>,
        mask: Option<&WavelengthMask>,
    ) -> Result<Array2<f64>> {
        PipelineError::check_len("augmented flux", flux.ncols(), extra_flux.len())?;
        PipelineError::check_len("augmented ivar", ivar.ncols(), extra_ivar.len())?;
        let flux = append_row(flux, extra_flux)?;
        let ivar = append_row(ivar, extra_ivar)?;
        self.embed_spectra(wavelength, flux.view(), ivar.view(), mask)
    }

    /// Place one preprocessed spectrum into an existing embedding without
    /// refitting: inverse-distance-weighted mean of the coordinates of its
    /// nearest reference spectra.
    pub fn project_nearest(
        &self,
        reference: ArrayView2<'_, f64>,
        embedding: ArrayView2<'_, f64>,
        extra: ArrayView1<'_, f64>,
    ) -> Result<[f64; 2]> {
        PipelineError::check_len("reference embedding", reference.nrows(), embedding.nrows())?;
        PipelineError::check_len("projected spectrum", reference.ncols(), extra.len())?;
        if reference.nrows() == 0 {
            return Err(PipelineError::Reduction(
                "empty reference embedding".to_string(),
            ));
        }

        let mut distances: Vec<(f64, usize)> = reference
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let d = row
                    .iter()
                    .zip(extra.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                (d, i)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances.truncate(self.neighbors);

        if let Some(&(d, i)) = distances.first() {
            if d == 0.0 {
                return Ok([embedding[[i, 0]], embedding[[i, 1]]]);
            }
        }
        let (mut x, mut y, mut total) = (0.0, 0.0, 0.0);
        for &(d, i) in &distances {
            let w = 1.0 / d;
            x += w * embedding[[i, 0]];
            y += w * embedding[[i, 1]];
            total += w;
        }
        if !total.is_finite() || total == 0.0 {
            return Err(PipelineError::Reduction(
                "projected spectrum has no finite neighbour distance".to_string(),
            ));
        }
        Ok([x / total, y / total])
    }
}

fn append_row(batch: ArrayView2<'_, f64>, row: ArrayView1<'_, f64>) -> Result<Array2<f64>> {
    concatenate(Axis(0), &[batch.view(), row.view().insert_axis(Axis(0))])
        .map_err(|e| PipelineError::Reduction(format!("appending extra spectrum: {e}")))
}
