//! Continuum fitting and subtraction.
//!
//! The default model median-smooths the flux and fits a low-order Chebyshev
//! series over wavelength by SVD least squares. A spectrum whose fit
//! degenerates is passed through unchanged and flagged; the rest of the
//! batch is unaffected.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::config::ContinuumConfig;
use crate::error::{PipelineError, Result};

/// Fits a smooth continuum and evaluates it on the input grid.
pub trait ContinuumFitter: Send + Sync {
    fn fit(&self, wavelength: ArrayView1<'_, f64>, flux: ArrayView1<'_, f64>) -> Result<Array1<f64>>;
}

// ---------------------------------------------------------------------------
// Chebyshev continuum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ChebyshevContinuum {
    pub median_window: usize,
    pub degree: usize,
}

impl From<ContinuumConfig> for ChebyshevContinuum {
    fn from(config: ContinuumConfig) -> Self {
        Self {
            median_window: config.median_window,
            degree: config.degree,
        }
    }
}

impl Default for ChebyshevContinuum {
    fn default() -> Self {
        ContinuumConfig::default().into()
    }
}

/// Running median with zero padding at both ends. Non-finite samples are
/// ignored; a window without finite samples yields NaN.
pub fn median_filter(values: ArrayView1<'_, f64>, window: usize) -> Array1<f64> {
    let half = window / 2;
    let n = values.len();
    let mut buf = Vec::with_capacity(window);
    Array1::from_iter((0..n).map(|i| {
        buf.clear();
        for k in 0..window {
            let j = i as isize + k as isize - half as isize;
            if j < 0 || j >= n as isize {
                buf.push(0.0);
            } else {
                let v = values[j as usize];
                if v.is_finite() {
                    buf.push(v);
                }
            }
        }
        if buf.is_empty() {
            return f64::NAN;
        }
        buf.sort_by(f64::total_cmp);
        let m = buf.len();
        if m % 2 == 1 {
            buf[m / 2]
        } else {
            0.5 * (buf[m / 2 - 1] + buf[m / 2])
        }
    }))
}

/// T_0(x) .. T_degree(x).
fn chebyshev_basis(x: f64, degree: usize) -> Vec<f64> {
    let mut t = Vec::with_capacity(degree + 1);
    t.push(1.0);
    if degree >= 1 {
        t.push(x);
    }
    for k in 2..=degree {
        t.push(2.0 * x * t[k - 1] - t[k - 2]);
    }
    t
}

/// Singular values below this fraction of the largest count as zero.
const RANK_TOLERANCE: f64 = 1e-10;
const SVD_MAX_ITER: usize = 1000;

impl ContinuumFitter for ChebyshevContinuum {
    fn fit(&self, wavelength: ArrayView1<'_, f64>, flux: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        PipelineError::check_len("continuum flux", wavelength.len(), flux.len())?;
        let n_coef = self.degree + 1;
        let smoothed = median_filter(flux, self.median_window);

        let (lo, hi) = wavelength
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &w| (lo.min(w), hi.max(w)));
        if !(hi > lo) {
            return Err(PipelineError::Continuum(
                "wavelength grid has no extent".to_string(),
            ));
        }
        let to_domain = |w: f64| 2.0 * (w - lo) / (hi - lo) - 1.0;

        let samples: Vec<(f64, f64)> = wavelength
            .iter()
            .zip(smoothed.iter())
            .map(|(&w, &f)| (to_domain(w), f))
            .filter(|(x, f)| x.is_finite() && f.is_finite())
            .collect();
        if samples.len() < n_coef {
            return Err(PipelineError::Continuum(format!(
                "{} informative bins for {n_coef} coefficients",
                samples.len()
            )));
        }

        let design = DMatrix::from_row_iterator(
            samples.len(),
            n_coef,
            samples.iter().flat_map(|&(x, _)| chebyshev_basis(x, self.degree)),
        );
        let target = DVector::from_iterator(samples.len(), samples.iter().map(|&(_, f)| f));
        let svd = design
            .try_svd(true, true, f64::EPSILON, SVD_MAX_ITER)
            .ok_or_else(|| PipelineError::Continuum("SVD did not converge".to_string()))?;
        let tolerance = svd.singular_values.max() * RANK_TOLERANCE;
        let rank = svd.rank(tolerance);
        if rank < n_coef {
            return Err(PipelineError::Continuum(format!(
                "design matrix has rank {rank} for {n_coef} coefficients"
            )));
        }
        let coef = svd
            .solve(&target, tolerance)
            .map_err(|e| PipelineError::Continuum(format!("least-squares solve: {e}")))?;

        let continuum = wavelength.mapv(|w| {
            chebyshev_basis(to_domain(w), self.degree)
                .iter()
                .zip(coef.iter())
                .map(|(t, c)| t * c)
                .sum::<f64>()
        });
        if continuum.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::Continuum(
                "non-finite continuum".to_string(),
            ));
        }
        Ok(continuum)
    }
}

// ---------------------------------------------------------------------------
// ContinuumRemover
// ---------------------------------------------------------------------------

/// What happened to one spectrum.
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuumOutcome {
    Subtracted,
    /// Fit failed; the original flux was kept.
    PassedThrough(String),
}

#[derive(Debug, Clone)]
pub struct ContinuumRemover<F = ChebyshevContinuum> {
    fitter: F,
}

impl ContinuumRemover<ChebyshevContinuum> {
    pub fn from_config(config: ContinuumConfig) -> Self {
        Self::new(config.into())
    }
}

impl<F: ContinuumFitter> ContinuumRemover<F> {
    pub fn new(fitter: F) -> Self {
        Self { fitter }
    }

    pub fn subtract(
        &self,
        wavelength: ArrayView1<'_, f64>,
        flux: ArrayView1<'_, f64>,
    ) -> (Array1<f64>, ContinuumOutcome) {
        match self.fitter.fit(wavelength, flux) {
            Ok(continuum) => (&flux - &continuum, ContinuumOutcome::Subtracted),
            Err(e) => (flux.to_owned(), ContinuumOutcome::PassedThrough(e.to_string())),
        }
    }

    /// Subtract each row's continuum independently.
    pub fn subtract_batch(
        &self,
        wavelength: ArrayView1<'_, f64>,
        flux: ArrayView2<'_, f64>,
    ) -> Result<(Array2<f64>, Vec<ContinuumOutcome>)> {
        PipelineError::check_len("continuum batch", wavelength.len(), flux.ncols())?;
        let mut out = flux.to_owned();
        let outcomes: Vec<ContinuumOutcome> = out
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .map(|mut row| {
                let (subtracted, outcome) = self.subtract(wavelength, row.view());
                row.assign(&subtracted);
                outcome
            })
            .collect();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, ContinuumOutcome::PassedThrough(_)))
            .count();
        if failed > 0 {
            log::warn!("continuum fit failed for {failed} of {} spectra; passed through", outcomes.len());
        }
        Ok((out, outcomes))
    }
}
