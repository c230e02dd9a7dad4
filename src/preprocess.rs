//! Denoising and normalization of spectra.
//!
//! Both transforms work on the last axis of their input, so a single
//! spectrum (`Array1`) and a batch (`Array2`, one spectrum per row) go
//! through the same code and come back with the same shape.

use ndarray::{Array, Array1, ArrayBase, ArrayView1, ArrayViewMut1, Axis, Data, Dimension, Zip};

use crate::config::PreprocessConfig;
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Linear interpolation
// ---------------------------------------------------------------------------

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, with flat
/// extrapolation beyond the first and last control points. `xp` must be
/// increasing; without control points (or with mismatched lengths) the
/// result is NaN.
pub(crate) fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    if xp.is_empty() || xp.len() != fp.len() {
        return f64::NAN;
    }
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    // first control point strictly greater than x
    let hi = xp.partition_point(|&v| v <= x);
    let lo = hi - 1;
    let slope = (fp[hi] - fp[lo]) / (xp[hi] - xp[lo]);
    slope * (x - xp[lo]) + fp[lo]
}

/// Resample `(xp, fp)` onto `grid`.
pub fn resample(grid: ArrayView1<'_, f64>, xp: ArrayView1<'_, f64>, fp: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
    PipelineError::check_len("resample values", xp.len(), fp.len())?;
    if xp.is_empty() {
        return Err(PipelineError::ShapeMismatch {
            context: "resample source grid",
            expected: 1,
            found: 0,
        });
    }
    let xp = xp.to_vec();
    let fp = fp.to_vec();
    Ok(grid.mapv(|x| interp(x, &xp, &fp)))
}

// ---------------------------------------------------------------------------
// Low-SNR interpolation
// ---------------------------------------------------------------------------

fn is_reliable(flux: f64, ivar: f64, snr_threshold: f64) -> bool {
    let snr = flux.abs() * ivar.sqrt();
    flux.is_finite() && snr.is_finite() && snr >= snr_threshold
}

/// Replace the unreliable bins of one spectrum in place. Returns false when
/// the spectrum has no reliable bin at all; it is then zero-filled.
fn fill_unreliable(
    wavelength: ArrayView1<'_, f64>,
    mut flux: ArrayViewMut1<'_, f64>,
    ivar: ArrayView1<'_, f64>,
    snr_threshold: f64,
) -> bool {
    let reliable: Vec<usize> = (0..flux.len())
        .filter(|&i| is_reliable(flux[i], ivar[i], snr_threshold))
        .collect();
    if reliable.is_empty() {
        flux.fill(0.0);
        return false;
    }
    if reliable.len() == flux.len() {
        return true;
    }

    let xp: Vec<f64> = reliable.iter().map(|&i| wavelength[i]).collect();
    let fp: Vec<f64> = reliable.iter().map(|&i| flux[i]).collect();
    let mut next = reliable.iter().peekable();
    for i in 0..flux.len() {
        if next.peek() == Some(&&i) {
            next.next();
            continue;
        }
        flux[i] = interp(wavelength[i], &xp, &fp);
    }
    true
}

/// Interpolate over bins whose SNR = |flux|·sqrt(ivar) is below
/// `snr_threshold`, using the remaining bins as control points.
///
/// Non-finite flux or SNR (e.g. coadded bins with zero total ivar) counts as
/// zero signal. A spectrum without any reliable bin becomes all zeros.
pub fn interp_if_snr_low<S1, S2, D>(
    wavelength: ArrayView1<'_, f64>,
    flux: &ArrayBase<S1, D>,
    ivar: &ArrayBase<S2, D>,
    snr_threshold: f64,
) -> Result<Array<f64, D>>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    let axis = spectral_axis(flux.ndim())?;
    if flux.shape() != ivar.shape() {
        return Err(PipelineError::ShapeMismatch {
            context: "ivar shape",
            expected: flux.len(),
            found: ivar.len(),
        });
    }
    PipelineError::check_len("wavelength grid", flux.len_of(axis), wavelength.len())?;

    let mut out = flux.to_owned();
    let mut empty = 0usize;
    Zip::from(out.lanes_mut(axis))
        .and(ivar.lanes(axis))
        .for_each(|lane, w| {
            if !fill_unreliable(wavelength, lane, w, snr_threshold) {
                empty += 1;
            }
        });
    if empty > 0 {
        log::debug!("{empty} spectra had no bins above SNR {snr_threshold}; zero-filled");
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Mean / standard-deviation normalization
// ---------------------------------------------------------------------------

fn normalize_lane(mut lane: ArrayViewMut1<'_, f64>, epsilon: f64) {
    let Some(&first) = lane.iter().next() else {
        return;
    };
    if lane.iter().all(|&v| v == first) {
        lane.fill(0.0);
        return;
    }
    let n = lane.len() as f64;
    let mean = lane.sum() / n;
    let var = lane.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;
    let denom = var.sqrt() + epsilon;
    lane.mapv_inplace(|v| (v - mean) / denom);
}

/// Rescale each spectrum to zero mean and unit (population) standard
/// deviation. A constant spectrum maps to all zeros.
pub fn meanstd<S, D>(spectra: &ArrayBase<S, D>, epsilon: f64) -> Result<Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let axis = spectral_axis(spectra.ndim())?;
    let mut out = spectra.to_owned();
    for lane in out.lanes_mut(axis) {
        normalize_lane(lane, epsilon);
    }
    Ok(out)
}

fn spectral_axis(ndim: usize) -> Result<Axis> {
    match ndim {
        0 => Err(PipelineError::ShapeMismatch {
            context: "spectrum dimensionality",
            expected: 1,
            found: 0,
        }),
        n => Ok(Axis(n - 1)),
    }
}

// ---------------------------------------------------------------------------
// SpectralPreprocessor
// ---------------------------------------------------------------------------

/// Denoise-then-normalize, configured once per run.
#[derive(Debug, Clone, Copy)]
pub struct SpectralPreprocessor {
    config: PreprocessConfig,
}

impl Default for SpectralPreprocessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::default())
    }
}

impl SpectralPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn denoise<S1, S2, D>(
        &self,
        wavelength: ArrayView1<'_, f64>,
        flux: &ArrayBase<S1, D>,
        ivar: &ArrayBase<S2, D>,
    ) -> Result<Array<f64, D>>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
        D: Dimension,
    {
        interp_if_snr_low(wavelength, flux, ivar, self.config.snr_threshold)
    }

    pub fn normalize<S, D>(&self, spectra: &ArrayBase<S, D>) -> Result<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        meanstd(spectra, self.config.normalization_epsilon)
    }

    /// `normalize(denoise(..))`.
    pub fn apply<S1, S2, D>(
        &self,
        wavelength: ArrayView1<'_, f64>,
        flux: &ArrayBase<S1, D>,
        ivar: &ArrayBase<S2, D>,
    ) -> Result<Array<f64, D>>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
        D: Dimension,
    {
        let denoised = self.denoise(wavelength, flux, ivar)?;
        self.normalize(&denoised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    #[test]
    fn interp_matches_flat_extrapolation() {
        let xp = [1.0, 2.0, 4.0];
        let fp = [10.0, 20.0, 0.0];
        assert_eq!(interp(0.0, &xp, &fp), 10.0);
        assert_eq!(interp(1.0, &xp, &fp), 10.0);
        assert_relative_eq!(interp(1.5, &xp, &fp), 15.0);
        assert_relative_eq!(interp(3.0, &xp, &fp), 10.0);
        assert_eq!(interp(4.0, &xp, &fp), 0.0);
        assert_eq!(interp(9.0, &xp, &fp), 0.0);
        assert!(interp(1.0, &[], &[]).is_nan());
        assert!(interp(1.0, &xp, &fp[..2]).is_nan());
    }

    #[test]
    fn reliable_spectrum_is_unchanged() {
        let wl = array![1.0, 2.0, 3.0, 4.0];
        let flux = array![1.0, -2.0, 3.5, 0.5];
        let ivar = array![1.0, 1.0, 1.0, 1.0];
        let out = interp_if_snr_low(wl.view(), &flux, &ivar, 0.2).unwrap();
        assert_eq!(out, flux);
    }

    #[test]
    fn gap_is_linearly_filled() {
        let wl = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let flux = array![1.0, 9.0, 9.0, 9.0, 5.0, 6.0];
        let ivar = array![1.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let out = interp_if_snr_low(wl.view(), &flux, &ivar, 0.2).unwrap();
        assert_relative_eq!(out[1], 2.0);
        assert_relative_eq!(out[2], 3.0);
        assert_relative_eq!(out[3], 4.0);
        assert_eq!(out[5], 6.0);
    }

    #[test]
    fn edges_take_nearest_reliable_value() {
        let wl = array![0.0, 1.0, 2.0, 3.0];
        let flux = array![0.01, 2.0, 3.0, f64::NAN];
        let ivar = array![1.0, 1.0, 1.0, 0.0];
        let out = interp_if_snr_low(wl.view(), &flux, &ivar, 0.2).unwrap();
        assert_eq!(out, array![2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn no_reliable_bins_gives_zeros() {
        let wl = array![0.0, 1.0, 2.0];
        let out = interp_if_snr_low(wl.view(), &array![1.0, 2.0, 3.0], &array![0.0, 0.0, 0.0], 0.2)
            .unwrap();
        assert_eq!(out, array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn batch_rows_use_their_own_masks() {
        let wl = array![0.0, 1.0, 2.0];
        let flux = array![[1.0, 100.0, 3.0], [5.0, 6.0, 100.0]];
        let ivar = array![[1.0, 0.0, 1.0], [1.0, 1.0, 0.0]];
        let out = interp_if_snr_low(wl.view(), &flux, &ivar, 0.2).unwrap();
        assert_eq!(out.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(out.row(1).to_vec(), vec![5.0, 6.0, 6.0]);
    }

    #[test]
    fn shape_mismatch_is_error() {
        let wl = array![0.0, 1.0];
        let err = interp_if_snr_low(wl.view(), &array![1.0, 2.0, 3.0], &array![1.0, 1.0, 1.0], 0.2);
        assert!(matches!(err, Err(PipelineError::ShapeMismatch { .. })));
    }

    #[test]
    fn meanstd_standardizes_each_row() {
        let spectra = array![[1.0, 2.0, 3.0, 4.0], [10.0, -10.0, 10.0, -10.0]];
        let out = meanstd(&spectra, 1e-20).unwrap();
        for row in out.rows() {
            let mean = row.sum() / row.len() as f64;
            let std = (row.mapv(|v| (v - mean).powi(2)).sum() / row.len() as f64).sqrt();
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(std, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn meanstd_constant_is_zero() {
        let out = meanstd(&array![0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1], 1e-20).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn single_and_batch_of_one_agree() {
        let pre = SpectralPreprocessor::default();
        let wl = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let flux = array![1.0, 0.05, 4.0, -2.0, 7.0];
        let ivar = array![1.0, 1.0, 0.5, 2.0, 1.0];
        let single = pre.apply(wl.view(), &flux, &ivar).unwrap();
        let batch = pre
            .apply(
                wl.view(),
                &flux.clone().insert_axis(Axis(0)),
                &ivar.clone().insert_axis(Axis(0)),
            )
            .unwrap();
        assert_eq!(batch.shape(), &[1, 5]);
        assert_eq!(batch.row(0), single);
    }

    #[test]
    fn resample_onto_finer_grid() {
        let out = resample(
            array![0.0, 0.5, 1.0, 2.0].view(),
            array![0.5, 1.5].view(),
            array![1.0, 3.0].view(),
        )
        .unwrap();
        assert_eq!(out, array![1.0, 1.0, 2.0, 3.0]);
    }
}
