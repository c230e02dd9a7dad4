//! Inverse-variance weighted combination of aligned measurements.
//!
//! Used both for the overlap between neighbouring arms (two inputs) and for
//! coadding the exposures of one source (N inputs):
//!
//! ```text
//! flux = Σ fᵢ·wᵢ / Σ wᵢ        ivar = Σ wᵢ        (wᵢ = ivarᵢ)
//! ```
//!
//! A bin where every input has zero ivar carries no information and comes
//! out as NaN flux with zero ivar. Downstream SNR logic treats it as an
//! unreliable bin.

use ndarray::{Array1, ArrayView1, Zip};

use crate::data::model::Measurement;
use crate::error::{PipelineError, Result};

/// Combine any number (>= 1) of aligned (flux, ivar) views.
///
/// A single input is returned unchanged. Where exactly one input has
/// non-zero weight at a bin, that input's flux is taken as is, so a
/// zero-weight partner never perturbs it by rounding.
pub fn inverse_variance_merge<'a, I>(inputs: I) -> Result<Measurement>
where
    I: IntoIterator<Item = (ArrayView1<'a, f64>, ArrayView1<'a, f64>)>,
{
    let mut inputs = inputs.into_iter().peekable();
    let (first_flux, first_ivar) = inputs.next().ok_or(PipelineError::NoValidExposures)?;
    let n = first_flux.len();
    PipelineError::check_len("merge ivar", n, first_ivar.len())?;

    if inputs.peek().is_none() {
        return Ok(Measurement {
            flux: first_flux.to_owned(),
            ivar: first_ivar.to_owned(),
        });
    }

    let mut weighted = Array1::<f64>::zeros(n);
    let mut total = Array1::<f64>::zeros(n);
    let mut contributors = Array1::<u32>::zeros(n);
    let mut sole = Array1::<f64>::zeros(n);

    for (flux, ivar) in std::iter::once((first_flux, first_ivar)).chain(inputs) {
        PipelineError::check_len("merge flux", n, flux.len())?;
        PipelineError::check_len("merge ivar", n, ivar.len())?;
        Zip::from(&mut weighted)
            .and(&mut total)
            .and(&mut contributors)
            .and(&mut sole)
            .and(&flux)
            .and(&ivar)
            .for_each(|ws, t, c, s, &f, &w| {
                *ws += f * w;
                *t += w;
                if w != 0.0 {
                    *c += 1;
                    *s = f;
                }
            });
    }

    Zip::from(&mut weighted)
        .and(&total)
        .and(&contributors)
        .and(&sole)
        .for_each(|ws, &t, &c, &s| {
            *ws = if c == 1 { s } else { *ws / t };
        });

    Ok(Measurement {
        flux: weighted,
        ivar: total,
    })
}

/// Two-input form used for arm overlaps.
pub fn merge_pair(
    flux_a: ArrayView1<'_, f64>,
    ivar_a: ArrayView1<'_, f64>,
    flux_b: ArrayView1<'_, f64>,
    ivar_b: ArrayView1<'_, f64>,
) -> Result<Measurement> {
    inverse_variance_merge([
        (flux_a.view(), ivar_a.view()),
        (flux_b.view(), ivar_b.view()),
    ])
}
