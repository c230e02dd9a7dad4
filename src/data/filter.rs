use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2};

use super::model::Exposure;
use crate::config::BandConfig;
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Exclusion policy
// ---------------------------------------------------------------------------

/// Split exposures into those that may be stacked and those whose label is
/// the excluded sentinel.
pub fn partition_excluded(exposures: Vec<Exposure>) -> (Vec<Exposure>, Vec<Exposure>) {
    exposures
        .into_iter()
        .partition(|e| !e.classification.is_excluded())
}

// ---------------------------------------------------------------------------
// Wavelength masks
// ---------------------------------------------------------------------------

/// Boolean selection over a wavelength grid.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthMask {
    pub name: String,
    keep: Vec<bool>,
}

impl WavelengthMask {
    pub fn from_bools(name: &str, keep: Vec<bool>) -> Self {
        Self {
            name: name.to_string(),
            keep,
        }
    }

    /// Select bins strictly inside any of the `(lo, hi)` ranges.
    pub fn from_ranges(name: &str, wavelength: ArrayView1<'_, f64>, ranges: &[(f64, f64)]) -> Self {
        let keep = wavelength
            .iter()
            .map(|&w| ranges.iter().any(|&(lo, hi)| w > lo && w < hi))
            .collect();
        Self::from_bools(name, keep)
    }

    pub fn from_band(band: &BandConfig, wavelength: ArrayView1<'_, f64>) -> Self {
        Self::from_ranges(&band.name, wavelength, &band.ranges)
    }

    pub fn len(&self) -> usize {
        self.keep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    pub fn selected(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.keep
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(i, _)| i)
            .collect()
    }

    fn checked_indices(&self, width: usize) -> Result<Vec<usize>> {
        PipelineError::check_len("wavelength mask", width, self.len())?;
        let indices = self.indices();
        if indices.is_empty() {
            return Err(PipelineError::Config(format!(
                "mask '{}' selects no wavelength bins",
                self.name
            )));
        }
        Ok(indices)
    }

    /// Masked columns of a batch.
    pub fn select_columns<S>(&self, spectra: &ArrayBase<S, Ix2>) -> Result<Array2<f64>>
    where
        S: Data<Elem = f64>,
    {
        let indices = self.checked_indices(spectra.ncols())?;
        Ok(spectra.select(Axis(1), &indices))
    }

    /// Masked bins of one spectrum or grid.
    pub fn select<S>(&self, values: &ArrayBase<S, Ix1>) -> Result<Array1<f64>>
    where
        S: Data<Elem = f64>,
    {
        let indices = self.checked_indices(values.len())?;
        Ok(values.select(Axis(0), &indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Classification, ExposureKey, Measurement};
    use ndarray::array;

    #[test]
    fn ranges_are_exclusive() {
        let wl = array![5400.0, 5500.0, 5501.0, 6099.0, 6100.0, 6500.5];
        let mask = WavelengthMask::from_ranges("he", wl.view(), &[(5500.0, 6100.0), (6500.0, 6600.0)]);
        assert_eq!(mask.indices(), vec![2, 3, 5]);
        assert_eq!(mask.select(&wl).unwrap(), array![5501.0, 6099.0, 6500.5]);
    }

    #[test]
    fn select_columns_keeps_rows() {
        let mask = WavelengthMask::from_bools("m", vec![true, false, true]);
        let spectra = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        assert_eq!(
            mask.select_columns(&spectra).unwrap(),
            array![[1.0, 3.0], [4.0, 6.0]]
        );
    }

    #[test]
    fn empty_or_misaligned_mask_is_error() {
        let none = WavelengthMask::from_bools("none", vec![false, false]);
        assert!(none.select(&array![1.0, 2.0]).is_err());
        let short = WavelengthMask::from_bools("short", vec![true]);
        assert!(matches!(
            short.select(&array![1.0, 2.0]),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn excluded_exposures_are_partitioned_out() {
        let exposure = |id: u64, label: &str| Exposure {
            key: ExposureKey {
                name: "J1".to_string(),
                exposure_id: id,
                date: "20210101".to_string(),
            },
            classification: Classification::parse(label),
            spectrum: Measurement {
                flux: array![1.0],
                ivar: array![1.0],
            },
        };
        let all = vec![exposure(1, "DA"), exposure(2, "NULL"), exposure(3, "DA")];
        let (kept, dropped) = partition_excluded(all);
        let kept_ids: Vec<u64> = kept.iter().map(|e| e.key.exposure_id).collect();
        assert_eq!(kept_ids, vec![1, 3]);
        assert_eq!(dropped[0].key.exposure_id, 2);
    }
}
