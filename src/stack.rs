//! Coadding the exposures of each source.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use rayon::prelude::*;

use crate::combine::inverse_variance_merge;
use crate::data::model::{Classification, Exposure, Measurement};
use crate::error::{PipelineError, Result};

/// Coadded spectrum of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedSource {
    pub name: String,
    pub classification: Classification,
    pub spectrum: Measurement,
    pub n_exposures: usize,
}

/// Inverse-variance coadd of aligned measurements.
pub fn stack_measurements<'a, I>(measurements: I) -> Result<Measurement>
where
    I: IntoIterator<Item = &'a Measurement>,
{
    inverse_variance_merge(
        measurements
            .into_iter()
            .map(|m| (m.flux.view(), m.ivar.view())),
    )
}

/// The shared label of a source's exposures.
///
/// Exposures of one source are labelled identically upstream; disagreement
/// is reported instead of picking one.
pub fn resolve_label(name: &str, exposures: &[&Exposure]) -> Result<Classification> {
    let labels: BTreeSet<&Classification> = exposures.iter().map(|e| &e.classification).collect();
    let mut iter = labels.iter();
    match (iter.next(), iter.next()) {
        (Some(label), None) => Ok((*label).clone()),
        (None, _) => Err(PipelineError::NoValidExposures),
        (Some(_), Some(_)) => Err(PipelineError::LabelConflict {
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }),
    }
}

/// Stack all non-excluded exposures of one source.
pub fn stack_source(name: &str, exposures: &[&Exposure]) -> Result<StackedSource> {
    let valid: Vec<&Exposure> = exposures
        .iter()
        .copied()
        .filter(|e| !e.classification.is_excluded())
        .collect();
    if valid.is_empty() {
        return Err(PipelineError::NoValidExposures);
    }
    let classification = resolve_label(name, &valid)?;
    let spectrum = stack_measurements(valid.iter().map(|e| &e.spectrum))?;
    Ok(StackedSource {
        name: name.to_string(),
        classification,
        spectrum,
        n_exposures: valid.len(),
    })
}

/// Group exposures by source name, in sorted name order.
pub fn group_by_source(exposures: &[Exposure]) -> BTreeMap<&str, Vec<&Exposure>> {
    let mut groups: BTreeMap<&str, Vec<&Exposure>> = BTreeMap::new();
    for exposure in exposures {
        groups.entry(exposure.key.name.as_str()).or_default().push(exposure);
    }
    groups
}

/// Stack every source. Each entry of the result pairs a source name with its
/// stack or the reason it could not be stacked; order follows the names.
pub fn stack_all(exposures: &[Exposure]) -> Vec<(String, Result<StackedSource>)> {
    let groups: Vec<(&str, Vec<&Exposure>)> = group_by_source(exposures).into_iter().collect();
    groups
        .par_iter()
        .map(|(name, group)| (name.to_string(), stack_source(name, group)))
        .collect()
}

/// Collect stacked rows into (flux, ivar) matrices.
pub fn to_matrices(stacks: &[StackedSource], width: usize) -> Result<(Array2<f64>, Array2<f64>)> {
    let mut flux = Array2::<f64>::zeros((stacks.len(), width));
    let mut ivar = Array2::<f64>::zeros((stacks.len(), width));
    for (i, stack) in stacks.iter().enumerate() {
        PipelineError::check_len("coadded spectrum", width, stack.spectrum.len())?;
        flux.row_mut(i).assign(&stack.spectrum.flux);
        ivar.row_mut(i).assign(&stack.spectrum.ivar);
    }
    Ok((flux, ivar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::ExposureKey;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn exposure(name: &str, id: u64, label: &str, flux: [f64; 3], ivar: [f64; 3]) -> Exposure {
        Exposure {
            key: ExposureKey {
                name: name.to_string(),
                exposure_id: id,
                date: "20210505".to_string(),
            },
            classification: Classification::parse(label),
            spectrum: Measurement {
                flux: array![flux[0], flux[1], flux[2]],
                ivar: array![ivar[0], ivar[1], ivar[2]],
            },
        }
    }

    #[test]
    fn single_exposure_passes_through() {
        let e = exposure("A", 1, "DA", [1.5, -2.0, 0.3], [2.0, 0.5, 4.0]);
        let stack = stack_source("A", &[&e]).unwrap();
        assert_eq!(stack.spectrum, e.spectrum);
        assert_eq!(stack.n_exposures, 1);
    }

    #[test]
    fn coadd_is_weighted() {
        let a = exposure("A", 1, "DB", [1.0, 2.0, 3.0], [1.0, 1.0, 0.0]);
        let b = exposure("A", 2, "DB", [3.0, 2.0, 5.0], [3.0, 1.0, 0.0]);
        let stack = stack_source("A", &[&a, &b]).unwrap();
        assert_relative_eq!(stack.spectrum.flux[0], 2.5);
        assert_relative_eq!(stack.spectrum.flux[1], 2.0);
        assert!(stack.spectrum.flux[2].is_nan());
        assert_eq!(stack.spectrum.ivar, array![4.0, 2.0, 0.0]);
        assert_eq!(stack.classification, Classification::parse("DB"));
    }

    #[test]
    fn excluded_exposures_are_dropped() {
        let a = exposure("A", 1, "NULL", [100.0, 100.0, 100.0], [9.0, 9.0, 9.0]);
        let b = exposure("A", 2, "DC", [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]);
        let stack = stack_source("A", &[&a, &b]).unwrap();
        assert_eq!(stack.spectrum, b.spectrum);

        let only_excluded = stack_source("A", &[&a]);
        assert_eq!(only_excluded, Err(PipelineError::NoValidExposures));
    }

    #[test]
    fn conflicting_labels_are_reported() {
        let a = exposure("A", 1, "DA", [1.0; 3], [1.0; 3]);
        let b = exposure("A", 2, "DZ", [1.0; 3], [1.0; 3]);
        let err = stack_source("A", &[&a, &b]);
        assert!(matches!(err, Err(PipelineError::LabelConflict { .. })));
    }

    #[test]
    fn stack_all_groups_by_sorted_name() {
        let exposures = vec![
            exposure("B", 1, "DA", [1.0; 3], [1.0; 3]),
            exposure("A", 2, "DB", [2.0; 3], [1.0; 3]),
            exposure("B", 3, "DA", [3.0; 3], [1.0; 3]),
        ];
        let stacks = stack_all(&exposures);
        let names: Vec<&str> = stacks.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        let b = stacks[1].1.as_ref().unwrap();
        assert_eq!(b.n_exposures, 2);
        assert_relative_eq!(b.spectrum.flux[0], 2.0);
    }
}
