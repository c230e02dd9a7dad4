//! Stage drivers.
//!
//! A [`PipelineContext`] is built once per run from the configuration and
//! threaded through every stage. Each driver processes a whole batch and
//! returns its output together with a [`BatchReport`]; a failure on one
//! exposure, source or spectrum is recorded there and never aborts the
//! batch.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::continuum::{ContinuumOutcome, ContinuumRemover};
use crate::data::filter::{partition_excluded, WavelengthMask};
use crate::data::model::{
    ArmReading, Classification, ClassificationLookup, CoaddedDataset, ContinuumSubtractedDataset, EmbeddingDataset,
    EmbeddingPoint, Exposure, ExposureKey, ExposureSet, ExternalSpectrum,
};
use crate::embedding::EmbeddingProjector;
use crate::error::{PipelineError, Result};
use crate::join::{ArmJoiner, ArmSet};
use crate::preprocess::resample;
use crate::stack::{stack_all, to_matrices, StackedSource};

/// Band name of an embedding over the whole grid.
pub const FULL_BAND: &str = "full";

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub item: String,
    pub reason: String,
}

impl fmt::Display for SkippedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.reason)
    }
}

/// Outcome counts of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub stage: String,
    pub processed: usize,
    /// Items dropped from the output.
    pub skipped: Vec<SkippedItem>,
    /// Items kept in the output but not transformed as asked.
    pub flagged: Vec<SkippedItem>,
}

impl BatchReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            processed: 0,
            skipped: Vec::new(),
            flagged: Vec::new(),
        }
    }

    pub fn skip(&mut self, item: impl Into<String>, reason: impl fmt::Display) {
        let item = SkippedItem {
            item: item.into(),
            reason: reason.to_string(),
        };
        log::warn!("[{}] skipping {item}", self.stage);
        self.skipped.push(item);
    }

    pub fn flag(&mut self, item: impl Into<String>, reason: impl fmt::Display) {
        let item = SkippedItem {
            item: item.into(),
            reason: reason.to_string(),
        };
        log::debug!("[{}] flagged {item}", self.stage);
        self.flagged.push(item);
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.flagged.is_empty()
    }

    /// Fold another report's items into this one.
    pub fn absorb(&mut self, other: BatchReport) {
        self.processed += other.processed;
        self.skipped.extend(other.skipped);
        self.flagged.extend(other.flagged);
    }

    fn finish(self) -> Self {
        log::info!(
            "[{}] {} processed, {} skipped, {} flagged",
            self.stage,
            self.processed,
            self.skipped.len(),
            self.flagged.len()
        );
        self
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} processed, {} skipped, {} flagged",
            self.stage,
            self.processed,
            self.skipped.len(),
            self.flagged.len()
        )?;
        for item in &self.skipped {
            writeln!(f, "  skipped {item}")?;
        }
        for item in &self.flagged {
            writeln!(f, "  flagged {item}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PipelineContext
// ---------------------------------------------------------------------------

/// Immutable per-run state shared by all stages.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    config: PipelineConfig,
    joiner: ArmJoiner,
    projector: EmbeddingProjector,
    remover: ContinuumRemover,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            joiner: ArmJoiner::new(config.arms)?,
            projector: EmbeddingProjector::from_config(&config),
            remover: ContinuumRemover::from_config(config.continuum),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn projector(&self) -> &EmbeddingProjector {
        &self.projector
    }

    fn mask_for(&self, band: &str, wavelength: &Array1<f64>) -> Result<Option<WavelengthMask>> {
        if band == FULL_BAND {
            return Ok(None);
        }
        let config = self
            .config
            .band(band)
            .ok_or_else(|| PipelineError::Config(format!("unknown band '{band}'")))?;
        Ok(Some(WavelengthMask::from_band(config, wavelength.view())))
    }

    // -- join ---------------------------------------------------------------

    /// Group loose arm readings into exposures and join each one.
    ///
    /// The grid of the first joined exposure (in key order) becomes the
    /// shared grid of the set.
    pub fn join_exposures(
        &self,
        readings: Vec<ArmReading>,
        lookup: &ClassificationLookup,
    ) -> (ExposureSet, BatchReport) {
        let mut report = BatchReport::new("join");
        let mut groups: BTreeMap<ExposureKey, Vec<ArmReading>> = BTreeMap::new();
        for reading in readings {
            groups.entry(reading.key.clone()).or_default().push(reading);
        }
        let mut names: Vec<&str> = groups.keys().map(|k| k.name.as_str()).collect();
        names.dedup();
        log::info!("[join] {} exposures from {} sources", groups.len(), names.len());

        let joined: Vec<(ExposureKey, Result<(Array1<f64>, Exposure)>)> = groups
            .into_par_iter()
            .map(|(key, readings)| {
                let result = self.join_one(&key, readings, lookup);
                (key, result)
            })
            .collect();

        let mut wavelength: Option<Array1<f64>> = None;
        let mut exposures = Vec::with_capacity(joined.len());
        for (key, result) in joined {
            match result {
                Ok((grid, exposure)) => {
                    wavelength.get_or_insert(grid);
                    exposures.push(exposure);
                    report.processed += 1;
                }
                Err(e) => report.skip(key.to_string(), e),
            }
        }

        let set = ExposureSet {
            wavelength: wavelength.unwrap_or_else(|| Array1::zeros(0)),
            exposures,
        };
        (set, report.finish())
    }

    fn join_one(
        &self,
        key: &ExposureKey,
        readings: Vec<ArmReading>,
        lookup: &ClassificationLookup,
    ) -> Result<(Array1<f64>, Exposure)> {
        let classification = lookup
            .get(&key.name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownSource(key.name.clone()))?;
        let arms = ArmSet::from_readings(readings)?;
        let grid = self.joiner.joined_wavelength(&arms)?;
        let exposure = self.joiner.join_exposure(&arms, classification)?;
        Ok((grid, exposure))
    }

    // -- stack --------------------------------------------------------------

    /// Coadd the non-excluded exposures of every source.
    pub fn stack_sources(&self, set: &ExposureSet) -> Result<(CoaddedDataset, BatchReport)> {
        let mut report = BatchReport::new("stack");
        let width = set.wavelength.len();
        let (kept, dropped) = partition_excluded(set.exposures.clone());
        log::info!(
            "[stack] {} exposures, {} excluded by classification",
            kept.len(),
            dropped.len()
        );

        let mut stacks: Vec<StackedSource> = Vec::new();
        for (name, result) in stack_all(&kept) {
            match result.and_then(|stack| {
                PipelineError::check_len("coadded spectrum", width, stack.spectrum.len())?;
                Ok(stack)
            }) {
                Ok(stack) => {
                    stacks.push(stack);
                    report.processed += 1;
                }
                Err(e) => report.skip(name, e),
            }
        }

        let mut codes: BTreeMap<String, usize> = BTreeMap::new();
        for stack in &stacks {
            if let Some(code) = stack.classification.class_code() {
                *codes.entry(code).or_default() += 1;
            }
        }
        for (code, count) in &codes {
            log::info!("[stack] {code}: {count} sources");
        }

        let (flux, ivar) = to_matrices(&stacks, width)?;
        let (names, classifications): (Vec<String>, Vec<Classification>) = stacks
            .into_iter()
            .map(|s| (s.name, s.classification))
            .unzip();
        let dataset = CoaddedDataset {
            names,
            classifications,
            wavelength: set.wavelength.clone(),
            flux,
            ivar,
        };
        Ok((dataset, report.finish()))
    }

    // -- reduce -------------------------------------------------------------

    /// Embed the coadded set over the full grid and over every configured
    /// band. A band whose embedding fails is reported and left out.
    pub fn reduce_bands(&self, coadded: &CoaddedDataset) -> (Vec<EmbeddingDataset>, BatchReport) {
        let mut report = BatchReport::new("reduce");
        let bands: Vec<&str> = std::iter::once(FULL_BAND)
            .chain(self.config.bands.iter().map(|b| b.name.as_str()))
            .collect();
        log::info!("[reduce] {} spectra, {} bands", coadded.len(), bands.len());

        let mut embeddings = Vec::with_capacity(bands.len());
        for band in bands {
            match self.reduce_band(coadded, band) {
                Ok(embedding) => {
                    embeddings.push(embedding);
                    report.processed += 1;
                }
                Err(e) => report.skip(band, e),
            }
        }
        (embeddings, report.finish())
    }

    pub fn reduce_band(&self, coadded: &CoaddedDataset, band: &str) -> Result<EmbeddingDataset> {
        let mask = self.mask_for(band, &coadded.wavelength)?;
        let coords = self.projector.embed_spectra(
            coadded.wavelength.view(),
            coadded.flux.view(),
            coadded.ivar.view(),
            mask.as_ref(),
        )?;
        Ok(EmbeddingDataset::from_coordinates(band, &coadded.names, &coords))
    }

    // -- augment ------------------------------------------------------------

    /// Embed the coadded set once per external spectrum, with that spectrum
    /// resampled onto the shared grid and appended as the last row.
    pub fn augment(
        &self,
        coadded: &CoaddedDataset,
        externals: &[ExternalSpectrum],
        band: &str,
    ) -> Result<(Vec<EmbeddingDataset>, BatchReport)> {
        let mut report = BatchReport::new("augment");
        let mask = self.mask_for(band, &coadded.wavelength)?;
        log::info!(
            "[augment] {} external spectra against {} sources ({band})",
            externals.len(),
            coadded.len()
        );

        let mut embeddings = Vec::with_capacity(externals.len());
        for external in externals {
            match self.augment_one(coadded, external, band, mask.as_ref()) {
                Ok(embedding) => {
                    embeddings.push(embedding);
                    report.processed += 1;
                }
                Err(e) => report.skip(external.name.clone(), e),
            }
        }
        Ok((embeddings, report.finish()))
    }

    fn augment_one(
        &self,
        coadded: &CoaddedDataset,
        external: &ExternalSpectrum,
        band: &str,
        mask: Option<&WavelengthMask>,
    ) -> Result<EmbeddingDataset> {
        let grid = coadded.wavelength.view();
        let flux = resample(grid, external.wavelength.view(), external.flux.view())?;
        let ivar = resample(grid, external.wavelength.view(), external.ivar.view())?;
        let coords = self.projector.embed_augmented(
            grid,
            coadded.flux.view(),
            coadded.ivar.view(),
            flux.view(),
            ivar.view(),
            mask,
        )?;

        let mut embedding = EmbeddingDataset::from_coordinates(band, &coadded.names, &coords);
        let last = coords.row(coords.nrows() - 1);
        embedding.points.push(EmbeddingPoint {
            name: external.name.clone(),
            x: last[0],
            y: last[1],
            augmented: true,
        });
        Ok(embedding)
    }

    /// Place external spectra into an existing embedding of `coadded`
    /// without refitting. Each lands at the inverse-distance-weighted mean of
    /// its nearest reference spectra; see
    /// [`EmbeddingProjector::project_nearest`].
    pub fn project_nearest(
        &self,
        coadded: &CoaddedDataset,
        reference: &EmbeddingDataset,
        externals: &[ExternalSpectrum],
    ) -> Result<(EmbeddingDataset, BatchReport)> {
        let mut report = BatchReport::new("project");
        let base: Vec<&EmbeddingPoint> = reference.points.iter().filter(|p| !p.augmented).collect();
        if base.len() != coadded.len() || base.iter().zip(&coadded.names).any(|(p, n)| &p.name != n) {
            return Err(PipelineError::Config(format!(
                "{} embedding does not list the coadded sources in order",
                reference.band
            )));
        }
        let coords = Array2::from_shape_fn((base.len(), 2), |(i, k)| {
            if k == 0 {
                base[i].x
            } else {
                base[i].y
            }
        });

        let mask = self.mask_for(&reference.band, &coadded.wavelength)?;
        let preprocessor = self.projector.preprocessor();
        let (grid, spectra) = match &mask {
            Some(mask) => {
                let grid = mask.select(&coadded.wavelength)?;
                let spectra = preprocessor.apply(
                    grid.view(),
                    &mask.select_columns(&coadded.flux)?,
                    &mask.select_columns(&coadded.ivar)?,
                )?;
                (grid, spectra)
            }
            None => (
                coadded.wavelength.clone(),
                preprocessor.apply(coadded.wavelength.view(), &coadded.flux, &coadded.ivar)?,
            ),
        };

        let mut projected = EmbeddingDataset {
            band: reference.band.clone(),
            points: base.into_iter().cloned().collect(),
        };
        for external in externals {
            let placed = resample(grid.view(), external.wavelength.view(), external.flux.view())
                .and_then(|flux| {
                    let ivar = resample(grid.view(), external.wavelength.view(), external.ivar.view())?;
                    preprocessor.apply(grid.view(), &flux, &ivar)
                })
                .and_then(|extra| {
                    self.projector
                        .project_nearest(spectra.view(), coords.view(), extra.view())
                });
            match placed {
                Ok([x, y]) => {
                    projected.points.push(EmbeddingPoint {
                        name: external.name.clone(),
                        x,
                        y,
                        augmented: true,
                    });
                    report.processed += 1;
                }
                Err(e) => report.skip(external.name.clone(), e),
            }
        }
        Ok((projected, report.finish()))
    }

    // -- continuum ----------------------------------------------------------

    /// Subtract each spectrum's continuum, then denoise with the coadded
    /// ivar, normalize and embed. Failed fits pass through and are flagged.
    /// A failed embedding is reported and leaves the subtracted fluxes
    /// without one.
    pub fn remove_continuum(
        &self,
        coadded: &CoaddedDataset,
    ) -> Result<(ContinuumSubtractedDataset, BatchReport)> {
        let mut report = BatchReport::new("continuum");
        log::info!("[continuum] {} spectra", coadded.len());

        let (flux, outcomes) = self
            .remover
            .subtract_batch(coadded.wavelength.view(), coadded.flux.view())?;
        for (name, outcome) in coadded.names.iter().zip(outcomes) {
            report.processed += 1;
            if let ContinuumOutcome::PassedThrough(reason) = outcome {
                report.flag(name.clone(), format!("continuum kept: {reason}"));
            }
        }

        let embedding = match self.projector.embed_spectra(
            coadded.wavelength.view(),
            flux.view(),
            coadded.ivar.view(),
            None,
        ) {
            Ok(coords) => Some(EmbeddingDataset::from_coordinates(FULL_BAND, &coadded.names, &coords)),
            Err(e) => {
                report.skip("embedding", e);
                None
            }
        };
        let dataset = ContinuumSubtractedDataset {
            names: coadded.names.clone(),
            classifications: coadded.classifications.clone(),
            wavelength: coadded.wavelength.clone(),
            flux,
            embedding,
        };
        Ok((dataset, report.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Arm;
    use ndarray::Array1;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.arms.blue_bins = 10;
        config.arms.red_bins = 8;
        config.arms.infrared_bins = 12;
        config.arms.overlap_blue_red = 2;
        config.arms.overlap_red_infrared = 3;
        config.embedding.max_iter = 150;
        config.embedding.exaggeration_iter = 50;
        config
    }

    fn reading(name: &str, id: u64, arm: Arm, level: f64) -> ArmReading {
        let (start, len) = match arm {
            Arm::Blue => (0, 10),
            Arm::Red => (8, 8),
            Arm::Infrared => (13, 12),
        };
        ArmReading {
            key: ExposureKey {
                name: name.to_string(),
                exposure_id: id,
                date: "20210517".to_string(),
            },
            arm,
            wavelength: Array1::from_shape_fn(len, |i| 4000.0 + 125.0 * (start + i) as f64),
            flux: Array1::from_shape_fn(len, |i| level + ((start + i) as f64 * 0.1 * level).sin()),
            ivar: Array1::from_elem(len, 4.0),
        }
    }

    fn exposure_readings(name: &str, id: u64, level: f64) -> Vec<ArmReading> {
        Arm::ALL.iter().map(|&arm| reading(name, id, arm, level)).collect()
    }

    #[test]
    fn join_reports_unknown_and_incomplete_exposures() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let lookup: ClassificationLookup = [("WDJ1", "DA"), ("WDJ2", "NULL")].into_iter().collect();

        let mut readings = exposure_readings("J1", 1, 5.0);
        readings.extend(exposure_readings("J2", 2, 5.0));
        readings.extend(exposure_readings("J3", 3, 5.0));
        readings.push(reading("J1", 4, Arm::Blue, 5.0));

        let (set, report) = ctx.join_exposures(readings, &lookup);
        assert_eq!(set.len(), 2);
        assert_eq!(set.wavelength.len(), 25);
        assert_eq!(set.wavelength[24], 4000.0 + 125.0 * 24.0);
        assert_eq!(report.processed, 2);
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.item.as_str()).collect();
        assert_eq!(skipped, vec!["J1/4/20210517", "J3/3/20210517"]);
    }

    #[test]
    fn stack_drops_excluded_sources() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let lookup: ClassificationLookup = [("J1", "DA"), ("J2", "NULL")].into_iter().collect();
        let mut readings = exposure_readings("J1", 1, 5.0);
        readings.extend(exposure_readings("J1", 2, 7.0));
        readings.extend(exposure_readings("J2", 3, 5.0));

        let (set, _) = ctx.join_exposures(readings, &lookup);
        let (coadded, report) = ctx.stack_sources(&set).unwrap();
        assert_eq!(coadded.names, vec!["J1".to_string()]);
        assert_eq!(coadded.classifications, vec![Classification::parse("DA")]);
        assert_eq!(coadded.flux.dim(), (1, 25));
        assert!((coadded.flux[[0, 0]] - 6.0).abs() < 1e-12);
        assert_eq!(coadded.ivar[[0, 0]], 8.0);
        assert!(report.is_clean());
    }

    fn coadded(n: usize) -> CoaddedDataset {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let names: Vec<String> = (0..n).map(|i| format!("J{i}")).collect();
        let lookup: ClassificationLookup = names.iter().map(|n| (n.as_str(), "DA")).collect();
        let readings = names
            .iter()
            .enumerate()
            .flat_map(|(i, name)| exposure_readings(name, i as u64, 3.0 + i as f64))
            .collect();
        let (set, _) = ctx.join_exposures(readings, &lookup);
        ctx.stack_sources(&set).unwrap().0
    }

    #[test]
    fn reduce_covers_full_grid_and_bands() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let data = coadded(5);
        let (embeddings, report) = ctx.reduce_bands(&data);
        let bands: Vec<&str> = embeddings.iter().map(|e| e.band.as_str()).collect();
        assert_eq!(bands, vec!["full", "he_line", "cv_lines"]);
        assert!(embeddings.iter().all(|e| e.len() == 5));
        assert!(report.is_clean());
    }

    #[test]
    fn augment_appends_flagged_row() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let data = coadded(4);
        let external = ExternalSpectrum {
            name: "sdss-1".to_string(),
            wavelength: Array1::linspace(3900.0, 7200.0, 60),
            flux: Array1::from_shape_fn(60, |i| 4.0 + (i as f64 * 0.3).cos()),
            ivar: Array1::from_elem(60, 2.0),
        };
        let (embeddings, report) = ctx.augment(&data, &[external], FULL_BAND).unwrap();
        assert_eq!(report.processed, 1);
        let embedding = &embeddings[0];
        assert_eq!(embedding.len(), 5);
        assert_eq!(embedding.augmented_point().map(|p| p.name.as_str()), Some("sdss-1"));
        assert!(embedding.points[..4].iter().all(|p| !p.augmented));

        assert!(ctx.augment(&data, &[], "nope").is_err());
    }

    #[test]
    fn nearest_projection_keeps_reference_layout() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let data = coadded(4);
        let (embeddings, _) = ctx.reduce_bands(&data);
        let reference = &embeddings[0];

        // an exact copy of J1 lands on J1
        let copy = ExternalSpectrum {
            name: "copy".to_string(),
            wavelength: data.wavelength.clone(),
            flux: data.flux.row(1).to_owned(),
            ivar: data.ivar.row(1).to_owned(),
        };
        let (projected, report) = ctx.project_nearest(&data, reference, &[copy]).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(projected.points[..4], reference.points[..]);
        let placed = projected.augmented_point().unwrap();
        assert_eq!((placed.x, placed.y), (reference.points[1].x, reference.points[1].y));

        let mut shuffled = reference.clone();
        shuffled.points.swap(0, 1);
        assert!(ctx.project_nearest(&data, &shuffled, &[]).is_err());
    }

    #[test]
    fn continuum_flags_degenerate_spectra() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let mut data = coadded(4);
        data.flux.row_mut(2).fill(f64::NAN);
        let (result, report) = ctx.remove_continuum(&data).unwrap();
        assert_eq!(result.flux.dim(), (4, 25));
        assert_eq!(result.embedding.map(|e| e.len()), Some(4));
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].item, "J2");
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn continuum_keeps_fluxes_when_embedding_fails() {
        let ctx = PipelineContext::new(small_config()).unwrap();
        let data = coadded(1);
        let (result, report) = ctx.remove_continuum(&data).unwrap();
        assert_eq!(result.flux.dim(), (1, 25));
        assert!(result.flux.iter().all(|v| v.is_finite()));
        assert!(result.embedding.is_none());
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].item, "embedding");
        assert!(report.skipped[0].reason.contains("at least 2 spectra"));
    }

    #[test]
    fn report_summary_lists_items() {
        let mut report = BatchReport::new("join");
        report.processed = 3;
        report.skip("J1/1/20210101", PipelineError::MissingArm { arm: Arm::Red });
        let text = report.to_string();
        assert!(text.starts_with("join: 3 processed, 1 skipped, 0 flagged"));
        assert!(text.contains("J1/1/20210101: red arm reading is missing"));
    }
}
