use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Arm – one detector band of the spectrograph
// ---------------------------------------------------------------------------

/// Spectrograph arm, in wavelength order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Arm {
    Blue,
    Red,
    Infrared,
}

impl Arm {
    pub const ALL: [Arm; 3] = [Arm::Blue, Arm::Red, Arm::Infrared];

    /// Single-letter suffix used in exposure filenames.
    pub fn suffix(self) -> &'static str {
        match self {
            Arm::Blue => "b",
            Arm::Red => "r",
            Arm::Infrared => "z",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arm::Blue => "blue",
            Arm::Red => "red",
            Arm::Infrared => "infrared",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Arm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "b" => Ok(Arm::Blue),
            "r" => Ok(Arm::Red),
            "z" => Ok(Arm::Infrared),
            other => Err(format!("unknown arm '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification – spectral type label or the excluded sentinel
// ---------------------------------------------------------------------------

/// Literal used upstream for objects without a usable classification.
pub const EXCLUDED_SENTINEL: &str = "NULL";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Classification {
    Label(String),
    Excluded,
}

impl Classification {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == EXCLUDED_SENTINEL || raw.is_empty() {
            Classification::Excluded
        } else {
            Classification::Label(raw.to_string())
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Classification::Excluded)
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Classification::Label(l) => Some(l),
            Classification::Excluded => None,
        }
    }

    /// Two-letter spectral class code ("DA", "DB", ...). `WD+MS` maps to `WM`.
    pub fn class_code(&self) -> Option<String> {
        let label = self.label()?;
        if label == "WD+MS" {
            return Some("WM".to_string());
        }
        Some(label.chars().take(2).collect())
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Label(l) => write!(f, "{l}"),
            Classification::Excluded => write!(f, "{EXCLUDED_SENTINEL}"),
        }
    }
}

/// Source name to classification, as given by the external catalogue.
///
/// Catalogue names carry a `WD` prefix (`WDJ000006.84-034458.70`) that the
/// exposure filenames lack; it is stripped on insert and lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationLookup {
    labels: BTreeMap<String, Classification>,
}

impl ClassificationLookup {
    pub fn normalize_name(raw: &str) -> &str {
        let raw = raw.trim();
        raw.strip_prefix("WD").unwrap_or(raw)
    }

    pub fn insert(&mut self, name: &str, classification: Classification) -> Option<Classification> {
        self.labels
            .insert(Self::normalize_name(name).to_string(), classification)
    }

    pub fn get(&self, name: &str) -> Option<&Classification> {
        self.labels.get(Self::normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ClassificationLookup {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut lookup = ClassificationLookup::default();
        for (name, label) in iter {
            lookup.insert(name, Classification::parse(label));
        }
        lookup
    }
}

// ---------------------------------------------------------------------------
// Exposure identity and readings
// ---------------------------------------------------------------------------

/// (source name, exposure id, observation date) triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExposureKey {
    pub name: String,
    pub exposure_id: u64,
    /// Observation night, `YYYYMMDD`.
    pub date: String,
}

impl fmt::Display for ExposureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.exposure_id, self.date)
    }
}

/// One arm of one exposure: aligned (wavelength, flux, ivar) columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmReading {
    pub key: ExposureKey,
    pub arm: Arm,
    pub wavelength: Array1<f64>,
    pub flux: Array1<f64>,
    pub ivar: Array1<f64>,
}

impl ArmReading {
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }
}

/// Flux and inverse variance on a shared grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub flux: Array1<f64>,
    pub ivar: Array1<f64>,
}

impl Measurement {
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }
}

/// A joined exposure. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub key: ExposureKey,
    pub classification: Classification,
    pub spectrum: Measurement,
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// Joined exposures of many sources on one wavelength grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSet {
    pub wavelength: Array1<f64>,
    pub exposures: Vec<Exposure>,
}

impl ExposureSet {
    pub fn len(&self) -> usize {
        self.exposures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }
}

/// One row per source: the durable unit consumed by all downstream stages.
#[derive(Debug, Clone, PartialEq)]
pub struct CoaddedDataset {
    pub names: Vec<String>,
    pub classifications: Vec<Classification>,
    pub wavelength: Array1<f64>,
    /// `names.len()` x `wavelength.len()`.
    pub flux: Array2<f64>,
    pub ivar: Array2<f64>,
}

impl CoaddedDataset {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One 2-D coordinate per source, plus the optional out-of-sample row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingPoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// True for the externally sourced row of an augmented embedding.
    pub augmented: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingDataset {
    /// Band the embedding was computed on (`"full"` for the whole grid).
    pub band: String,
    pub points: Vec<EmbeddingPoint>,
}

impl EmbeddingDataset {
    pub fn from_coordinates(band: &str, names: &[String], coords: &Array2<f64>) -> Self {
        let points = names
            .iter()
            .zip(coords.rows())
            .map(|(name, row)| EmbeddingPoint {
                name: name.clone(),
                x: row[0],
                y: row[1],
                augmented: false,
            })
            .collect();
        EmbeddingDataset {
            band: band.to_string(),
            points,
        }
    }

    /// The out-of-sample row, if this is an augmented embedding.
    pub fn augmented_point(&self) -> Option<&EmbeddingPoint> {
        self.points.iter().find(|p| p.augmented)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Continuum-subtracted fluxes with the embedding computed from them.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumSubtractedDataset {
    pub names: Vec<String>,
    pub classifications: Vec<Classification>,
    pub wavelength: Array1<f64>,
    pub flux: Array2<f64>,
    /// `None` when the reduction failed; the fluxes are still valid.
    pub embedding: Option<EmbeddingDataset>,
}

/// An externally sourced spectrum on its own wavelength grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSpectrum {
    pub name: String,
    pub wavelength: Array1<f64>,
    pub flux: Array1<f64>,
    pub ivar: Array1<f64>,
}

// ---------------------------------------------------------------------------
// On-disk records
// ---------------------------------------------------------------------------

/// One row of a persisted spectral table (Parquet or JSON).
///
/// `x` is the wavelength grid and `y` the flux, the same list-column layout
/// the spectral viewer reads. Exposure tables also carry `exposure_id` and
/// `date`; continuum-subtracted tables have no `ivar`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumRecord {
    pub name: String,
    pub classification: String,
    pub exposure_id: Option<u64>,
    pub date: Option<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub ivar: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_label_is_excluded() {
        assert!(Classification::parse("NULL").is_excluded());
        assert!(Classification::parse("  ").is_excluded());
        assert_eq!(
            Classification::parse("DA"),
            Classification::Label("DA".to_string())
        );
    }

    #[test]
    fn class_codes() {
        let code = |s: &str| Classification::parse(s).class_code();
        assert_eq!(code("DAH").as_deref(), Some("DA"));
        assert_eq!(code("WD+MS").as_deref(), Some("WM"));
        assert_eq!(code("CV").as_deref(), Some("CV"));
        assert_eq!(code("NULL"), None);
    }

    #[test]
    fn lookup_strips_catalogue_prefix() {
        let lookup: ClassificationLookup =
            [("WDJ000006.84-034458.70", "DA"), ("J1", "NULL")].into_iter().collect();
        assert_eq!(
            lookup.get("J000006.84-034458.70"),
            Some(&Classification::Label("DA".to_string()))
        );
        assert_eq!(lookup.get("WDJ1"), Some(&Classification::Excluded));
        assert_eq!(lookup.get("J2"), None);
    }

    #[test]
    fn arm_suffix_roundtrip() {
        for arm in Arm::ALL {
            assert_eq!(arm.suffix().parse::<Arm>(), Ok(arm));
        }
        assert!("x".parse::<Arm>().is_err());
    }
}
