/// Data layer: core types, loading, writing, and filtering.
///
/// Architecture:
/// ```text
///  <night>/<name>_DESI_..-<arm>.dat     classification .csv
///        │                                   │
///        ▼                                   ▼
///   ┌──────────┐                      ┌──────────────────────┐
///   │  loader   │  text → ArmReading   │ ClassificationLookup  │
///   └──────────┘                      └──────────────────────┘
///        │
///        ▼   (join, stack, reduce: see crate::pipeline)
///   ┌────────────────┐
///   │ CoaddedDataset  │  names, grid, flux / ivar matrices
///   └────────────────┘
///        │                    ▲
///        ▼                    │ .parquet / .json
///   ┌──────────┐        ┌──────────┐
///   │  writer   │ ─────▶ │  loader   │
///   └──────────┘        └──────────┘
///        │
///   ┌──────────┐
///   │  filter   │  exclusion policy, wavelength band masks
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod writer;
