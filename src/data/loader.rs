use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::datatypes::{DataType, Int32Type, Int64Type, UInt64Type};
use ndarray::{Array1, Array2};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::model::{
    Arm, ArmReading, Classification, ClassificationLookup, CoaddedDataset, EmbeddingDataset,
    EmbeddingPoint, Exposure, ExposureKey, ExposureSet, ExternalSpectrum, Measurement,
    SpectrumRecord,
};
use crate::pipeline::BatchReport;

// ---------------------------------------------------------------------------
// Arm readings
// ---------------------------------------------------------------------------

/// Parse `(source, exposure id, date, arm)` out of an arm filename.
///
/// Layout: `<name>_DESI_<targetid>-<YYYYMMDD>-<expid>-<exptime>-<arm>.dat`.
/// Fields are counted from the end because the J2000 name contains a hyphen.
pub fn parse_arm_filename(path: &Path) -> Result<(ExposureKey, Arm)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{}: not a valid file name", path.display()))?;
    let stem = file_name.strip_suffix(".dat").unwrap_or(file_name);

    let name = stem
        .split('_')
        .next()
        .filter(|n| !n.is_empty())
        .with_context(|| format!("{file_name}: no source name"))?;
    let fields: Vec<&str> = stem.split('-').collect();
    if fields.len() < 5 {
        bail!("{file_name}: expected at least 5 '-'-separated fields, got {}", fields.len());
    }
    let n = fields.len();
    let arm: Arm = fields[n - 1]
        .parse()
        .map_err(|e| anyhow::anyhow!("{file_name}: {e}"))?;
    let exposure_id: u64 = fields[n - 3]
        .parse()
        .with_context(|| format!("{file_name}: exposure id '{}' is not a number", fields[n - 3]))?;
    let date = fields[n - 4];
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        bail!("{file_name}: date '{date}' is not YYYYMMDD");
    }

    let key = ExposureKey {
        name: name.to_string(),
        exposure_id,
        date: date.to_string(),
    };
    Ok((key, arm))
}

/// Whitespace-separated `wavelength flux ivar` rows. `#` lines and blank
/// lines are ignored; extra columns are ignored.
fn parse_columns(text: &str, origin: &str) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut ivar = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = line.split_whitespace();
        let mut next = |col: &str| -> Result<f64> {
            let tok = cols
                .next()
                .with_context(|| format!("{origin}:{}: missing {col} column", line_no + 1))?;
            tok.parse::<f64>()
                .with_context(|| format!("{origin}:{}: {col} '{tok}' is not a number", line_no + 1))
        };
        wavelength.push(next("wavelength")?);
        flux.push(next("flux")?);
        ivar.push(next("ivar")?);
    }
    Ok((wavelength, flux, ivar))
}

/// Read one arm file.
pub fn read_arm_file(path: &Path) -> Result<ArmReading> {
    let (key, arm) = parse_arm_filename(path)?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let (wavelength, flux, ivar) = parse_columns(&text, &path.display().to_string())?;
    Ok(ArmReading {
        key,
        arm,
        wavelength: Array1::from(wavelength),
        flux: Array1::from(flux),
        ivar: Array1::from(ivar),
    })
}

/// All `.dat` files below `root`, sorted.
pub fn discover_arm_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("listing {}", dir.display()))?;
        for entry in entries {
            let path = entry.with_context(|| format!("listing {}", dir.display()))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("dat") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Read every arm file below `root`. Unreadable files are reported and
/// left out; an unreadable directory is an error.
pub fn load_arm_readings(root: &Path) -> Result<(Vec<ArmReading>, BatchReport)> {
    let files = discover_arm_files(root)?;
    log::info!("[load] {} arm files under {}", files.len(), root.display());

    let results: Vec<(PathBuf, Result<ArmReading>)> = files
        .into_par_iter()
        .map(|path| {
            let reading = read_arm_file(&path);
            (path, reading)
        })
        .collect();

    let mut report = BatchReport::new("load");
    let mut readings = Vec::with_capacity(results.len());
    for (path, result) in results {
        match result {
            Ok(reading) => {
                readings.push(reading);
                report.processed += 1;
            }
            Err(e) => report.skip(path.display().to_string(), format!("{e:#}")),
        }
    }
    Ok((readings, report))
}

// ---------------------------------------------------------------------------
// Classification catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogueRow {
    wdj_name: String,
    #[serde(default)]
    desi_sp_class: String,
}

/// Read the `wdj_name,desi_sp_class` catalogue. Other columns are ignored.
pub fn load_classifications(path: &Path) -> Result<ClassificationLookup> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lookup = ClassificationLookup::default();
    for (row_no, row) in reader.deserialize::<CatalogueRow>().enumerate() {
        let row = row.with_context(|| format!("{} row {row_no}", path.display()))?;
        if let Some(previous) = lookup.insert(&row.wdj_name, Classification::parse(&row.desi_sp_class)) {
            log::warn!("{} listed twice; replacing '{previous}'", row.wdj_name);
        }
    }
    log::info!("[load] {} classified sources from {}", lookup.len(), path.display());
    Ok(lookup)
}

// ---------------------------------------------------------------------------
// Spectral tables
// ---------------------------------------------------------------------------

/// Load a spectral table. Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – list columns `x`, `y`, optional `ivar`; scalar `name`,
///   `classification`, optional `exposure_id`, `date`
/// * `.json`    – `[{ "name": ..., "x": [...], "y": [...], ... }, ...]`
pub fn load_records(path: &Path) -> Result<Vec<SpectrumRecord>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

/// Load joined exposures written by the `join` stage.
pub fn load_exposure_set(path: &Path) -> Result<ExposureSet> {
    let records = load_records(path)?;
    let wavelength = shared_grid(&records)?;
    let exposures = records
        .into_iter()
        .enumerate()
        .map(|(i, rec)| {
            let exposure_id = rec
                .exposure_id
                .with_context(|| format!("Row {i}: missing 'exposure_id'"))?;
            let date = rec
                .date
                .with_context(|| format!("Row {i}: missing 'date'"))?;
            let ivar = rec
                .ivar
                .with_context(|| format!("Row {i}: missing 'ivar'"))?;
            Ok(Exposure {
                key: ExposureKey {
                    name: rec.name,
                    exposure_id,
                    date,
                },
                classification: Classification::parse(&rec.classification),
                spectrum: Measurement {
                    flux: Array1::from(rec.y),
                    ivar: Array1::from(ivar),
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ExposureSet {
        wavelength,
        exposures,
    })
}

/// Load a coadded dataset written by the `stack` stage.
pub fn load_coadded(path: &Path) -> Result<CoaddedDataset> {
    let records = load_records(path)?;
    let wavelength = shared_grid(&records)?;
    let width = wavelength.len();

    let mut flux = Array2::<f64>::zeros((records.len(), width));
    let mut ivar = Array2::<f64>::zeros((records.len(), width));
    let mut names = Vec::with_capacity(records.len());
    let mut classifications = Vec::with_capacity(records.len());
    for (i, rec) in records.into_iter().enumerate() {
        let row_ivar = rec
            .ivar
            .with_context(|| format!("Row {i}: missing 'ivar'"))?;
        if row_ivar.len() != width {
            bail!("Row {i}: ivar has {} values, grid has {width}", row_ivar.len());
        }
        flux.row_mut(i).assign(&Array1::from(rec.y));
        ivar.row_mut(i).assign(&Array1::from(row_ivar));
        names.push(rec.name);
        classifications.push(Classification::parse(&rec.classification));
    }

    log::info!("[load] {} coadded spectra x {width} bins from {}", names.len(), path.display());
    Ok(CoaddedDataset {
        names,
        classifications,
        wavelength,
        flux,
        ivar,
    })
}

/// The grid of the first row; every row must match its length.
fn shared_grid(records: &[SpectrumRecord]) -> Result<Array1<f64>> {
    let Some(first) = records.first() else {
        return Ok(Array1::zeros(0));
    };
    let width = first.x.len();
    for (i, rec) in records.iter().enumerate() {
        if rec.x.len() != width || rec.y.len() != width {
            bail!(
                "Row {i}: x has {} and y {} values, first row has {width}",
                rec.x.len(),
                rec.y.len()
            );
        }
    }
    Ok(Array1::from(first.x.clone()))
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON:
///
/// ```json
/// [
///   {
///     "name": "J000006.84-034458.70",
///     "classification": "DA",
///     "x": [3600.0, 3600.8, ...],
///     "y": [12.1,   11.9,   ...],
///     "ivar": [0.4, 0.5,    ...]
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<Vec<SpectrumRecord>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .with_context(|| format!("Row {i} is not a JSON object"))?;

            let x = json_array_to_f64(obj.get("x"), i, "x")?;
            let y = json_array_to_f64(obj.get("y"), i, "y")?;
            let ivar = match obj.get("ivar") {
                Some(JsonValue::Null) | None => None,
                val => Some(json_array_to_f64(val, i, "ivar")?),
            };
            if x.len() != y.len() {
                bail!("Row {i}: x has {} values but y has {}", x.len(), y.len());
            }

            let name = obj
                .get("name")
                .and_then(|v| v.as_str())
                .with_context(|| format!("Row {i}: missing 'name'"))?;
            let classification = obj
                .get("classification")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            Ok(SpectrumRecord {
                name: name.to_string(),
                classification: classification.to_string(),
                exposure_id: obj.get("exposure_id").and_then(|v| v.as_u64()),
                date: obj.get("date").and_then(json_to_string),
                x,
                y,
                ivar,
            })
        })
        .collect()
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            // NaN and infinities are written as null
            JsonValue::Null => Ok(f64::NAN),
            v => v
                .as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number")),
        })
        .collect()
}

fn json_to_string(val: &JsonValue) -> Option<String> {
    match val {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Works with files written by this crate as well as by Pandas
/// (`df.to_parquet()`) and Polars (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<Vec<SpectrumRecord>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut records = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let column = |name: &str| {
            schema
                .index_of(name)
                .map(|i| batch.column(i))
                .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))
        };
        let optional = |name: &str| schema.index_of(name).ok().map(|i| batch.column(i));

        let x_col = column("x")?;
        let y_col = column("y")?;
        let name_col = column("name")?;
        let class_col = optional("classification");
        let ivar_col = optional("ivar");
        let id_col = optional("exposure_id");
        let date_col = optional("date");

        for row in 0..batch.num_rows() {
            let x = extract_f64_list(x_col, row)
                .with_context(|| format!("Row {row}: failed to read 'x'"))?;
            let y = extract_f64_list(y_col, row)
                .with_context(|| format!("Row {row}: failed to read 'y'"))?;
            if x.len() != y.len() {
                bail!("Row {row}: x has {} values but y has {}", x.len(), y.len());
            }
            let ivar = ivar_col
                .map(|col| extract_f64_list(col, row))
                .transpose()
                .with_context(|| format!("Row {row}: failed to read 'ivar'"))?;

            records.push(SpectrumRecord {
                name: extract_string(name_col, row)?
                    .with_context(|| format!("Row {row}: null 'name'"))?,
                classification: class_col
                    .map(|col| extract_string(col, row))
                    .transpose()?
                    .flatten()
                    .unwrap_or_default(),
                exposure_id: id_col.map(|col| extract_u64(col, row)).transpose()?.flatten(),
                date: date_col.map(|col| extract_string(col, row)).transpose()?.flatten(),
                x,
                y,
                ivar,
            });
        }
    }

    Ok(records)
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<Option<String>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Utf8 => col.as_string::<i32>().value(row).to_string(),
        DataType::LargeUtf8 => col.as_string::<i64>().value(row).to_string(),
        other => bail!("Expected string column, got {other:?}"),
    };
    Ok(Some(value))
}

fn extract_u64(col: &Arc<dyn Array>, row: usize) -> Result<Option<u64>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::UInt64 => col.as_primitive::<UInt64Type>().value(row),
        DataType::Int64 => u64::try_from(col.as_primitive::<Int64Type>().value(row))?,
        DataType::Int32 => u64::try_from(col.as_primitive::<Int32Type>().value(row))?,
        other => bail!("Expected integer column, got {other:?}"),
    };
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// External spectra
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExternalRow {
    #[serde(alias = "loglam")]
    wavelength: f64,
    flux: f64,
    ivar: f64,
}

/// Load a spectrum from another survey.
///
/// `.csv` files need `wavelength` (or `loglam`) plus `flux` and `ivar`
/// headers; any other file is read as whitespace-separated columns. With
/// `log_wavelength`, or a `loglam` header, wavelengths are stored as log10
/// and are converted to Angstrom.
pub fn load_external_spectrum(path: &Path, log_wavelength: bool) -> Result<ExternalSpectrum> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("{}: not a valid file name", path.display()))?
        .to_string();

    let is_csv = path.extension().and_then(|e| e.to_str()) == Some("csv");
    let (mut wavelength, flux, ivar, log_header) = if is_csv {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let log_header = reader
            .headers()
            .context("reading CSV headers")?
            .iter()
            .any(|h| h == "loglam");
        let rows = reader
            .deserialize::<ExternalRow>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("reading {}", path.display()))?;
        let (mut w, mut f, mut v) = (Vec::new(), Vec::new(), Vec::new());
        for row in rows {
            w.push(row.wavelength);
            f.push(row.flux);
            v.push(row.ivar);
        }
        (w, f, v, log_header)
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let (w, f, v) = parse_columns(&text, &path.display().to_string())?;
        (w, f, v, false)
    };

    if log_wavelength || log_header {
        for w in &mut wavelength {
            *w = 10f64.powf(*w);
        }
    }
    if wavelength.is_empty() {
        bail!("{}: no samples", path.display());
    }
    if wavelength.windows(2).any(|p| !(p[0] < p[1])) {
        bail!("{}: wavelength must be strictly increasing", path.display());
    }

    Ok(ExternalSpectrum {
        name,
        wavelength: Array1::from(wavelength),
        flux: Array1::from(flux),
        ivar: Array1::from(ivar),
    })
}

/// Read every external spectrum; unreadable files are listed in the report
/// and the rest are returned in input order.
pub fn load_external_spectra(paths: &[PathBuf], log_wavelength: bool) -> (Vec<ExternalSpectrum>, BatchReport) {
    let mut report = BatchReport::new("external");
    let mut spectra = Vec::with_capacity(paths.len());
    for path in paths {
        match load_external_spectrum(path, log_wavelength) {
            Ok(spectrum) => {
                spectra.push(spectrum);
                report.processed += 1;
            }
            Err(e) => report.skip(path.display().to_string(), format!("{e:#}")),
        }
    }
    (spectra, report)
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Read an embedding CSV (`name,x,y,augmented`).
pub fn load_embedding(path: &Path, band: &str) -> Result<EmbeddingDataset> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let points = reader
        .deserialize::<EmbeddingPoint>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(EmbeddingDataset {
        band: band.to_string(),
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn filename_fields_count_from_the_end() {
        let path = Path::new(
            "20210517/J000006.84-034458.70_DESI_39627783425870484-20210517-00089432-900-z.dat",
        );
        let (key, arm) = parse_arm_filename(path).unwrap();
        assert_eq!(key.name, "J000006.84-034458.70");
        assert_eq!(key.exposure_id, 89432);
        assert_eq!(key.date, "20210517");
        assert_eq!(arm, Arm::Infrared);
    }

    #[test]
    fn bad_filenames_are_rejected() {
        for bad in [
            "J1_DESI_1-20210517-1-900-q.dat",
            "J1_DESI_1-2021-1-900-b.dat",
            "J1_DESI_1-20210517-x-900-b.dat",
            "J1.dat",
        ] {
            assert!(parse_arm_filename(Path::new(bad)).is_err(), "{bad}");
        }
    }

    #[test]
    fn columns_skip_comments_and_blank_lines() {
        let text = "# wavelength flux ivar\n\n3600.0 1.5 0.25\n  3600.8\t-2.0   4 extra\n";
        let (w, f, v) = parse_columns(text, "t").unwrap();
        assert_eq!(w, vec![3600.0, 3600.8]);
        assert_eq!(f, vec![1.5, -2.0]);
        assert_eq!(v, vec![0.25, 4.0]);

        let err = parse_columns("1.0 2.0\n", "t.dat").unwrap_err();
        assert!(err.to_string().contains("t.dat:1: missing ivar column"));
    }

    #[test]
    fn classification_csv_strips_prefix() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "wdj_name,desi_sp_class,teff").unwrap();
        writeln!(file, "WDJ1,DAH,12000").unwrap();
        writeln!(file, "WDJ2,NULL,").unwrap();
        file.flush().unwrap();

        let lookup = load_classifications(file.path()).unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get("J1").and_then(|c| c.class_code()).as_deref(), Some("DA"));
        assert!(lookup.get("J2").is_some_and(|c| c.is_excluded()));
    }

    #[test]
    fn external_csv_in_log_wavelength() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "loglam,flux,ivar").unwrap();
        writeln!(file, "3.6,1.0,2.0").unwrap();
        writeln!(file, "3.7,3.0,4.0").unwrap();
        file.flush().unwrap();

        let spectrum = load_external_spectrum(file.path(), false).unwrap();
        assert!((spectrum.wavelength[0] - 10f64.powf(3.6)).abs() < 1e-9);
        assert_eq!(spectrum.flux.to_vec(), vec![1.0, 3.0]);
    }

    #[test]
    fn bad_external_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("spec-0266-51602-0001.txt");
        std::fs::write(&good, "4000.0 1.0 1.0\n4001.0 2.0 1.0\n").unwrap();
        let unsorted = dir.path().join("unsorted.txt");
        std::fs::write(&unsorted, "4001.0 1.0 1.0\n4000.0 2.0 1.0\n").unwrap();
        let missing = dir.path().join("missing.csv");

        let (spectra, report) =
            load_external_spectra(&[unsorted.clone(), good, missing.clone()], false);
        assert_eq!(spectra.len(), 1);
        assert_eq!(spectra[0].name, "spec-0266-51602-0001");
        assert_eq!(report.processed, 1);
        let skipped: Vec<String> = report.skipped.iter().map(|s| s.item.clone()).collect();
        assert_eq!(skipped, vec![unsorted.display().to_string(), missing.display().to_string()]);
        assert!(report.skipped[0].reason.contains("strictly increasing"));
    }

    #[test]
    fn json_records_allow_null_samples() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"name": "J1", "classification": "DB", "x": [1.0, 2.0], "y": [null, 3.0], "ivar": [0.0, 1.0]}}]"#
        )
        .unwrap();
        file.flush().unwrap();

        let coadded = load_coadded(file.path()).unwrap();
        assert_eq!(coadded.names, vec!["J1".to_string()]);
        assert!(coadded.flux[[0, 0]].is_nan());
        assert_eq!(coadded.ivar[[0, 1]], 1.0);
    }
}
