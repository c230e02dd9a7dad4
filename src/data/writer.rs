use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Builder, ListBuilder, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::model::{
    CoaddedDataset, ContinuumSubtractedDataset, EmbeddingDataset, ExposureSet, SpectrumRecord,
};

// ---------------------------------------------------------------------------
// Dataset → records
// ---------------------------------------------------------------------------

pub fn exposure_records(set: &ExposureSet) -> Vec<SpectrumRecord> {
    let x = set.wavelength.to_vec();
    set.exposures
        .iter()
        .map(|e| SpectrumRecord {
            name: e.key.name.clone(),
            classification: e.classification.to_string(),
            exposure_id: Some(e.key.exposure_id),
            date: Some(e.key.date.clone()),
            x: x.clone(),
            y: e.spectrum.flux.to_vec(),
            ivar: Some(e.spectrum.ivar.to_vec()),
        })
        .collect()
}

pub fn coadded_records(data: &CoaddedDataset) -> Vec<SpectrumRecord> {
    let x = data.wavelength.to_vec();
    (0..data.len())
        .map(|i| SpectrumRecord {
            name: data.names[i].clone(),
            classification: data.classifications[i].to_string(),
            exposure_id: None,
            date: None,
            x: x.clone(),
            y: data.flux.row(i).to_vec(),
            ivar: Some(data.ivar.row(i).to_vec()),
        })
        .collect()
}

pub fn continuum_records(data: &ContinuumSubtractedDataset) -> Vec<SpectrumRecord> {
    let x = data.wavelength.to_vec();
    data.names
        .iter()
        .zip(&data.classifications)
        .zip(data.flux.rows())
        .map(|((name, classification), flux)| SpectrumRecord {
            name: name.clone(),
            classification: classification.to_string(),
            exposure_id: None,
            date: None,
            x: x.clone(),
            y: flux.to_vec(),
            ivar: None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

fn list_column<'a>(rows: impl Iterator<Item = &'a [f64]>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        let values = builder.values();
        for &v in row {
            values.append_value(v);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        false,
    )
}

/// Write records as one Parquet row group. Optional columns are written
/// only when every record has them.
pub fn write_records(path: &Path, records: &[SpectrumRecord]) -> Result<()> {
    let mut fields = vec![
        list_field("x"),
        list_field("y"),
        Field::new("name", DataType::Utf8, false),
        Field::new("classification", DataType::Utf8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        list_column(records.iter().map(|r| r.x.as_slice())),
        list_column(records.iter().map(|r| r.y.as_slice())),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.name.as_str()))),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.classification.as_str()),
        )),
    ];

    let ivar: Option<Vec<&[f64]>> = records.iter().map(|r| r.ivar.as_deref()).collect();
    if let Some(ivar) = ivar.filter(|_| !records.is_empty()) {
        fields.push(list_field("ivar"));
        columns.push(list_column(ivar.into_iter()));
    }
    let ids: Option<Vec<u64>> = records.iter().map(|r| r.exposure_id).collect();
    let dates: Option<Vec<&str>> = records.iter().map(|r| r.date.as_deref()).collect();
    if let (Some(ids), Some(dates)) = (ids, dates) {
        if !records.is_empty() {
            fields.push(Field::new("exposure_id", DataType::UInt64, false));
            fields.push(Field::new("date", DataType::Utf8, false));
            columns.push(Arc::new(UInt64Array::from(ids)));
            columns.push(Arc::new(StringArray::from_iter_values(dates)));
        }
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;

    log::info!("wrote {} spectra to {}", records.len(), path.display());
    Ok(())
}

pub fn write_exposures(path: &Path, set: &ExposureSet) -> Result<()> {
    write_records(path, &exposure_records(set))
}

pub fn write_coadded(path: &Path, data: &CoaddedDataset) -> Result<()> {
    write_records(path, &coadded_records(data))
}

/// Continuum-subtracted spectra go to `path`; their embedding, if any, to
/// [`continuum_embedding_path`].
pub fn write_continuum(path: &Path, data: &ContinuumSubtractedDataset) -> Result<Option<PathBuf>> {
    write_records(path, &continuum_records(data))?;
    let Some(embedding) = &data.embedding else {
        log::warn!("no continuum embedding to write next to {}", path.display());
        return Ok(None);
    };
    let embedding_path = continuum_embedding_path(path);
    write_embedding(&embedding_path, embedding)?;
    Ok(Some(embedding_path))
}

/// `dir/stem.parquet` → `dir/stem_embedding.csv`.
pub fn continuum_embedding_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("continuum");
    path.with_file_name(format!("{stem}_embedding.csv"))
}

// ---------------------------------------------------------------------------
// Embedding CSV
// ---------------------------------------------------------------------------

pub fn write_embedding(path: &Path, embedding: &EmbeddingDataset) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for point in &embedding.points {
        writer.serialize(point).context("writing embedding row")?;
    }
    writer.flush().context("flushing embedding CSV")?;
    log::info!(
        "wrote {} embedding ({} points) to {}",
        embedding.band,
        embedding.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::{load_coadded, load_embedding, load_exposure_set, load_records};
    use crate::data::model::{
        Classification, EmbeddingPoint, Exposure, ExposureKey, Measurement,
    };
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn coadded() -> CoaddedDataset {
        CoaddedDataset {
            names: vec!["J1".to_string(), "J2".to_string()],
            classifications: vec![Classification::parse("DA"), Classification::parse("DBA")],
            wavelength: array![3600.0, 3601.0, 3602.0],
            flux: array![[1.0, 2.0, 3.0], [4.0, f64::NAN, 6.0]],
            ivar: array![[0.5, 0.5, 0.5], [1.0, 0.0, 1.0]],
        }
    }

    #[test]
    fn coadded_parquet_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coadded.parquet");
        let data = coadded();
        write_coadded(&path, &data).unwrap();

        let back = load_coadded(&path).unwrap();
        assert_eq!(back.names, data.names);
        assert_eq!(back.classifications, data.classifications);
        assert_eq!(back.wavelength, data.wavelength);
        assert_eq!(back.ivar, data.ivar);
        assert!(back.flux[[1, 1]].is_nan());
        assert_eq!(back.flux[[1, 2]], 6.0);
    }

    #[test]
    fn exposure_parquet_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("exposures.parquet");
        let set = ExposureSet {
            wavelength: array![1.0, 2.0],
            exposures: vec![Exposure {
                key: ExposureKey {
                    name: "J1".to_string(),
                    exposure_id: 89432,
                    date: "20210517".to_string(),
                },
                classification: Classification::Excluded,
                spectrum: Measurement {
                    flux: array![1.0, 2.0],
                    ivar: array![3.0, 4.0],
                },
            }],
        };
        write_exposures(&path, &set).unwrap();
        let back = load_exposure_set(&path).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn continuum_writes_table_and_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("continuum.parquet");
        let data = coadded();
        let subtracted = ContinuumSubtractedDataset {
            names: data.names.clone(),
            classifications: data.classifications.clone(),
            wavelength: data.wavelength.clone(),
            flux: data.flux.clone(),
            embedding: Some(EmbeddingDataset {
                band: "full".to_string(),
                points: vec![
                    EmbeddingPoint { name: "J1".to_string(), x: 0.5, y: -1.0, augmented: false },
                    EmbeddingPoint { name: "J2".to_string(), x: 2.0, y: 3.5, augmented: true },
                ],
            }),
        };
        let embedding_path = write_continuum(&path, &subtracted).unwrap().unwrap();
        assert_eq!(embedding_path, dir.path().join("continuum_embedding.csv"));

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.ivar.is_none() && r.exposure_id.is_none()));
        assert_eq!(Some(load_embedding(&embedding_path, "full").unwrap()), subtracted.embedding);
    }

    #[test]
    fn continuum_without_embedding_writes_table_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("continuum.parquet");
        let data = coadded();
        let subtracted = ContinuumSubtractedDataset {
            names: data.names.clone(),
            classifications: data.classifications.clone(),
            wavelength: data.wavelength.clone(),
            flux: data.flux.clone(),
            embedding: None,
        };
        assert_eq!(write_continuum(&path, &subtracted).unwrap(), None);
        assert_eq!(load_records(&path).unwrap().len(), 2);
        assert!(!continuum_embedding_path(&path).exists());
    }
}
