// ---------------------------------------------------------------------------
// Command line: one subcommand per pipeline stage, plus `run` for all of them.
// ---------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use desi_wd_pipeline::data::{loader, writer};
use desi_wd_pipeline::data::model::{CoaddedDataset, EmbeddingDataset};
use desi_wd_pipeline::pipeline::FULL_BAND;
use desi_wd_pipeline::{BatchReport, PipelineConfig, PipelineContext};

#[derive(Parser, Debug)]
#[command(
    name = "desi-wd-pipeline",
    version,
    about = "Join, coadd, preprocess and embed DESI white dwarf spectra."
)]
pub struct Cli {
    /// TOML configuration; defaults apply to anything it leaves out
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join the three arm files of every exposure
    Join(JoinArgs),
    /// Coadd the exposures of every source
    Stack(StackArgs),
    /// Embed the coadded set over the full grid and every configured band
    Reduce(ReduceArgs),
    /// Embed external spectra jointly with the coadded set
    Augment(AugmentArgs),
    /// Subtract continua and embed the residual spectra
    Continuum(ContinuumArgs),
    /// join → stack → reduce → continuum
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Directory tree holding the per-arm `.dat` files
    #[arg(long)]
    pub input: PathBuf,
    /// Catalogue CSV with `wdj_name` and `desi_sp_class` columns
    #[arg(long)]
    pub classifications: PathBuf,
    #[arg(long, default_value = "exposures.parquet")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct StackArgs {
    /// Joined exposures (`.parquet` or `.json`)
    #[arg(long, default_value = "exposures.parquet")]
    pub input: PathBuf,
    #[arg(long, default_value = "coadded.parquet")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ReduceArgs {
    /// Coadded dataset (`.parquet` or `.json`)
    #[arg(long, default_value = "coadded.parquet")]
    pub input: PathBuf,
    /// One `<band>.csv` per embedding is written here
    #[arg(long, default_value = "embeddings")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct AugmentArgs {
    #[arg(long, default_value = "coadded.parquet")]
    pub input: PathBuf,
    /// External spectra (`.csv` with headers, or whitespace columns)
    #[arg(long, required = true, num_args = 1..)]
    pub external: Vec<PathBuf>,
    /// Wavelength column holds log10(Angstrom)
    #[arg(long)]
    pub log_wavelength: bool,
    /// `full` or the name of a configured band
    #[arg(long, default_value = FULL_BAND)]
    pub band: String,
    /// Place the spectra into this existing embedding CSV instead of
    /// refitting t-SNE once per spectrum
    #[arg(long)]
    pub nearest: Option<PathBuf>,
    #[arg(long, default_value = "embeddings")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ContinuumArgs {
    #[arg(long, default_value = "coadded.parquet")]
    pub input: PathBuf,
    #[arg(long, default_value = "continuum.parquet")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub classifications: PathBuf,
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        let ctx = PipelineContext::new(config).context("invalid configuration")?;

        let reports = match self.command {
            Commands::Join(args) => run_join(&ctx, &args.input, &args.classifications, &args.output)?,
            Commands::Stack(args) => run_stack(&ctx, &args.input, &args.output)?.1,
            Commands::Reduce(args) => {
                let coadded = loader::load_coadded(&args.input)?;
                vec![run_reduce(&ctx, &coadded, &args.output_dir)?]
            }
            Commands::Augment(args) => run_augment(&ctx, &args)?,
            Commands::Continuum(args) => {
                let coadded = loader::load_coadded(&args.input)?;
                vec![run_continuum(&ctx, &coadded, &args.output)?]
            }
            Commands::Run(args) => run_all(&ctx, &args)?,
        };

        for report in &reports {
            print!("{report}");
        }
        Ok(())
    }
}

fn run_join(
    ctx: &PipelineContext,
    input: &Path,
    classifications: &Path,
    output: &Path,
) -> Result<Vec<BatchReport>> {
    let lookup = loader::load_classifications(classifications)?;
    let (readings, load_report) = loader::load_arm_readings(input)?;
    let (set, join_report) = ctx.join_exposures(readings, &lookup);
    if set.is_empty() {
        bail!("no exposure under {} could be joined", input.display());
    }
    writer::write_exposures(output, &set)?;
    Ok(vec![load_report, join_report])
}

fn run_stack(
    ctx: &PipelineContext,
    input: &Path,
    output: &Path,
) -> Result<(CoaddedDataset, Vec<BatchReport>)> {
    let set = loader::load_exposure_set(input)?;
    let (coadded, report) = ctx.stack_sources(&set)?;
    if coadded.is_empty() {
        bail!("no source in {} could be stacked", input.display());
    }
    writer::write_coadded(output, &coadded)?;
    Ok((coadded, vec![report]))
}

fn embedding_path(dir: &Path, embedding: &EmbeddingDataset, suffix: Option<&str>) -> PathBuf {
    match suffix {
        Some(suffix) => dir.join(format!("{}_{suffix}.csv", embedding.band)),
        None => dir.join(format!("{}.csv", embedding.band)),
    }
}

fn run_reduce(ctx: &PipelineContext, coadded: &CoaddedDataset, output_dir: &Path) -> Result<BatchReport> {
    let (embeddings, report) = ctx.reduce_bands(coadded);
    for embedding in &embeddings {
        writer::write_embedding(&embedding_path(output_dir, embedding, None), embedding)?;
    }
    Ok(report)
}

fn run_augment(ctx: &PipelineContext, args: &AugmentArgs) -> Result<Vec<BatchReport>> {
    let coadded = loader::load_coadded(&args.input)?;
    let (externals, load_report) = loader::load_external_spectra(&args.external, args.log_wavelength);
    if externals.is_empty() {
        print!("{load_report}");
        bail!("none of the {} external spectra could be read", args.external.len());
    }
    if let Some(path) = &args.nearest {
        let reference = loader::load_embedding(path, &args.band)?;
        let (projected, report) = ctx.project_nearest(&coadded, &reference, &externals)?;
        writer::write_embedding(&embedding_path(&args.output_dir, &projected, Some("projected")), &projected)?;
        return Ok(vec![load_report, report]);
    }
    let (embeddings, report) = ctx.augment(&coadded, &externals, &args.band)?;
    for embedding in &embeddings {
        let external = embedding
            .augmented_point()
            .map(|p| p.name.as_str())
            .unwrap_or("augmented");
        writer::write_embedding(&embedding_path(&args.output_dir, embedding, Some(external)), embedding)?;
    }
    Ok(vec![load_report, report])
}

fn run_continuum(ctx: &PipelineContext, coadded: &CoaddedDataset, output: &Path) -> Result<BatchReport> {
    let (subtracted, report) = ctx.remove_continuum(coadded)?;
    writer::write_continuum(output, &subtracted)?;
    Ok(report)
}

fn run_all(ctx: &PipelineContext, args: &RunArgs) -> Result<Vec<BatchReport>> {
    let exposures = args.output_dir.join("exposures.parquet");
    let coadded_path = args.output_dir.join("coadded.parquet");

    let mut reports = run_join(ctx, &args.input, &args.classifications, &exposures)?;
    let (coadded, stack_reports) = run_stack(ctx, &exposures, &coadded_path)?;
    reports.extend(stack_reports);
    reports.push(run_reduce(ctx, &coadded, &args.output_dir.join("embeddings"))?);
    reports.push(run_continuum(ctx, &coadded, &args.output_dir.join("continuum.parquet"))?);

    let mut total = BatchReport::new("total");
    for report in &reports {
        total.absorb(report.clone());
    }
    log::info!(
        "pipeline finished: {} items processed, {} skipped",
        total.processed,
        total.skipped.len()
    );
    Ok(reports)
}
