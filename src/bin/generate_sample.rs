use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use desi_wd_pipeline::config::ArmLayout;
use desi_wd_pipeline::data::model::Arm;

/// Write a synthetic exposure tree and classification catalogue.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "sample_data")]
    output: PathBuf,
    #[arg(long, default_value_t = 24)]
    sources: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

const GRID_START: f64 = 3600.0;
const GRID_STEP: f64 = 0.8;
const NIGHTS: [&str; 3] = ["20210517", "20210602", "20210611"];

/// Balmer series and the strongest optical He I lines, Angstrom.
const BALMER: [f64; 5] = [4102.0, 4341.0, 4861.0, 6563.0, 3970.0];
const HELIUM: [f64; 5] = [4471.0, 4922.0, 5016.0, 5876.0, 6678.0];

#[derive(Clone, Copy)]
enum Kind {
    Hydrogen,
    Helium,
    Featureless,
    Cataclysmic,
    Unclassified,
}

impl Kind {
    fn label(self) -> &'static str {
        match self {
            Kind::Hydrogen => "DA",
            Kind::Helium => "DB",
            Kind::Featureless => "DC",
            Kind::Cataclysmic => "CV",
            Kind::Unclassified => "NULL",
        }
    }
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Planck-like continuum in arbitrary units.
fn continuum(wavelength: f64, teff: f64) -> f64 {
    let x = 1.4388e8 / (wavelength * teff);
    1e20 / (wavelength.powi(5) * (x.exp() - 1.0))
}

fn model_flux(wavelength: f64, kind: Kind, teff: f64) -> f64 {
    let base = continuum(wavelength, teff);
    let lines: f64 = match kind {
        Kind::Hydrogen => BALMER.iter().map(|&mu| -gaussian(wavelength, mu, 20.0, 0.5)).sum(),
        Kind::Helium => HELIUM.iter().map(|&mu| -gaussian(wavelength, mu, 8.0, 0.35)).sum(),
        Kind::Cataclysmic => BALMER.iter().map(|&mu| gaussian(wavelength, mu, 6.0, 1.5)).sum(),
        Kind::Featureless | Kind::Unclassified => 0.0,
    };
    base * (1.0 + lines)
}

fn arm_range(layout: &ArmLayout, arm: Arm) -> (usize, usize) {
    let red_start = layout.blue_bins - layout.overlap_blue_red;
    match arm {
        Arm::Blue => (0, layout.blue_bins),
        Arm::Red => (red_start, layout.red_bins),
        Arm::Infrared => (
            red_start + layout.red_bins - layout.overlap_red_infrared,
            layout.infrared_bins,
        ),
    }
}

fn write_arm(
    path: &Path,
    layout: &ArmLayout,
    arm: Arm,
    kind: Kind,
    teff: f64,
    snr: f64,
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    let (start, len) = arm_range(layout, arm);
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "# wavelength flux ivar")?;
    let unit = Normal::new(0.0, 1.0)?;
    for i in start..start + len {
        let wavelength = GRID_START + GRID_STEP * i as f64;
        let flux = model_flux(wavelength, kind, teff);
        let sigma = (flux.abs() / snr).max(1e-3);
        // a few dead pixels per arm
        let ivar = if rng.gen::<f64>() < 0.002 { 0.0 } else { 1.0 / sigma.powi(2) };
        let observed = flux + sigma * unit.sample(rng);
        writeln!(out, "{wavelength:.4} {observed:.6e} {ivar:.6e}")?;
    }
    out.flush()?;
    Ok(())
}

fn j2000_name(rng: &mut ChaCha8Rng) -> String {
    let ra = rng.gen_range(0.0..86400.0_f64);
    let dec = rng.gen_range(0.0..324000.0_f64);
    let (h, m, s) = ((ra / 3600.0) as u32, ((ra % 3600.0) / 60.0) as u32, ra % 60.0);
    let (d, am, asec) = ((dec / 3600.0) as u32, ((dec % 3600.0) / 60.0) as u32, dec % 60.0);
    format!("J{h:02}{m:02}{s:05.2}-{d:02}{am:02}{asec:05.2}")
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let layout = ArmLayout::default();
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    let kinds = [
        Kind::Hydrogen,
        Kind::Hydrogen,
        Kind::Helium,
        Kind::Featureless,
        Kind::Cataclysmic,
        Kind::Unclassified,
    ];

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let catalogue_path = args.output.join("classifications.csv");
    let mut catalogue = csv::Writer::from_path(&catalogue_path)
        .with_context(|| format!("creating {}", catalogue_path.display()))?;
    catalogue.write_record(["wdj_name", "desi_sp_class", "teff"])?;

    let mut exposure_id: u64 = 89000;
    let mut files = 0usize;
    for n in 0..args.sources {
        let kind = kinds[n % kinds.len()];
        let name = j2000_name(&mut rng);
        let teff = rng.gen_range(7000.0..30000.0_f64);
        let target_id: u64 = rng.gen_range(39627000000000000..39628000000000000);
        catalogue.write_record([format!("WD{name}"), kind.label().to_string(), format!("{teff:.0}")])?;

        let n_exposures = rng.gen_range(1..=3);
        for night in NIGHTS.iter().take(n_exposures) {
            exposure_id += 1;
            let snr = rng.gen_range(5.0..40.0);
            let dir = args.output.join(night);
            std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            for arm in Arm::ALL {
                let file_name = format!(
                    "{name}_DESI_{target_id}-{night}-{exposure_id:08}-900-{}.dat",
                    arm.suffix()
                );
                write_arm(&dir.join(file_name), &layout, arm, kind, teff, snr, &mut rng)?;
                files += 1;
            }
        }
    }
    catalogue.flush()?;

    println!(
        "Wrote {files} arm files for {} sources ({} bins per exposure) to {}",
        args.sources,
        layout.joined_len(),
        args.output.display()
    );
    Ok(())
}
