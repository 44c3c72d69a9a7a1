//! Command-line parsing for the EBT film dosimetry tool.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! extraction and fitting code. Every flag maps onto an explicit config struct
//! in `app`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::domain::{Channel, ModelSpec, RangeMode, RobustKind};
use crate::film::ExtractionMode;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "ebtdose", version, about = "Radiochromic EBT film dosimetry")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a calibration curve from dose/netOD points and save it as a bundle.
    Fit(FitArgs),
    /// Reconstruct dose from pre/post film scans with saved calibrations.
    Dose(DoseArgs),
    /// Inspect a saved calibration: formula, lookups and curve samples.
    Curve(CurveArgs),
    /// Write a synthetic calibration set and film scan pair.
    Sample(SampleArgs),
}

/// Options for fitting a calibration.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Calibration points CSV (`dose,netod[,netod_sigma|weight]` or `dose,red,green,blue`).
    #[arg(long, value_name = "CSV")]
    pub points: PathBuf,

    /// Film lot identifier.
    #[arg(long)]
    pub lot: String,

    /// Channel to calibrate.
    #[arg(short = 'c', long, value_enum, default_value_t = Channel::Red)]
    pub channel: Channel,

    /// Calibration date (YYYY-MM-DD).
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Where to write the calibration bundle (JSON).
    #[arg(short = 'o', long, value_name = "JSON")]
    pub out: PathBuf,

    #[command(flatten)]
    pub fit: FitOpts,

    /// Print fitted dose and residual per calibration point.
    #[arg(long)]
    pub residuals: bool,

    /// Export calibration points and fitted curve samples to CSV.
    #[arg(long = "export-curve", value_name = "CSV")]
    pub export_curve: Option<PathBuf>,

    /// Write a markdown fit-diagnostics bundle into this directory.
    #[arg(long = "debug-dir", value_name = "DIR")]
    pub debug_dir: Option<PathBuf>,
}

/// Curve fitting knobs.
#[derive(Debug, Args, Clone)]
pub struct FitOpts {
    /// Which functional form(s) to fit.
    #[arg(long, value_enum, default_value_t = ModelSpec::Auto)]
    pub model: ModelSpec,

    /// Largest power-form exponent searched.
    #[arg(long, default_value_t = 6.0)]
    pub n_max: f64,

    /// Power exponent grid steps.
    #[arg(long, default_value_t = 60)]
    pub n_steps: usize,

    /// Smallest rational asymptote, as a multiple of the largest netOD.
    #[arg(long, default_value_t = 1.02)]
    pub c_ratio_min: f64,

    /// Largest rational asymptote, as a multiple of the largest netOD.
    #[arg(long, default_value_t = 20.0)]
    pub c_ratio_max: f64,

    /// Rational asymptote grid steps.
    #[arg(long, default_value_t = 60)]
    pub c_steps: usize,

    /// Robust fitting mode.
    #[arg(long, value_enum, default_value_t = RobustKind::None)]
    pub robust: RobustKind,

    /// Huber IRLS iterations.
    #[arg(long, default_value_t = 3)]
    pub robust_iters: usize,

    /// Huber tuning constant.
    #[arg(long, default_value_t = 1.5)]
    pub robust_k: f64,
}

/// Lookup range handling.
#[derive(Debug, Args, Clone)]
pub struct RangeOpts {
    /// Accept netOD up to this far outside the calibrated range.
    #[arg(long, default_value_t = 0.0)]
    pub margin: f64,

    /// What to do inside the margin.
    #[arg(long = "range-mode", value_enum, default_value_t = RangeMode::Extrapolate)]
    pub range_mode: RangeMode,
}

/// Options for dose reconstruction.
#[derive(Debug, Parser, Clone)]
pub struct DoseArgs {
    /// Calibration bundles; one per channel, all for `--lot`.
    #[arg(long = "calibration", value_name = "JSON", required = true)]
    pub calibrations: Vec<PathBuf>,

    /// Film lot of the measured film.
    #[arg(long)]
    pub lot: String,

    /// Channels to reconstruct (repeatable).
    #[arg(short = 'c', long = "channel", value_enum, default_values_t = [Channel::Red])]
    pub channels: Vec<Channel>,

    /// Pre-irradiation scan CSV.
    #[arg(long, value_name = "CSV")]
    pub pre: PathBuf,

    /// Post-irradiation scan CSV.
    #[arg(long, value_name = "CSV")]
    pub post: PathBuf,

    /// ROI CSV (`name,left,right,top,bottom`); whole film when omitted.
    #[arg(long, value_name = "CSV")]
    pub rois: Option<PathBuf>,

    /// ROI CSV on the pre scan, paired row by row with `--rois`; each pre ROI
    /// mean is the pre level of its post ROI.
    #[arg(long = "pre-rois", value_name = "CSV", conflicts_with = "pre_reference")]
    pub pre_rois: Option<PathBuf>,

    /// Pre-scan rectangle `left,right,top,bottom` whose mean is the pre level
    /// of every post pixel.
    #[arg(long = "pre-reference", value_parser = parse_rect)]
    pub pre_reference: Option<Rect>,

    /// Extraction mode; `auto` picks advanced when control or background scans are given.
    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub mode: ModeArg,

    /// Control film scan before irradiation of the measured film.
    #[arg(long = "control-pre", value_name = "CSV")]
    pub control_pre: Option<PathBuf>,

    /// Control film scan after irradiation of the measured film.
    #[arg(long = "control-post", value_name = "CSV")]
    pub control_post: Option<PathBuf>,

    /// Control ROI as `left,right,top,bottom`; whole control scan when omitted.
    #[arg(long = "control-rect", value_parser = parse_rect)]
    pub control_rect: Option<Rect>,

    /// Background scan (used for pre and post unless `--background-post` is given).
    #[arg(long, value_name = "CSV")]
    pub background: Option<PathBuf>,

    /// Separate background scan for the post-irradiation session.
    #[arg(long = "background-post", value_name = "CSV")]
    pub background_post: Option<PathBuf>,

    /// Background ROI as `left,right,top,bottom`; whole image when omitted.
    #[arg(long = "background-rect", value_parser = parse_rect)]
    pub background_rect: Option<Rect>,

    /// Scan bit depth.
    #[arg(long, default_value_t = 16)]
    pub bit_depth: u8,

    #[command(flatten)]
    pub range: RangeOpts,

    /// Export per-pixel netOD and dose to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export per-ROI scalar doses to CSV.
    #[arg(long, value_name = "CSV")]
    pub summary: Option<PathBuf>,
}

/// Options for inspecting a saved calibration.
#[derive(Debug, Parser, Clone)]
pub struct CurveArgs {
    /// Calibration bundle.
    #[arg(long, value_name = "JSON")]
    pub calibration: PathBuf,

    /// netOD values to convert to dose (repeatable).
    #[arg(long = "netod")]
    pub netods: Vec<f64>,

    /// Doses to convert to expected netOD (repeatable).
    #[arg(long = "dose")]
    pub doses: Vec<f64>,

    /// Number of fitted curve samples to export.
    #[arg(long, default_value_t = 101)]
    pub samples: usize,

    /// Export calibration points and curve samples to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    #[command(flatten)]
    pub range: RangeOpts,
}

/// Options for synthetic data generation.
#[derive(Debug, Parser, Clone)]
pub struct SampleArgs {
    /// Output directory for `points.csv`, `pre.csv` and `post.csv`.
    #[arg(long = "out-dir", value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Film lot identifier written into the sample.
    #[arg(long, default_value = "SYNTH-001")]
    pub lot: String,

    #[arg(short = 'c', long, value_enum, default_value_t = Channel::Red)]
    pub channel: Channel,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Standard deviation of netOD reading noise.
    #[arg(long, default_value_t = 0.002)]
    pub noise: f64,

    /// Dose delivered to the synthetic film (Gy).
    #[arg(long, default_value_t = 4.0)]
    pub film_dose: f64,

    /// Synthetic film size in pixels (square).
    #[arg(long, default_value_t = 8)]
    pub size: usize,
}

/// `--mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    Auto,
    Simple,
    Advanced,
}

impl ModeArg {
    pub fn to_mode(self) -> Option<ExtractionMode> {
        match self {
            ModeArg::Auto => None,
            ModeArg::Simple => Some(ExtractionMode::Simple),
            ModeArg::Advanced => Some(ExtractionMode::Advanced),
        }
    }
}

/// ImageJ-style rectangle, `right` and `bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

pub fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [left, right, top, bottom] = parts.as_slice() else {
        return Err(format!("expected `left,right,top,bottom`, got '{s}'"));
    };
    let num = |v: &str| v.parse::<usize>().map_err(|_| format!("invalid pixel bound '{v}' in '{s}'"));
    Ok(Rect {
        left: num(*left)?,
        right: num(*right)?,
        top: num(*top)?,
        bottom: num(*bottom)?,
    })
}
