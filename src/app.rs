//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - fits and saves calibrations
//! - reconstructs dose from film scans
//! - prints reports
//! - writes optional exports

use clap::Parser;

use crate::calib::Calibration;
use crate::cli::{Command, CurveArgs, DoseArgs, FitArgs, FitOpts, RangeOpts, Rect, SampleArgs};
use crate::data::{generate_sample, SampleConfig};
use crate::domain::{FitConfig, RangePolicy};
use crate::error::AppError;
use crate::io::scan::CsvScanLoader;

pub mod pipeline;

/// Residual rows printed by `fit --residuals` before truncating.
const RESIDUAL_ROWS: usize = 20;

/// Entry point for the `ebtdose` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Dose(args) => handle_dose(args),
        Command::Curve(args) => handle_curve(args),
        Command::Sample(args) => handle_sample(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args.fit);
    let run = pipeline::run_fit(&args.points, &args.lot, args.channel, args.date, &config)?;

    println!("{}", crate::report::format_fit_summary(&run.ingest, &run.calibration)?);

    if args.residuals {
        let residuals = crate::report::compute_residuals(&run.calibration)?;
        let worst = crate::report::worst_points(&residuals, RESIDUAL_ROWS);
        println!("{}", crate::report::format_residuals(&worst));
    }

    run.calibration.save(&args.out)?;
    println!("Saved calibration to {}", args.out.display());

    if let Some(path) = &args.export_curve {
        let samples = run.calibration.curve_samples(101)?;
        crate::io::export::write_curve_csv(path, &samples)?;
    }
    if let Some(dir) = &args.debug_dir {
        let path = crate::debug::write_debug_bundle(dir, &run.calibration, &config)?;
        println!("Debug bundle: {}", path.display());
    }

    Ok(())
}

fn handle_dose(args: DoseArgs) -> Result<(), AppError> {
    let policy = range_policy_from_args(&args.range);
    let calibrations = pipeline::load_calibrations(&args.calibrations, policy)?;

    let loader = CsvScanLoader {
        bit_depth: args.bit_depth,
    };
    let paths = scan_paths_from_args(&args)?;
    let inputs = pipeline::load_dose_inputs(&paths, &loader)?;
    let computed = pipeline::run_dose(&inputs, &calibrations, &args.lot, &args.channels, args.mode.to_mode())?;

    println!("{}", crate::report::format_dose_summary(&computed));

    if let Some(path) = &args.export {
        crate::io::export::write_dose_csv(path, &computed)?;
    }
    if let Some(path) = &args.summary {
        crate::io::export::write_summary_csv(path, &computed)?;
    }
    Ok(())
}

fn handle_curve(args: CurveArgs) -> Result<(), AppError> {
    let policy = range_policy_from_args(&args.range);
    let calibration = Calibration::load(&args.calibration)?.with_range_policy(policy)?;
    let curve = calibration.curve()?;

    println!("Lot {} / {}", calibration.lot(), calibration.channel());
    if let Some(date) = calibration.date() {
        println!("Date: {date}");
    }
    println!("{}", calibration.formula()?);
    println!(
        "netOD [{:.4}, {:.4}] -> dose [{:.3}, {:.3}] Gy",
        curve.netod_range.min, curve.netod_range.max, curve.dose_range.min, curve.dose_range.max
    );

    for &netod in &args.netods {
        println!("netOD {netod:.4} -> {:.4} Gy", calibration.dose(netod)?);
    }
    for &dose in &args.doses {
        println!("{dose:.4} Gy -> netOD {:.5}", calibration.netod_for_dose(dose)?);
    }

    if let Some(path) = &args.export {
        let samples = calibration.curve_samples(args.samples)?;
        crate::io::export::write_curve_csv(path, &samples)?;
    }
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let config = sample_config_from_args(&args);
    let sample = generate_sample(&config)?;
    let files = pipeline::write_sample(&args.out_dir, &sample)?;

    println!(
        "Wrote {} calibration points to {}",
        sample.points.len(),
        files.points.display()
    );
    println!(
        "Film at {:.3} Gy (netOD {:.5}): {} and {}",
        config.film_dose,
        sample.film_netod,
        files.pre.display(),
        files.post.display()
    );
    Ok(())
}

pub fn fit_config_from_args(args: &FitOpts) -> FitConfig {
    FitConfig {
        model_spec: args.model,
        power_n_max: args.n_max,
        power_steps: args.n_steps,
        rational_ratio_min: args.c_ratio_min,
        rational_ratio_max: args.c_ratio_max,
        rational_steps: args.c_steps,
        robust: args.robust,
        robust_iters: args.robust_iters,
        robust_k: args.robust_k,
    }
}

pub fn range_policy_from_args(args: &RangeOpts) -> RangePolicy {
    RangePolicy {
        margin: args.margin,
        mode: args.range_mode,
    }
}

pub fn sample_config_from_args(args: &SampleArgs) -> SampleConfig {
    SampleConfig {
        lot: args.lot.clone(),
        channel: args.channel,
        netod_noise: args.noise,
        film_dose: args.film_dose,
        film_shape: (args.size, args.size),
        seed: args.seed,
        ..SampleConfig::default()
    }
}

fn scan_paths_from_args(args: &DoseArgs) -> Result<pipeline::ScanPaths, AppError> {
    let control = match (&args.control_pre, &args.control_post) {
        (Some(pre), Some(post)) => Some((pre.clone(), post.clone())),
        (None, None) => None,
        _ => {
            return Err(AppError::new(
                2,
                "--control-pre and --control-post must be given together",
            ));
        }
    };
    Ok(pipeline::ScanPaths {
        pre: args.pre.clone(),
        post: args.post.clone(),
        control,
        control_rect: args.control_rect.map(bounds),
        background: args.background.clone(),
        background_post: args.background_post.clone(),
        background_rect: args.background_rect.map(bounds),
        rois: args.rois.clone(),
        pre_rois: args.pre_rois.clone(),
        pre_reference: args.pre_reference.map(bounds),
    })
}

fn bounds(rect: Rect) -> pipeline::RectBounds {
    (rect.left, rect.right, rect.top, rect.bottom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::domain::{ModelSpec, RangeMode};

    #[test]
    fn fit_flags_map_onto_fit_config() {
        let cli = Cli::try_parse_from([
            "ebtdose", "fit", "--points", "p.csv", "--lot", "L", "--out", "o.json", "--model", "rational",
            "--c-steps", "30",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit command");
        };
        let config = fit_config_from_args(&args.fit);
        assert_eq!(config.model_spec, ModelSpec::Rational);
        assert_eq!(config.rational_steps, 30);
        assert_eq!(config.power_steps, FitConfig::default().power_steps);
    }

    #[test]
    fn unpaired_control_scan_is_rejected() {
        let cli = Cli::try_parse_from([
            "ebtdose",
            "dose",
            "--calibration",
            "c.json",
            "--lot",
            "L",
            "--pre",
            "a.csv",
            "--post",
            "b.csv",
            "--control-pre",
            "c.csv",
        ])
        .unwrap();
        let Command::Dose(args) = cli.command else {
            panic!("expected dose command");
        };
        assert_eq!(scan_paths_from_args(&args).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn range_flags_build_policy() {
        let policy = range_policy_from_args(&RangeOpts {
            margin: 0.05,
            range_mode: RangeMode::Clamp,
        });
        assert_eq!(policy.margin, 0.05);
        assert_eq!(policy.mode, RangeMode::Clamp);
    }
}
