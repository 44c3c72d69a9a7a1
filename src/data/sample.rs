//! Synthetic calibration films.
//!
//! Given a known dose-response curve, produce calibration points (netOD with
//! Gaussian reading noise) and a pre/post scan pair of a film exposed to a
//! chosen dose. Output is fully determined by the configuration, seed
//! included, so demos and tests are reproducible.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::calib::CurveModel;
use crate::domain::{CalibrationPoint, Channel, CurveParams, ModelKind, ValueRange};
use crate::error::DoseError;
use crate::film::Scan;

/// Typical flatbed reading of unexposed EBT film, 16-bit.
const UNEXPOSED_LEVEL: f64 = 40_000.0;

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub lot: String,
    pub channel: Channel,
    /// Dose as a function of netOD.
    pub truth: CurveParams,
    /// Calibration doses (Gy).
    pub doses: Vec<f64>,
    /// Standard deviation of the netOD reading noise.
    pub netod_noise: f64,
    /// Dose delivered to the synthetic measurement film.
    pub film_dose: f64,
    pub film_shape: (usize, usize),
    /// Relative standard deviation of scan pixel noise.
    pub pixel_noise: f64,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            lot: "SYNTH-001".to_string(),
            channel: Channel::Red,
            truth: CurveParams {
                kind: ModelKind::Power,
                display_name: ModelKind::Power.display_name().to_string(),
                betas: vec![8.0, 30.0],
                shape: 2.6,
            },
            doses: vec![0.0, 0.5, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 10.0],
            netod_noise: 0.002,
            film_dose: 4.0,
            film_shape: (8, 8),
            pixel_noise: 0.002,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub lot: String,
    pub channel: Channel,
    pub points: Vec<CalibrationPoint>,
    /// Noise-free netOD for each calibration dose.
    pub true_netod: Vec<f64>,
    pub film_netod: f64,
    pub pre: Scan,
    pub post: Scan,
}

pub fn generate_sample(config: &SampleConfig) -> Result<SampleData, DoseError> {
    validate(config)?;

    let dose_max = config
        .doses
        .iter()
        .copied()
        .fold(config.film_dose, f64::max);
    let truth = truth_curve(&config.truth, dose_max)?;
    let netod_for = |dose: f64| {
        truth
            .forward(dose)
            .map_err(|e| DoseError::InvalidConfig(format!("synthetic curve cannot reach {dose} Gy: {e:?}")))
    };

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let noise = Normal::new(0.0, 1.0)
        .map_err(|e| DoseError::InvalidConfig(format!("Noise distribution error: {e}")))?;

    let mut points = Vec::with_capacity(config.doses.len());
    let mut true_netod = Vec::with_capacity(config.doses.len());
    for &dose in &config.doses {
        let x = netod_for(dose)?;
        true_netod.push(x);
        let observed = x + config.netod_noise * noise.sample(&mut rng);
        points.push(CalibrationPoint::new(dose, observed));
    }

    let film_netod = netod_for(config.film_dose)?;
    let (rows, cols) = config.film_shape;
    let attenuation = 10f64.powf(-film_netod);
    let mut pixel = |level: f64| (level * (1.0 + config.pixel_noise * noise.sample(&mut rng))).clamp(1.0, 65_535.0);
    let pre_plane = DMatrix::from_fn(rows, cols, |_, _| pixel(UNEXPOSED_LEVEL));
    let post_plane = DMatrix::from_fn(rows, cols, |_, _| pixel(UNEXPOSED_LEVEL * attenuation));

    Ok(SampleData {
        lot: config.lot.clone(),
        channel: config.channel,
        points,
        true_netod,
        film_netod,
        pre: Scan::new(16, vec![(config.channel, pre_plane)])?,
        post: Scan::new(16, vec![(config.channel, post_plane)])?,
    })
}

fn validate(config: &SampleConfig) -> Result<(), DoseError> {
    if config.doses.is_empty() {
        return Err(DoseError::InvalidConfig("Sample needs at least one calibration dose.".to_string()));
    }
    if config.doses.iter().any(|d| !(d.is_finite() && *d >= 0.0)) || !(config.film_dose.is_finite() && config.film_dose >= 0.0) {
        return Err(DoseError::InvalidConfig("Sample doses must be finite and >= 0.".to_string()));
    }
    if !(config.netod_noise.is_finite() && config.netod_noise >= 0.0)
        || !(config.pixel_noise.is_finite() && config.pixel_noise >= 0.0)
    {
        return Err(DoseError::InvalidConfig("Noise levels must be finite and >= 0.".to_string()));
    }
    if config.film_shape.0 == 0 || config.film_shape.1 == 0 {
        return Err(DoseError::InvalidConfig("Film shape must be non-empty.".to_string()));
    }
    Ok(())
}

/// Bind the true curve to a netOD range wide enough to reach `dose_max`.
fn truth_curve(params: &CurveParams, dose_max: f64) -> Result<CurveModel, DoseError> {
    let limit = match params.kind {
        ModelKind::Power => 10.0,
        // Stay just below the pole.
        ModelKind::Rational => params.shape * (1.0 - 1e-9),
    };
    let probe = |hi: f64| CurveModel::new(params.clone(), ValueRange { min: 0.0, max: hi });

    let mut hi = (0.05f64).min(limit);
    loop {
        let curve = probe(hi);
        if curve.evaluate(hi) >= dose_max {
            return Ok(curve);
        }
        if hi >= limit {
            return Err(DoseError::InvalidConfig(format!(
                "synthetic {} curve never reaches {dose_max} Gy",
                params.kind.display_name()
            )));
        }
        hi = (hi * 2.0).min(limit);
    }
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.lot.hash(&mut hasher);
    config.channel.hash(&mut hasher);
    config.seed.hash(&mut hasher);
    for d in &config.doses {
        d.to_bits().hash(&mut hasher);
    }
    config.netod_noise.to_bits().hash(&mut hasher);
    config.film_dose.to_bits().hash(&mut hasher);
    config.pixel_noise.to_bits().hash(&mut hasher);
    config.film_shape.hash(&mut hasher);
    hasher.finish()
}
