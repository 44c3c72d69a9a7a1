//! Summary statistics over ROI pixel values.

/// Mean, spread and extremes of a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (`n - 1` denominator; 0 for a single value).
    pub std: f64,
    /// Standard error of the mean, `std / sqrt(n)`.
    pub stderr: f64,
    pub min: f64,
    pub max: f64,
}

impl SampleStats {
    /// Returns `None` for an empty sample.
    pub fn of(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n == 0 {
            return None;
        }
        let n_f = n as f64;
        let mean = values.iter().sum::<f64>() / n_f;
        let var = if n > 1 {
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n_f - 1.0)
        } else {
            0.0
        };
        let std = var.sqrt();
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        Some(Self {
            n,
            mean,
            std,
            stderr: std / n_f.sqrt(),
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_use_sample_variance() {
        let s = SampleStats::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.n, 8);
        assert!((s.mean - 5.0).abs() < 1e-12);
        // population std is 2, sample std is sqrt(32/7)
        assert!((s.std - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert!((s.stderr - s.std / 8f64.sqrt()).abs() < 1e-12);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn single_value_has_zero_spread() {
        let s = SampleStats::of(&[3.5]).unwrap();
        assert_eq!(s.std, 0.0);
        assert_eq!(s.stderr, 0.0);
        assert!(SampleStats::of(&[]).is_none());
    }
}
