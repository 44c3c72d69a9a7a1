//! Net optical density extraction.
//!
//! Per pixel, simple mode computes `log10(pre / post)`. Advanced mode subtracts
//! the scanner background from both intensities and removes the control
//! film's own darkening:
//!
//! ```text
//! netOD = log10((pre - bg_pre) / (post - bg_post))
//!       - log10((ctrl_pre - bg_pre) / (ctrl_post - bg_post))
//! ```
//!
//! Two ROI statistics are reported side by side and must not be mixed up:
//! `mean_of_netod` averages the per-pixel netOD, `netod_of_means` is the netOD
//! of the ROI-mean intensities. Only the latter carries a propagated standard
//! error.

use std::f64::consts::LN_10;

use log::debug;
use nalgebra::DMatrix;

use crate::domain::Channel;
use crate::error::DoseError;
use crate::film::scan::Roi;
use crate::film::scanset::{BackgroundScans, ControlScans, ExtractionMode, ScanSet};
use crate::math::SampleStats;

/// NetOD of a single intensity pair.
pub fn net_od(pre: f64, post: f64) -> f64 {
    (pre / post).log10()
}

/// NetOD over one ROI for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiNetOd {
    pub channel: Channel,
    pub roi: String,
    /// Pre-scan ROI supplying a single pre level, when not pixel-registered.
    pub reference: Option<String>,
    pub mode: ExtractionMode,
    /// ROI pixel coordinates, row-major, matching `netod`.
    pub pixels: Vec<(usize, usize)>,
    pub netod: Vec<f64>,
    pub mean_of_netod: f64,
    pub netod_of_means: f64,
    /// Standard error of `netod_of_means`.
    pub netod_of_means_sigma: f64,
    pub pre: SampleStats,
    pub post: SampleStats,
}

impl RoiNetOd {
    pub fn len(&self) -> usize {
        self.netod.len()
    }

    pub fn is_empty(&self) -> bool {
        self.netod.is_empty()
    }
}

/// Background levels and control offset for advanced extraction.
#[derive(Debug, Clone, Copy)]
struct Correction {
    bg_pre: SampleStats,
    bg_post: SampleStats,
    shared_background: bool,
    control_pre: SampleStats,
    control_post: SampleStats,
    offset: f64,
}

/// Extract netOD for `channel` over `roi`.
///
/// Never yields inf or NaN: a non-positive (background-corrected) intensity
/// fails with `InvalidScan` naming the scan, pixel and value.
pub fn extract(scans: &ScanSet<'_>, roi: &Roi, channel: Channel) -> Result<RoiNetOd, DoseError> {
    extract_against(scans, None, roi, channel)
}

/// Extract netOD over `roi` against a single pre-irradiation level: the mean
/// of the pre scan over `reference`.
///
/// Films move on the scanner between sessions, so `reference` can sit anywhere
/// on the pre scan. Every post pixel in `roi` is compared with that one mean,
/// and its ROI statistics stand in for the pre ROI in the uncertainty.
pub fn extract_referenced(
    scans: &ScanSet<'_>,
    reference: &Roi,
    roi: &Roi,
    channel: Channel,
) -> Result<RoiNetOd, DoseError> {
    extract_against(scans, Some(reference), roi, channel)
}

fn extract_against(
    scans: &ScanSet<'_>,
    reference: Option<&Roi>,
    roi: &Roi,
    channel: Channel,
) -> Result<RoiNetOd, DoseError> {
    let pre_plane = scans.pre().plane(channel)?;
    let post_values = gather(scans.post().plane(channel)?, roi, channel)?;
    let pixels = roi.pixels();
    let (pre_values, pre) = match reference {
        None => {
            let values = gather(pre_plane, roi, channel)?;
            let pre = stats(&values, roi)?;
            (values, pre)
        }
        Some(reference) => {
            let pre = stats(&gather(pre_plane, reference, channel)?, reference)?;
            (vec![pre.mean; pixels.len()], pre)
        }
    };

    let correction = match scans {
        ScanSet::Simple { .. } => None,
        ScanSet::Advanced {
            control, background, ..
        } => Some(correction(control, background, channel)?),
    };
    let (bg_pre, bg_post, offset) = correction
        .map(|c| (c.bg_pre.mean, c.bg_post.mean, c.offset))
        .unwrap_or((0.0, 0.0, 0.0));

    let mut netod = Vec::with_capacity(pixels.len());
    for ((&pixel, &pre), &post) in pixels.iter().zip(&pre_values).zip(&post_values) {
        let a = positive(pre - bg_pre, "pre", pixel, pre, channel, roi)?;
        let b = positive(post - bg_post, "post", pixel, post, channel, roi)?;
        netod.push(net_od(a, b) - offset);
    }

    let post = stats(&post_values, roi)?;
    let mean_of_netod = netod.iter().sum::<f64>() / netod.len() as f64;
    let netod_of_means = net_od(pre.mean - bg_pre, post.mean - bg_post) - offset;
    let netod_of_means_sigma = match correction {
        None => simple_sigma(&pre, &post),
        Some(c) => advanced_sigma(&pre, &post, &c),
    };

    debug!(
        "netOD {} {} over '{}'{} ({} px): mean_of_netod={mean_of_netod:.5} netod_of_means={netod_of_means:.5}±{netod_of_means_sigma:.5}",
        scans.mode().display_name(),
        channel,
        roi.name(),
        reference.map(|r| format!(" against '{}'", r.name())).unwrap_or_default(),
        netod.len()
    );

    Ok(RoiNetOd {
        channel,
        roi: roi.name().to_string(),
        reference: reference.map(|r| r.name().to_string()),
        mode: scans.mode(),
        pixels,
        netod,
        mean_of_netod,
        netod_of_means,
        netod_of_means_sigma,
        pre,
        post,
    })
}

fn gather(plane: &DMatrix<f64>, roi: &Roi, channel: Channel) -> Result<Vec<f64>, DoseError> {
    roi.gather(plane)
        .map_err(|e| DoseError::InvalidScan(format!("channel {channel}: {e}")))
}

fn stats(values: &[f64], roi: &Roi) -> Result<SampleStats, DoseError> {
    SampleStats::of(values)
        .ok_or_else(|| DoseError::InvalidScan(format!("ROI '{}' selects no pixels", roi.name())))
}

fn positive(
    value: f64,
    role: &str,
    pixel: (usize, usize),
    raw: f64,
    channel: Channel,
    roi: &Roi,
) -> Result<f64, DoseError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(DoseError::InvalidScan(format!(
            "channel {channel} {role} scan pixel ({}, {}) in ROI '{}' has intensity {raw} (corrected {value}), must be > 0",
            pixel.0,
            pixel.1,
            roi.name()
        )))
    }
}

fn correction(
    control: &ControlScans<'_>,
    background: &BackgroundScans<'_>,
    channel: Channel,
) -> Result<Correction, DoseError> {
    let bg_pre = background_level(background.pre.plane(channel)?, background.roi, channel)?;
    let bg_post = if background.is_shared() {
        bg_pre
    } else {
        background_level(background.post().plane(channel)?, background.roi, channel)?
    };

    let control_pre = stats(&gather(control.pre.plane(channel)?, control.roi, channel)?, control.roi)?;
    let control_post = stats(&gather(control.post.plane(channel)?, control.roi, channel)?, control.roi)?;

    let c_pre = control_pre.mean - bg_pre.mean;
    let c_post = control_post.mean - bg_post.mean;
    if !(c_pre > 0.0 && c_post > 0.0) {
        return Err(DoseError::InvalidScan(format!(
            "channel {channel} control ROI '{}' means ({}, {}) are not above background ({}, {})",
            control.roi.name(),
            control_pre.mean,
            control_post.mean,
            bg_pre.mean,
            bg_post.mean
        )));
    }

    Ok(Correction {
        bg_pre,
        bg_post,
        shared_background: background.is_shared(),
        control_pre,
        control_post,
        offset: net_od(c_pre, c_post),
    })
}

fn background_level(
    plane: &DMatrix<f64>,
    roi: Option<&Roi>,
    channel: Channel,
) -> Result<SampleStats, DoseError> {
    let values = match roi {
        Some(roi) => gather(plane, roi, channel)?,
        None => plane.iter().copied().collect(),
    };
    SampleStats::of(&values)
        .ok_or_else(|| DoseError::InvalidScan(format!("channel {channel} background is empty")))
}

fn simple_sigma(pre: &SampleStats, post: &SampleStats) -> f64 {
    let rel_pre = pre.stderr / pre.mean;
    let rel_post = post.stderr / post.mean;
    (rel_pre * rel_pre + rel_post * rel_post).sqrt() / LN_10
}

fn advanced_sigma(pre: &SampleStats, post: &SampleStats, c: &Correction) -> f64 {
    let bp = c.bg_pre.mean;
    let bq = c.bg_post.mean;
    let sq = |v: f64| v * v;

    let l1 = sq(pre.stderr / (pre.mean - bp)) + sq(post.stderr / (post.mean - bq));
    let l3 = sq(c.control_pre.stderr / (c.control_pre.mean - bp))
        + sq(c.control_post.stderr / (c.control_post.mean - bq));

    let (l2, l4) = if c.shared_background {
        let s_bg = sq(c.bg_pre.stderr);
        let l2 = sq((pre.mean - post.mean) / ((pre.mean - bp) * (post.mean - bq))) * s_bg;
        let l4 = sq(
            (c.control_pre.mean - c.control_post.mean)
                / ((c.control_pre.mean - bp) * (c.control_post.mean - bq)),
        ) * s_bg;
        (l2, l4)
    } else {
        let l2 = sq(c.bg_pre.stderr / (pre.mean - bp)) + sq(c.bg_post.stderr / (post.mean - bq));
        let l4 = sq(c.bg_pre.stderr / (c.control_pre.mean - bp))
            + sq(c.bg_post.stderr / (c.control_post.mean - bq));
        (l2, l4)
    };

    (l1 + l2 + l3 + l4).sqrt() / LN_10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::film::scan::Scan;
    use crate::film::scanset::ScanSetBuilder;

    fn scan(rows: &[Vec<f64>]) -> Scan {
        Scan::from_rows(16, Channel::Red, rows).unwrap()
    }

    fn simple(pre: &Scan, post: &Scan) -> RoiNetOd {
        let set = ScanSetBuilder::new()
            .pre(pre)
            .post(post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let roi = Roi::full("film", pre.shape()).unwrap();
        extract(&set, &roi, Channel::Red).unwrap()
    }

    #[test]
    fn halved_transmission_is_log10_two() {
        let r = simple(&scan(&[vec![100.0]]), &scan(&[vec![50.0]]));
        let expected = 2f64.log10();
        assert!((r.netod[0] - expected).abs() < 1e-12);
        assert!((r.mean_of_netod - expected).abs() < 1e-12);
        assert!((r.netod_of_means - expected).abs() < 1e-12);
        assert_eq!(r.netod_of_means_sigma, 0.0);
    }

    #[test]
    fn netod_sign_follows_darkening() {
        let darker = simple(&scan(&[vec![200.0, 180.0]]), &scan(&[vec![150.0, 90.0]]));
        assert!(darker.netod.iter().all(|v| v.is_finite() && *v >= 0.0));

        let lighter = simple(&scan(&[vec![100.0, 100.0]]), &scan(&[vec![100.0, 120.0]]));
        assert!(lighter.netod.iter().all(|v| v.is_finite()));
        assert_eq!(lighter.netod[0], 0.0);
        assert!(lighter.netod[1] < 0.0);
    }

    #[test]
    fn zero_intensity_names_the_pixel() {
        let pre = scan(&[vec![100.0, 100.0], vec![100.0, 100.0]]);
        let post = scan(&[vec![50.0, 50.0], vec![50.0, 0.0]]);
        let set = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let roi = Roi::full("film", (2, 2)).unwrap();
        match extract(&set, &roi, Channel::Red) {
            Err(DoseError::InvalidScan(msg)) => {
                assert!(msg.contains("(1, 1)"), "{msg}");
                assert!(msg.contains("RED"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }

        // Outside the ROI the zero pixel is never read.
        let roi = Roi::rect("top", 0, 2, 0, 1, (2, 2)).unwrap();
        assert!(extract(&set, &roi, Channel::Red).is_ok());
    }

    #[test]
    fn roi_statistics_are_kept_apart() {
        let r = simple(&scan(&[vec![100.0, 100.0]]), &scan(&[vec![50.0, 25.0]]));
        let mean_of_netod = (2f64.log10() + 4f64.log10()) / 2.0;
        let netod_of_means = (100.0f64 / 37.5).log10();
        assert!((r.mean_of_netod - mean_of_netod).abs() < 1e-12);
        assert!((r.netod_of_means - netod_of_means).abs() < 1e-12);
        assert!((r.mean_of_netod - r.netod_of_means).abs() > 0.01);
    }

    #[test]
    fn simple_sigma_propagates_roi_standard_errors() {
        let r = simple(&scan(&[vec![100.0, 102.0]]), &scan(&[vec![50.0, 52.0]]));
        // Both ROIs have sample std sqrt(2), so standard error 1.
        let expected = ((1.0f64 / 101.0).powi(2) + (1.0f64 / 51.0).powi(2)).sqrt() / LN_10;
        assert!((r.netod_of_means_sigma - expected).abs() < 1e-12);
    }

    #[test]
    fn advanced_subtracts_background_and_control() {
        let pre = scan(&[vec![1000.0]]);
        let post = scan(&[vec![600.0]]);
        let control_pre = scan(&[vec![1000.0]]);
        let control_post = scan(&[vec![950.0]]);
        let bg = scan(&[vec![100.0]]);
        let control_roi = Roi::full("ctrl", (1, 1)).unwrap();
        let set = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .control(&control_pre, &control_post, &control_roi)
            .background(&bg)
            .build(ExtractionMode::Advanced)
            .unwrap();
        let roi = Roi::full("film", (1, 1)).unwrap();
        let r = extract(&set, &roi, Channel::Red).unwrap();

        let expected = (900.0f64 / 500.0).log10() - (900.0f64 / 850.0).log10();
        assert_eq!(r.mode, ExtractionMode::Advanced);
        assert!((r.netod[0] - expected).abs() < 1e-12);
        assert!((r.netod_of_means - expected).abs() < 1e-12);
        assert_eq!(r.netod_of_means_sigma, 0.0);
    }

    #[test]
    fn pixel_at_background_level_is_rejected() {
        let pre = scan(&[vec![1000.0, 1000.0]]);
        let post = scan(&[vec![600.0, 90.0]]);
        let ctrl = scan(&[vec![1000.0, 1000.0]]);
        let bg = scan(&[vec![100.0, 100.0]]);
        let control_roi = Roi::full("ctrl", (1, 2)).unwrap();
        let set = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .control(&ctrl, &ctrl, &control_roi)
            .background(&bg)
            .build(ExtractionMode::Advanced)
            .unwrap();
        let roi = Roi::full("film", (1, 2)).unwrap();
        let err = extract(&set, &roi, Channel::Red).unwrap_err();
        assert!(matches!(err, DoseError::InvalidScan(_)));
    }

    #[test]
    fn reference_mean_serves_every_post_pixel() {
        // Film sits one column further right on the post scan.
        let pre = scan(&[vec![100.0, 102.0, 7.0], vec![98.0, 100.0, 7.0]]);
        let post = scan(&[vec![7.0, 50.0, 25.0], vec![7.0, 40.0, 100.0]]);
        let set = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .build(ExtractionMode::Simple)
            .unwrap();
        let reference = Roi::rect("strip pre", 0, 2, 0, 2, (2, 3)).unwrap();
        let roi = Roi::rect("strip post", 1, 3, 0, 2, (2, 3)).unwrap();
        let r = extract_referenced(&set, &reference, &roi, Channel::Red).unwrap();

        assert_eq!(r.reference.as_deref(), Some("strip pre"));
        assert_eq!(r.pixels, vec![(0, 1), (0, 2), (1, 1), (1, 2)]);
        let expected: Vec<f64> = [50.0, 25.0, 40.0, 100.0].iter().map(|&v| (100.0f64 / v).log10()).collect();
        for (got, want) in r.netod.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12);
        }
        assert!((r.netod_of_means - (100.0f64 / 53.75).log10()).abs() < 1e-12);

        // Same propagation as registered extraction, with the reference
        // statistics on the pre side.
        assert_eq!(r.pre.n, 4);
        let expected_sigma = simple_sigma(&r.pre, &r.post);
        assert!(r.netod_of_means_sigma > 0.0);
        assert_eq!(r.netod_of_means_sigma, expected_sigma);
    }

    #[test]
    fn reference_uses_advanced_correction() {
        let pre = scan(&[vec![1000.0, 1000.0]]);
        let post = scan(&[vec![600.0, 500.0]]);
        let ctrl_pre = scan(&[vec![1000.0, 1000.0]]);
        let ctrl_post = scan(&[vec![950.0, 950.0]]);
        let bg = scan(&[vec![100.0, 100.0]]);
        let control_roi = Roi::full("ctrl", (1, 2)).unwrap();
        let set = ScanSetBuilder::new()
            .pre(&pre)
            .post(&post)
            .control(&ctrl_pre, &ctrl_post, &control_roi)
            .background(&bg)
            .build(ExtractionMode::Advanced)
            .unwrap();
        let reference = Roi::rect("ref", 0, 1, 0, 1, (1, 2)).unwrap();
        let roi = Roi::full("film", (1, 2)).unwrap();
        let r = extract_referenced(&set, &reference, &roi, Channel::Red).unwrap();

        let offset = (900.0f64 / 850.0).log10();
        assert!((r.netod[0] - ((900.0f64 / 500.0).log10() - offset)).abs() < 1e-12);
        assert!((r.netod[1] - ((900.0f64 / 400.0).log10() - offset)).abs() < 1e-12);
        assert_eq!(r.mode, ExtractionMode::Advanced);
    }

    #[test]
    fn missing_channel_fails() {
        let pre = scan(&[vec![100.0]]);
        let set = ScanSetBuilder::new()
            .pre(&pre)
            .post(&pre)
            .build(ExtractionMode::Simple)
            .unwrap();
        let roi = Roi::full("film", (1, 1)).unwrap();
        assert!(matches!(
            extract(&set, &roi, Channel::Green),
            Err(DoseError::InvalidScan(_))
        ));
    }
}
