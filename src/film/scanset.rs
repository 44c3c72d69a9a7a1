//! Validated scan configurations.
//!
//! Which scans a film measurement uses decides how netOD is extracted. The
//! configuration is fixed when a `ScanSet` is built: the builder checks that
//! the scans required by the chosen mode are present and share the film scan
//! shape, so extraction never has to.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::DoseError;
use crate::film::scan::{Roi, Scan};

/// NetOD extraction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// `log10(pre / post)`.
    #[default]
    Simple,
    /// Background-subtracted ratio, corrected by an unirradiated control film.
    Advanced,
}

impl ExtractionMode {
    pub fn display_name(self) -> &'static str {
        match self {
            ExtractionMode::Simple => "simple",
            ExtractionMode::Advanced => "advanced",
        }
    }
}

/// Unirradiated control film scanned alongside the measured film.
#[derive(Debug, Clone, Copy)]
pub struct ControlScans<'a> {
    pub pre: &'a Scan,
    pub post: &'a Scan,
    pub roi: &'a Roi,
}

/// Scanner baseline. A single scan serves both pre and post.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundScans<'a> {
    pub pre: &'a Scan,
    post: Option<&'a Scan>,
    /// `None` averages the whole image.
    pub roi: Option<&'a Roi>,
}

impl<'a> BackgroundScans<'a> {
    pub fn post(&self) -> &'a Scan {
        self.post.unwrap_or(self.pre)
    }

    /// True when one scan is used for both pre and post.
    pub fn is_shared(&self) -> bool {
        self.post.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ScanSet<'a> {
    Simple {
        pre: &'a Scan,
        post: &'a Scan,
    },
    Advanced {
        pre: &'a Scan,
        post: &'a Scan,
        control: ControlScans<'a>,
        background: BackgroundScans<'a>,
    },
}

impl<'a> ScanSet<'a> {
    pub fn mode(&self) -> ExtractionMode {
        match self {
            ScanSet::Simple { .. } => ExtractionMode::Simple,
            ScanSet::Advanced { .. } => ExtractionMode::Advanced,
        }
    }

    pub fn pre(&self) -> &'a Scan {
        match *self {
            ScanSet::Simple { pre, .. } | ScanSet::Advanced { pre, .. } => pre,
        }
    }

    pub fn post(&self) -> &'a Scan {
        match *self {
            ScanSet::Simple { post, .. } | ScanSet::Advanced { post, .. } => post,
        }
    }

    /// Shape of the measured film scans.
    pub fn shape(&self) -> (usize, usize) {
        self.pre().shape()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSetBuilder<'a> {
    pre: Option<&'a Scan>,
    post: Option<&'a Scan>,
    control_pre: Option<&'a Scan>,
    control_post: Option<&'a Scan>,
    control_roi: Option<&'a Roi>,
    background_pre: Option<&'a Scan>,
    background_post: Option<&'a Scan>,
    background_roi: Option<&'a Roi>,
}

impl<'a> ScanSetBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre(mut self, scan: &'a Scan) -> Self {
        self.pre = Some(scan);
        self
    }

    pub fn post(mut self, scan: &'a Scan) -> Self {
        self.post = Some(scan);
        self
    }

    pub fn control(mut self, pre: &'a Scan, post: &'a Scan, roi: &'a Roi) -> Self {
        self.control_pre = Some(pre);
        self.control_post = Some(post);
        self.control_roi = Some(roi);
        self
    }

    /// One background scan used for both pre and post.
    pub fn background(mut self, scan: &'a Scan) -> Self {
        self.background_pre = Some(scan);
        self.background_post = None;
        self
    }

    pub fn background_pair(mut self, pre: &'a Scan, post: &'a Scan) -> Self {
        self.background_pre = Some(pre);
        self.background_post = Some(post);
        self
    }

    pub fn background_roi(mut self, roi: &'a Roi) -> Self {
        self.background_roi = Some(roi);
        self
    }

    /// Advanced when any control or background input was supplied.
    pub fn build_auto(self) -> Result<ScanSet<'a>, DoseError> {
        let wants_advanced = self.control_pre.is_some() || self.background_pre.is_some();
        let mode = if wants_advanced {
            ExtractionMode::Advanced
        } else {
            ExtractionMode::Simple
        };
        self.build(mode)
    }

    pub fn build(self, mode: ExtractionMode) -> Result<ScanSet<'a>, DoseError> {
        let (Some(pre), Some(post)) = (self.pre, self.post) else {
            return Err(DoseError::InsufficientData(
                "both a pre- and a post-irradiation scan are required".to_string(),
            ));
        };
        same_shape("pre", pre, "post", post)?;

        match mode {
            ExtractionMode::Simple => Ok(ScanSet::Simple { pre, post }),
            ExtractionMode::Advanced => {
                let (Some(c_pre), Some(c_post), Some(c_roi)) =
                    (self.control_pre, self.control_post, self.control_roi)
                else {
                    return Err(DoseError::InsufficientData(
                        "advanced extraction requires control pre/post scans and a control ROI".to_string(),
                    ));
                };
                let Some(bg_pre) = self.background_pre else {
                    return Err(DoseError::InsufficientData(
                        "advanced extraction requires a background scan".to_string(),
                    ));
                };

                same_shape("pre", pre, "control pre", c_pre)?;
                same_shape("pre", pre, "control post", c_post)?;
                same_shape("pre", pre, "background", bg_pre)?;
                roi_fits("control", c_roi, c_pre)?;
                if let Some(bg_post) = self.background_post {
                    same_shape("pre", pre, "background post", bg_post)?;
                }
                if let Some(roi) = self.background_roi {
                    roi_fits("background", roi, bg_pre)?;
                }

                Ok(ScanSet::Advanced {
                    pre,
                    post,
                    control: ControlScans {
                        pre: c_pre,
                        post: c_post,
                        roi: c_roi,
                    },
                    background: BackgroundScans {
                        pre: bg_pre,
                        post: self.background_post,
                        roi: self.background_roi,
                    },
                })
            }
        }
    }
}

fn same_shape(a_name: &str, a: &Scan, b_name: &str, b: &Scan) -> Result<(), DoseError> {
    if a.shape() != b.shape() {
        return Err(DoseError::InvalidScan(format!(
            "{a_name} scan is {:?} but {b_name} scan is {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(())
}

fn roi_fits(role: &str, roi: &Roi, scan: &Scan) -> Result<(), DoseError> {
    if roi.shape() != scan.shape() {
        return Err(DoseError::InvalidScan(format!(
            "{role} ROI '{}' is {:?} but the {role} scan is {:?}",
            roi.name(),
            roi.shape(),
            scan.shape()
        )));
    }
    Ok(())
}
