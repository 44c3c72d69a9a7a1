//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - channel and model enums (`Channel`, `ModelSpec`, `ModelKind`, `RobustKind`)
//! - calibration inputs (`CalibrationPoint`)
//! - fit outputs (`FitResult`, `CurveParams`, `FitQuality`)
//! - lookup configuration (`RangePolicy`)

pub mod types;

pub use types::*;
