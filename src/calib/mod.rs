//! Calibration curves: fitted models bound to their calibrated range, and the
//! per-(lot, channel) calibrations that own them.

pub mod calibration;
pub mod curve;

pub use calibration::*;
pub use curve::*;
