//! Error types.
//!
//! - `DoseError`: typed failures raised by the core (extraction, fitting,
//!   lookup, persistence checks). Every variant carries enough context to act on.
//! - `AppError`: front-end error with a process exit code.

use thiserror::Error;

use crate::domain::Channel;

/// Failures raised by the dose core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DoseError {
    /// Non-positive or non-finite intensities, or shape mismatches between scans.
    #[error("invalid scan: {0}")]
    InvalidScan(String),

    /// A configuration value is unusable (empty grid, negative margin, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing a file failed.
    #[error("{0}")]
    Io(String),

    /// Required scans or calibration points were not supplied.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// No acceptable fit, or a bounded solver ran out of iterations.
    #[error("fit did not converge: {0}")]
    FitConvergence(String),

    /// A lookup fell outside the calibrated range (plus any allowed margin).
    #[error(
        "{quantity} {value} is outside the calibrated range [{min}, {max}] (margin {margin}) for lot {lot} channel {channel}"
    )]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
        margin: f64,
        lot: String,
        channel: Channel,
    },

    #[error("calibration for lot {lot} channel {channel} has not been fitted")]
    CalibrationNotFitted { lot: String, channel: Channel },

    #[error("calibration for lot {lot} channel {channel} is already fitted and cannot be refitted")]
    CalibrationFrozen { lot: String, channel: Channel },

    #[error("no fitted calibration for lot {lot} channel {channel}")]
    ChannelMismatch { lot: String, channel: Channel },

    #[error("unsupported calibration bundle: {0}")]
    UnsupportedCalibrationVersion(String),
}

impl DoseError {
    /// Exit code used when this error reaches the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            DoseError::InvalidScan(_) | DoseError::InvalidConfig(_) | DoseError::Io(_) => 2,
            DoseError::InsufficientData(_) => 3,
            DoseError::FitConvergence(_) => 4,
            DoseError::OutOfRange { .. }
            | DoseError::CalibrationNotFitted { .. }
            | DoseError::CalibrationFrozen { .. }
            | DoseError::ChannelMismatch { .. } => 5,
            DoseError::UnsupportedCalibrationVersion(_) => 6,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<DoseError> for AppError {
    fn from(err: DoseError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
