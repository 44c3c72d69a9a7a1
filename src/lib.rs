//! `ebt-dose` library crate.
//!
//! Radiochromic EBT film dosimetry: extract net optical density from
//! pre/post-irradiation scans, fit per-lot, per-channel calibration curves,
//! and convert film response back to absorbed dose.
//!
//! The binary (`ebtdose`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - calibrations can be fitted once and reused by other tools
//! - scan formats can be plugged in behind `io::ScanLoader`

pub mod app;
pub mod calib;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod film;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod recon;
pub mod report;
