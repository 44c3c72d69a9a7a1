//! Input/output helpers.
//!
//! - calibration point CSV ingest (`ingest`)
//! - scan loading (`scan`) and ROI import (`roi`)
//! - versioned calibration bundles (`bundle`)
//! - dose and curve CSV exports (`export`)

pub mod bundle;
pub mod export;
pub mod ingest;
pub mod roi;
pub mod scan;

pub use bundle::*;
pub use export::*;
pub use ingest::*;
pub use roi::*;
pub use scan::*;
