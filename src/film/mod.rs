//! Film scans, regions of interest and net optical density extraction.

pub mod netod;
pub mod scan;
pub mod scanset;

pub use netod::*;
pub use scan::*;
pub use scanset::*;
