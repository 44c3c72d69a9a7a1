//! Mathematical utilities: response bases, weighted least squares, bounded
//! root finding and sample statistics.

pub mod basis;
pub mod ols;
pub mod roots;
pub mod stats;

pub use basis::*;
pub use ols::*;
pub use roots::*;
pub use stats::*;
