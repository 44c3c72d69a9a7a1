//! Curve fitting orchestration.
//!
//! Responsibilities:
//!
//! - generate shape grids for the power and rational forms
//! - evaluate each candidate shape (parallel)
//! - select the best form using BIC + guardrails

pub mod fitter;
pub mod selection;
pub mod shape_grid;

pub use fitter::*;
pub use selection::*;
pub use shape_grid::*;
