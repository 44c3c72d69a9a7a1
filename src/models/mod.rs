//! Dose-response forms (power and rational), evaluated as pure functions of
//! netOD, coefficients and shape parameter.

pub mod model;

pub use model::*;
