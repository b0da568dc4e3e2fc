//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the data matrix and its analysis window (`DataMatrix`, `MatrixBounds`)
//! - component selection and the fit-method catalogue (`ComponentSelection`, `FitMethod`)
//! - fit outputs (`FitResult`, `FitParameterSet`, `Das`, etc.)

pub mod types;

pub use types::*;
