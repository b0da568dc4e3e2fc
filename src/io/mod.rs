//! Input/output helpers.
//!
//! - matrix files in and out (`matrix`)
//! - fit, DAS and reconstruction exports (`export`)

pub mod export;
pub mod matrix;

pub use export::*;
pub use matrix::*;
