//! Data sources that do not come from a file.

pub mod synthetic;

pub use synthetic::{SyntheticComponent, SyntheticSpec, generate};
