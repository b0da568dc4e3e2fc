//! Reporting: decay-associated spectra, reconstructions and formatted output.

pub mod das;
pub mod format;

pub use das::*;
pub use format::*;
