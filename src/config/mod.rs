//! Persisted configuration: file locations, initial fit parameters and
//! whole-file JSON persistence.

pub mod paths;
pub mod persist;
pub mod store;

pub use paths::ConfigPaths;
pub use store::{InitialFitParameters, InitialGuesses, InitialParameterStore, RowRemoval};
