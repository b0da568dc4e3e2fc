//! `ta-svdgf` library crate: SVD global fitting of transient-absorption data.
//!
//! The binary (`svdgf`) is a thin wrapper around this library so that:
//!
//! - the numerical core is testable without spawning processes
//! - the same pipeline can back other front-ends
//!
//! Data flow: matrix file -> bounds -> SVD -> (target model) + initial
//! parameters -> global fit -> decay-associated spectra.

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
