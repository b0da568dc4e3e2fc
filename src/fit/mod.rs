//! Global fitting.
//!
//! Responsibilities:
//!
//! - lay out decay constants and amplitudes, with bound transforms
//! - evaluate residuals and Jacobians (parallel)
//! - dispatch to the optimizer behind each `FitMethod`
//! - estimate standard errors and run fits on a background worker

pub mod covariance;
pub mod engine;
pub mod methods;
pub mod params;
pub mod problem;
pub mod worker;

pub use engine::GlobalFitEngine;
pub use methods::{Minimizer, MinimizerOutcome, Settings, minimizer_for};
pub use params::ParameterLayout;
pub use problem::{FitProblem, ScalarObjective};
pub use worker::{FitHandle, FitJob, FitStatus};
