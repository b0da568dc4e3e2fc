//! Optimizers behind `FitMethod`.
//!
//! Every method works on unbounded internal parameters and shares one
//! contract: start at `x0`, stay within the evaluation budget, and report
//! whether it converged. Vector methods (`leastsq`, `least_squares`) consume
//! residuals and Jacobians; the rest minimize the scalar cost through
//! `ScalarObjective`, which is also how the global methods wrap their local
//! searches. Gradient methods and Nelder–Mead run on argmin solvers.

use nalgebra::DVector;

use crate::domain::{FitMethod, FitOptions};
use crate::fit::problem::{FitProblem, ScalarObjective};

pub mod ampgo;
pub mod basinhopping;
pub mod bfgs;
pub mod cg;
pub mod cobyla;
mod driver;
pub mod lbfgs;
pub mod lm;
pub mod nelder;
pub mod powell;
pub mod tnc;
pub mod trf;

/// Stopping rules shared by all methods.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub max_nfev: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub global_iterations: usize,
    pub seed: u64,
}

impl Settings {
    pub fn from_options(options: &FitOptions, n_vars: usize) -> Self {
        Self {
            max_nfev: options.max_nfev_for(n_vars),
            ftol: options.ftol,
            xtol: options.xtol,
            gtol: options.gtol,
            global_iterations: options.global_iterations,
            seed: options.seed,
        }
    }

    /// Iteration cap handed to argmin; the evaluation budget is what binds.
    pub(crate) fn max_iters(&self) -> u64 {
        self.max_nfev as u64
    }

    pub(crate) fn budget_left<O: ScalarObjective + ?Sized>(&self, obj: &O) -> bool {
        obj.evaluations() < self.max_nfev
    }

    /// Relative decrease of the cost small enough to stop.
    pub(crate) fn f_converged(&self, f_prev: f64, f: f64) -> bool {
        (f_prev - f).abs() <= self.ftol * f_prev.abs().max(f.abs()).max(1.0)
    }

    /// Step small relative to the current point.
    pub(crate) fn x_converged(&self, step: &DVector<f64>, x: &DVector<f64>) -> bool {
        step.norm() <= self.xtol * (self.xtol + x.norm())
    }
}

/// What an optimizer hands back.
#[derive(Debug, Clone)]
pub struct MinimizerOutcome {
    /// Best internal parameters found.
    pub x: DVector<f64>,
    pub success: bool,
    pub message: String,
    pub n_iter: usize,
}

impl MinimizerOutcome {
    pub(crate) fn converged(x: DVector<f64>, n_iter: usize, message: impl Into<String>) -> Self {
        Self {
            x,
            success: true,
            message: message.into(),
            n_iter,
        }
    }

    pub(crate) fn stopped(x: DVector<f64>, n_iter: usize, message: impl Into<String>) -> Self {
        Self {
            x,
            success: false,
            message: message.into(),
            n_iter,
        }
    }

    pub(crate) fn budget_exhausted(x: DVector<f64>, n_iter: usize, max_nfev: usize) -> Self {
        Self::stopped(
            x,
            n_iter,
            format!("maximum number of function evaluations ({max_nfev}) exceeded"),
        )
    }
}

/// An optimizer usable by the global-fit engine.
pub trait Minimizer: Send + Sync {
    fn minimize(&self, problem: &FitProblem<'_>, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome;
}

/// Adapter for methods that only need the scalar cost.
struct Scalar(fn(&dyn ScalarObjective, DVector<f64>, &Settings) -> MinimizerOutcome);

impl Minimizer for Scalar {
    fn minimize(&self, problem: &FitProblem<'_>, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
        (self.0)(problem, x0, settings)
    }
}

/// The optimizer implementing `method`.
pub fn minimizer_for(method: FitMethod) -> Box<dyn Minimizer> {
    match method {
        FitMethod::Leastsq => Box::new(lm::LevenbergMarquardtMinimizer),
        FitMethod::LeastSquares => Box::new(trf::TrustRegionMinimizer),
        FitMethod::Basinhopping => Box::new(Scalar(basinhopping::minimize)),
        FitMethod::Ampgo => Box::new(Scalar(ampgo::minimize)),
        FitMethod::Nelder => Box::new(Scalar(nelder::minimize)),
        FitMethod::Lbfgsb => Box::new(Scalar(lbfgs::minimize)),
        FitMethod::Powell => Box::new(Scalar(powell::minimize)),
        FitMethod::Cg => Box::new(Scalar(cg::minimize)),
        FitMethod::Cobyla => Box::new(Scalar(cobyla::minimize)),
        FitMethod::Bfgs => Box::new(Scalar(bfgs::minimize)),
        FitMethod::Tnc => Box::new(Scalar(tnc::minimize)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nalgebra::DVector;

    use crate::fit::problem::ScalarObjective;

    /// Rosenbrock-like valley with minimum at (1, 2, ...).
    pub struct Valley {
        pub dim: usize,
        pub calls: AtomicUsize,
    }

    impl Valley {
        pub fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn minimum(&self) -> DVector<f64> {
            DVector::from_fn(self.dim, |i, _| (i + 1) as f64)
        }
    }

    impl ScalarObjective for Valley {
        fn dim(&self) -> usize {
            self.dim
        }

        fn value(&self, x: &DVector<f64>) -> f64 {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let target = self.minimum();
            let mut f = 0.0;
            for i in 0..self.dim {
                let d = x[i] - target[i];
                f += (i as f64 + 1.0) * d * d;
            }
            f + 0.5 * (x[0] - 1.0).powi(2) * (x[self.dim - 1] - self.dim as f64).powi(2)
        }

        fn evaluations(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    pub fn settings() -> super::Settings {
        super::Settings {
            max_nfev: 20_000,
            ftol: 1e-12,
            xtol: 1e-10,
            gtol: 1e-8,
            global_iterations: 5,
            seed: 7,
        }
    }

    pub fn assert_near(x: &DVector<f64>, want: &DVector<f64>, tol: f64) {
        let err = (x - want).amax();
        assert!(err < tol, "got {x:?}, want {want:?} (err {err})");
    }
}
