//! `leastsq`: MINPACK-style Levenberg–Marquardt via the `levenberg-marquardt` crate.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, Owned};

use super::{Minimizer, MinimizerOutcome, Settings};
use crate::fit::problem::FitProblem;

/// Adapts `FitProblem` to the crate's problem trait.
struct LmProblem<'p, 'a> {
    problem: &'p FitProblem<'a>,
    x: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmProblem<'_, '_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.problem.residuals(&self.x);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let j = self.problem.jacobian(&self.x);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

pub struct LevenbergMarquardtMinimizer;

impl Minimizer for LevenbergMarquardtMinimizer {
    fn minimize(&self, problem: &FitProblem<'_>, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
        let n = x0.len();
        // The crate budgets `patience * (n + 1)` residual evaluations.
        let patience = (settings.max_nfev / (n + 1)).max(1);
        let solver = LevenbergMarquardt::new()
            .with_ftol(settings.ftol)
            .with_xtol(settings.xtol)
            .with_gtol(settings.gtol)
            .with_patience(patience);

        let (solved, report) = solver.minimize(LmProblem { problem, x: x0 });
        let message = format!("{:?}", report.termination);
        log::debug!(
            "leastsq finished after {} evaluations: {message}",
            report.number_of_evaluations
        );

        if report.termination.was_successful() {
            MinimizerOutcome::converged(solved.x, report.number_of_evaluations, message)
        } else {
            MinimizerOutcome::stopped(solved.x, report.number_of_evaluations, message)
        }
    }
}
