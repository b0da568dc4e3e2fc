//! `lbfgsb`: limited-memory BFGS.
//!
//! Bounds are already folded into the internal parameters, so plain L-BFGS
//! with a Moré–Thuente line search is used.

use argmin::core::{Error, Executor};
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DVector;

use super::driver::{GradientState, MoreThuente, RunEnd, Stopping, drive, run_end};
use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

/// Number of correction pairs kept.
const MEMORY: usize = 10;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    drive(obj, x0, settings, |objective, start, rule| -> Result<RunEnd, Error> {
        let solver: LBFGS<_, Vec<f64>, Vec<f64>, f64> =
            LBFGS::new(MoreThuente::new(), MEMORY).with_tolerance_grad(settings.gtol)?;
        let res = Executor::new(objective, Stopping::new(solver, rule))
            .configure(|state: GradientState| state.param(start).max_iters(settings.max_iters()))
            .run()?;
        Ok(run_end(res.state()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn lbfgs_reaches_valley_minimum() {
        let obj = Valley::new(4);
        let out = minimize(&obj, DVector::zeros(4), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-4);
    }

    #[test]
    fn lbfgs_stops_where_the_start_is_already_optimal() {
        let obj = Valley::new(2);
        let out = minimize(&obj, obj.minimum(), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-6);
    }
}
