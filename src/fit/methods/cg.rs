//! `cg`: nonlinear conjugate gradient (Polak–Ribière+ with restarts).

use argmin::core::{Error, Executor};
use argmin::solver::conjugategradient::NonlinearConjugateGradient;
use argmin::solver::conjugategradient::beta::PolakRibierePlus;
use nalgebra::DVector;

use super::driver::{GradientState, MoreThuente, RunEnd, Stopping, drive, run_end};
use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    let n = x0.len();
    drive(obj, x0, settings, |objective, start, rule| -> Result<RunEnd, Error> {
        // Strong Wolfe curvature condition keeps the directions conjugate.
        let linesearch = MoreThuente::new().with_c(1e-4, 0.1)?;
        let solver: NonlinearConjugateGradient<Vec<f64>, _, _, f64> =
            NonlinearConjugateGradient::new(linesearch, PolakRibierePlus::new())
                .restart_iters(n.max(1) as u64)
                .restart_orthogonality(0.1);
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
    fn conjugate_gradient_reaches_valley_minimum() {
        let obj = Valley::new(3);
        let out = minimize(&obj, DVector::zeros(3), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-3);
    }
}
