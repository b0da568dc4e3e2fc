//! `bfgs`: quasi-Newton with a dense inverse-Hessian update and a
//! Moré–Thuente line search.

use argmin::core::{Error, Executor};
use argmin::solver::quasinewton::BFGS;
use nalgebra::DVector;

use super::driver::{HessianState, MoreThuente, RunEnd, Stopping, drive, identity, run_end};
use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    let n = x0.len();
    drive(obj, x0, settings, |objective, start, rule| -> Result<RunEnd, Error> {
        let solver = BFGS::new(MoreThuente::new()).with_tolerance_grad(settings.gtol)?;
        let res = Executor::new(objective, Stopping::new(solver, rule))
            .configure(|state: HessianState| {
                state
                    .param(start)
                    .inv_hessian(identity(n))
                    .max_iters(settings.max_iters())
            })
            .run()?;
        Ok(run_end(res.state()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn bfgs_reaches_valley_minimum() {
        let obj = Valley::new(3);
        let out = minimize(&obj, DVector::zeros(3), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-4);
    }

    #[test]
    fn bfgs_reports_exhausted_budget() {
        let obj = Valley::new(3);
        let tight = Settings {
            max_nfev: 12,
            ..settings()
        };
        let out = minimize(&obj, DVector::zeros(3), &tight);
        assert!(!out.success);
        assert!(out.message.contains("maximum number"), "{}", out.message);
    }
}
