//! `tnc`: truncated Newton.
//!
//! The Newton system `H p = -g` is solved approximately by conjugate
//! gradients inside argmin's Newton-CG. The global fit supplies the
//! Gauss–Newton Hessian `JᵀJ`; other objectives fall back to finite
//! differences of the gradient.

use argmin::core::{Error, Executor};
use argmin::solver::newton::NewtonCG;
use nalgebra::DVector;

use super::driver::{HessianState, MoreThuente, RunEnd, Stopping, drive, run_end};
use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    drive(obj, x0, settings, |objective, start, rule| -> Result<RunEnd, Error> {
        let solver: NewtonCG<_, f64> = NewtonCG::new(MoreThuente::new());
        let res = Executor::new(objective, Stopping::new(solver, rule))
            .configure(|state: HessianState| state.param(start).max_iters(settings.max_iters()))
            .run()?;
        Ok(run_end(res.state()))
    })
}
