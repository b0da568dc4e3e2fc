//! `nelder`: Nelder–Mead downhill simplex.

use argmin::core::{Error, Executor};
use argmin::solver::neldermead::NelderMead;
use nalgebra::DVector;

use super::driver::{RunEnd, SimplexState, drive, run_end};
use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    drive(obj, x0, settings, |objective, start, rule| -> Result<RunEnd, Error> {
        // Spread of the vertex costs, relative to the cost at the start.
        let sd_tolerance = (settings.ftol * rule.initial).max(f64::MIN_POSITIVE);
        let solver = NelderMead::new(initial_simplex(&start)).with_sd_tolerance(sd_tolerance)?;
        let res = Executor::new(objective, solver)
            .configure(|state: SimplexState| state.max_iters(settings.max_iters()))
            .run()?;
        Ok(run_end(res.state()))
    })
}

/// `x0` plus one vertex per coordinate, perturbed by 5 % (0.00025 for zeros).
fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for k in 0..x0.len() {
        let mut v = x0.to_vec();
        v[k] = if v[k] != 0.0 { v[k] * 1.05 } else { 0.00025 };
        simplex.push(v);
    }
    simplex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn nelder_mead_reaches_valley_minimum() {
        let obj = Valley::new(3);
        let out = minimize(&obj, DVector::from_vec(vec![0.0, 0.0, 0.0]), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-4);
    }

    #[test]
    fn nelder_mead_reports_exhausted_budget() {
        let obj = Valley::new(3);
        let tight = Settings {
            max_nfev: 10,
            ..settings()
        };
        let out = minimize(&obj, DVector::from_vec(vec![0.0, 0.0, 0.0]), &tight);
        assert!(!out.success);
    }

    #[test]
    fn initial_simplex_perturbs_each_coordinate_once() {
        let simplex = initial_simplex(&[2.0, 0.0]);
        assert_eq!(simplex, vec![vec![2.0, 0.0], vec![2.1, 0.0], vec![2.0, 0.00025]]);
    }
}
