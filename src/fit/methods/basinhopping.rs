//! `basinhopping`: random hops between local minima.
//!
//! Each hop displaces the current point uniformly within `±stepsize`, runs
//! L-BFGS from there and accepts the new minimum with the Metropolis rule.
//! Every 50 hops the step size is adapted towards an acceptance rate of 0.5.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{MinimizerOutcome, Settings, lbfgs};
use crate::fit::problem::ScalarObjective;

const STEPSIZE: f64 = 0.5;
const TEMPERATURE: f64 = 1.0;
const TARGET_ACCEPT_RATE: f64 = 0.5;
const ADAPT_INTERVAL: usize = 50;
const STEP_FACTOR: f64 = 0.9;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    let mut rng = StdRng::seed_from_u64(settings.seed);

    let first = lbfgs::minimize(obj, x0, settings);
    let mut current_f = obj.value(&first.x);
    if !current_f.is_finite() {
        return MinimizerOutcome::stopped(first.x, first.n_iter, "local minimization produced a non-finite cost");
    }
    let mut current = first.x.clone();
    let mut best = (first.x, current_f, first.success);

    let mut stepsize = STEPSIZE;
    let mut accepted = 0usize;
    let mut hops = 0usize;
    while hops < settings.global_iterations && settings.budget_left(obj) {
        hops += 1;
        let trial_start = current.map(|v| v + rng.gen_range(-stepsize..stepsize));
        let local = lbfgs::minimize(obj, trial_start, settings);
        let f_local = obj.value(&local.x);

        let accept = f_local.is_finite()
            && (f_local < current_f || rng.gen_range(0.0..1.0) < (-(f_local - current_f) / TEMPERATURE).exp());
        if accept {
            accepted += 1;
            current = local.x.clone();
            current_f = f_local;
        }
        // An unconverged hop (e.g. cut off by the budget) never replaces a converged minimum.
        if local.success && (f_local < best.1 || !best.2) {
            log::debug!("basinhopping hop {hops}: new global minimum {f_local:.6e}");
            best = (local.x, f_local, true);
        }

        if hops % ADAPT_INTERVAL == 0 {
            let rate = accepted as f64 / hops as f64;
            stepsize = if rate > TARGET_ACCEPT_RATE { stepsize / STEP_FACTOR } else { stepsize * STEP_FACTOR };
        }
    }

    let (x, _, local_success) = best;
    let message = format!("{hops} basin hops, {accepted} accepted");
    if local_success {
        MinimizerOutcome::converged(x, hops, message)
    } else {
        MinimizerOutcome::stopped(x, hops, format!("{message}; best local minimization did not converge"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn basinhopping_is_deterministic_for_a_seed() {
        let a = Valley::new(2);
        let b = Valley::new(2);
        let out_a = minimize(&a, DVector::zeros(2), &settings());
        let out_b = minimize(&b, DVector::zeros(2), &settings());
        assert!(out_a.success, "{}", out_a.message);
        assert_eq!(out_a.x, out_b.x);
        assert_near(&out_a.x, &a.minimum(), 1e-4);
    }

    #[test]
    fn basinhopping_keeps_the_converged_minimum_when_the_budget_runs_out() {
        let obj = Valley::new(2);
        let tight = Settings {
            max_nfev: 2_000,
            global_iterations: 1_000,
            ..settings()
        };
        let out = minimize(&obj, DVector::zeros(2), &tight);
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-4);
    }
}
