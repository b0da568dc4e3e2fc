//! `ampgo`: Adaptive Memory Programming for Global Optimization.
//!
//! Alternates local minimization with tunnelling. The tunnelling function
//!
//! ```text
//! T(x) = (f(x) - aspiration)² / Π_s ‖x - s‖
//! ```
//!
//! repels the search from the points `s` in a short tabu list, so a local
//! search on `T` started near the incumbent tends to land in a different
//! basin whose cost is below the aspiration level.

use std::collections::VecDeque;

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{MinimizerOutcome, Settings, lbfgs};
use crate::fit::problem::ScalarObjective;

const TABU_SIZE: usize = 5;
const TUNNEL_ATTEMPTS: usize = 5;
const EPS1: f64 = 0.02;
const EPS2: f64 = 0.1;

struct Tunnel<'o> {
    inner: &'o dyn ScalarObjective,
    aspiration: f64,
    tabu: Vec<DVector<f64>>,
}

impl ScalarObjective for Tunnel<'_> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn value(&self, x: &DVector<f64>) -> f64 {
        let f = self.inner.value(x);
        let numerator = (f - self.aspiration).powi(2);
        let denominator: f64 = self
            .tabu
            .iter()
            .map(|s| (x - s).norm().max(1e-12))
            .product();
        numerator / denominator
    }

    fn evaluations(&self) -> usize {
        self.inner.evaluations()
    }
}

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut tabu: VecDeque<DVector<f64>> = VecDeque::with_capacity(TABU_SIZE);

    let first = lbfgs::minimize(obj, x0, settings);
    let mut best_f = obj.value(&first.x);
    if !best_f.is_finite() {
        return MinimizerOutcome::stopped(first.x, first.n_iter, "local minimization produced a non-finite cost");
    }
    let mut best_x = first.x;
    let mut best_success = first.success;
    push_tabu(&mut tabu, best_x.clone());

    let mut rounds = 0usize;
    let mut tunnel_successes = 0usize;
    while rounds < settings.global_iterations && settings.budget_left(obj) {
        rounds += 1;
        let aspiration = best_f - EPS1 * (1.0 + best_f.abs());

        for _ in 0..TUNNEL_ATTEMPTS {
            if !settings.budget_left(obj) {
                break;
            }
            let scale = EPS2 * (1.0 + best_x.amax());
            let start = best_x.map(|v| v + rng.gen_range(-scale..scale));
            let tunnel = Tunnel {
                inner: obj,
                aspiration,
                tabu: tabu.iter().cloned().collect(),
            };
            let landed = lbfgs::minimize(&tunnel, start, settings);
            let f_landed = obj.value(&landed.x);

            if f_landed.is_finite() && f_landed < best_f {
                // Polish the new basin on the real objective.
                let polished = lbfgs::minimize(obj, landed.x, settings);
                let f_polished = obj.value(&polished.x);
                if polished.success && (f_polished < best_f || !best_success) {
                    best_f = f_polished;
                    best_x = polished.x;
                    best_success = true;
                    tunnel_successes += 1;
                    log::debug!("ampgo round {rounds}: tunnelled to {best_f:.6e}");
                }
                push_tabu(&mut tabu, best_x.clone());
                break;
            }
            push_tabu(&mut tabu, landed.x);
        }
    }

    let message = format!("{rounds} tunnelling rounds, {tunnel_successes} successful");
    if best_success {
        MinimizerOutcome::converged(best_x, rounds, message)
    } else {
        MinimizerOutcome::stopped(best_x, rounds, format!("{message}; best local minimization did not converge"))
    }
}

fn push_tabu(tabu: &mut VecDeque<DVector<f64>>, x: DVector<f64>) {
    if tabu.len() == TABU_SIZE {
        tabu.pop_front();
    }
    tabu.push_back(x);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn ampgo_keeps_the_global_minimum() {
        let obj = Valley::new(2);
        let out = minimize(&obj, DVector::from_vec(vec![4.0, -3.0]), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-4);
    }
}
