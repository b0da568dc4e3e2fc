//! `cobyla`: derivative-free trust-region search.
//!
//! Each iteration samples the cost at `x ± ρ·e_k`, builds a separable
//! quadratic model from those points (central slope and curvature per
//! coordinate) and tries the model's minimizer, clipped to a few multiples of
//! the trust radius `ρ`. The best sampled point is accepted whenever it
//! improves on `x`; otherwise `ρ` is halved. The search ends once `ρ` falls
//! below its final value or an accepted step barely changes the cost.

use nalgebra::DVector;

use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

const RHO_BEGIN: f64 = 1.0;
/// Longest model step, in units of `ρ`.
const TRUST_FACTOR: f64 = 4.0;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    let rho_end = settings.xtol.max(1e-8);
    let mut rho = RHO_BEGIN;

    let mut x = x0;
    let mut f = obj.value(&x);
    if !f.is_finite() {
        return MinimizerOutcome::stopped(x, 0, "objective is not finite at the initial point");
    }

    let mut iter = 0;
    loop {
        if rho < rho_end {
            return MinimizerOutcome::converged(x, iter, "trust radius below rhoend");
        }
        if !settings.budget_left(obj) {
            return MinimizerOutcome::budget_exhausted(x, iter, settings.max_nfev);
        }
        iter += 1;

        let star = sample_star(obj, &x, f, rho);
        let step = model_step(&star, rho);
        let trial = &x + &step;
        let f_trial = obj.value(&trial);

        let (x_new, f_new) = star
            .points
            .into_iter()
            .chain([(trial, f_trial)])
            .filter(|(_, v)| v.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((x.clone(), f));

        if f_new < f {
            let moved = (&x_new - &x).norm();
            let decrease = f - f_new;
            x = x_new;
            if decrease <= settings.ftol * f.abs() {
                return MinimizerOutcome::converged(x, iter, "relative reduction of f below ftol");
            }
            f = f_new;
            rho = moved.clamp(rho_end, 2.0 * rho);
        } else {
            rho *= 0.5;
        }
    }
}

/// Costs on the star `x ± ρ·e_k` and the separable model derived from them.
struct Star {
    points: Vec<(DVector<f64>, f64)>,
    slope: DVector<f64>,
    curvature: DVector<f64>,
}

fn sample_star(obj: &dyn ScalarObjective, x: &DVector<f64>, f: f64, rho: f64) -> Star {
    let n = x.len();
    let mut points = Vec::with_capacity(2 * n);
    let mut slope = DVector::zeros(n);
    let mut curvature = DVector::zeros(n);
    for k in 0..n {
        let mut plus = x.clone();
        plus[k] += rho;
        let mut minus = x.clone();
        minus[k] -= rho;
        let (fp, fm) = (obj.value(&plus), obj.value(&minus));
        match (fp.is_finite(), fm.is_finite()) {
            (true, true) => {
                slope[k] = (fp - fm) / (2.0 * rho);
                curvature[k] = (fp - 2.0 * f + fm) / (rho * rho);
            }
            (true, false) => slope[k] = (fp - f) / rho,
            (false, true) => slope[k] = (f - fm) / rho,
            (false, false) => {}
        }
        points.push((plus, fp));
        points.push((minus, fm));
    }
    Star {
        points,
        slope,
        curvature,
    }
}

/// Minimizer of the separable model, or a step of `ρ` downhill along
/// coordinates without positive curvature; at most `TRUST_FACTOR·ρ` long.
fn model_step(star: &Star, rho: f64) -> DVector<f64> {
    let mut step = star.slope.zip_map(&star.curvature, |g, c| {
        if g == 0.0 {
            0.0
        } else if c > 0.0 {
            -g / c
        } else {
            -g.signum() * rho
        }
    });
    let len = step.norm();
    let limit = TRUST_FACTOR * rho;
    if len > limit {
        step *= limit / len;
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn cobyla_reaches_valley_minimum() {
        let obj = Valley::new(2);
        let out = minimize(&obj, DVector::zeros(2), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-3);
    }

    #[test]
    fn cobyla_reports_exhausted_budget() {
        let obj = Valley::new(3);
        let tight = Settings {
            max_nfev: 20,
            ..settings()
        };
        let out = minimize(&obj, DVector::zeros(3), &tight);
        assert!(!out.success);
        assert!(out.message.contains("maximum number"), "{}", out.message);
    }

    #[test]
    fn model_step_is_newton_on_a_separable_quadratic() {
        let star = Star {
            points: Vec::new(),
            slope: DVector::from_vec(vec![2.0, -1.0]),
            curvature: DVector::from_vec(vec![4.0, 2.0]),
        };
        let step = model_step(&star, 1.0);
        assert_near(&step, &DVector::from_vec(vec![-0.5, 0.5]), 1e-12);
    }

    #[test]
    fn model_step_is_clipped_to_the_trust_radius() {
        let star = Star {
            points: Vec::new(),
            slope: DVector::from_vec(vec![100.0]),
            curvature: DVector::from_vec(vec![1.0]),
        };
        let step = model_step(&star, 0.5);
        assert!((step.norm() - TRUST_FACTOR * 0.5).abs() < 1e-12);
        assert!(step[0] < 0.0);
    }
}
