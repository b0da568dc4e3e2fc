//! `least_squares`: trust-region least squares with a dogleg step.
//!
//! Each iteration combines the Gauss–Newton step (an SVD least-squares solve
//! of `J p = -r`) with the Cauchy point, limited to the trust radius `Δ`.

use nalgebra::{DMatrix, DVector};

use super::{Minimizer, MinimizerOutcome, Settings};
use crate::fit::problem::{FitProblem, cost_of};
use crate::math::solve_least_squares;

pub struct TrustRegionMinimizer;

impl Minimizer for TrustRegionMinimizer {
    fn minimize(&self, problem: &FitProblem<'_>, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
        let mut x = x0;
        let mut r = problem.residuals(&x);
        let mut f = cost_of(&r);
        if !f.is_finite() {
            return MinimizerOutcome::stopped(x, 0, "residuals are not finite at the initial point");
        }
        let mut radius = x.norm().max(1.0);
        let mut jac = problem.jacobian(&x);

        let mut iter = 0;
        loop {
            iter += 1;
            if problem.n_fev() >= settings.max_nfev {
                return MinimizerOutcome::budget_exhausted(x, iter, settings.max_nfev);
            }

            let g = jac.transpose() * &r;
            if g.amax() <= settings.gtol {
                return MinimizerOutcome::converged(x, iter, "gradient below gtol");
            }

            let step = dogleg(&jac, &r, &g, radius);
            let predicted = -(g.dot(&step) + 0.5 * (&jac * &step).norm_squared());
            let x_new = &x + &step;
            let r_new = problem.residuals(&x_new);
            let f_new = cost_of(&r_new);
            let actual = f - f_new;
            let rho = if predicted > 0.0 { actual / predicted } else { -1.0 };

            let step_norm = step.norm();
            if rho < 0.25 {
                radius = 0.25 * step_norm.min(radius);
            } else if rho > 0.75 && step_norm >= 0.99 * radius {
                radius *= 2.0;
            }

            if rho > 1e-4 && f_new.is_finite() {
                let f_done = settings.f_converged(f, f_new);
                let x_done = settings.x_converged(&step, &x);
                x = x_new;
                r = r_new;
                f = f_new;
                if f_done || x_done || f == 0.0 {
                    let why = if f_done { "ftol" } else { "xtol" };
                    return MinimizerOutcome::converged(x, iter, format!("converged ({why})"));
                }
                jac = problem.jacobian(&x);
            } else if radius <= settings.xtol * (settings.xtol + x.norm()) {
                return MinimizerOutcome::converged(x, iter, "trust radius below xtol");
            }
        }
    }
}

/// Dogleg step inside a ball of radius `radius`.
fn dogleg(jac: &DMatrix<f64>, r: &DVector<f64>, g: &DVector<f64>, radius: f64) -> DVector<f64> {
    let gn = solve_least_squares(jac, &(-r));
    if let Some(gn) = &gn {
        if gn.norm() <= radius {
            return gn.clone();
        }
    }

    let jg = jac * g;
    let curvature = jg.norm_squared();
    let g_norm = g.norm();
    if curvature <= 0.0 || g_norm == 0.0 {
        return -g * (radius / g_norm.max(f64::MIN_POSITIVE));
    }
    let cauchy = -g * (g_norm * g_norm / curvature);
    let cauchy_norm = cauchy.norm();
    if cauchy_norm >= radius {
        return -g * (radius / g_norm);
    }

    let Some(gn) = gn else {
        return cauchy;
    };
    // Walk from the Cauchy point towards the Gauss–Newton point until |p| = Δ.
    let d = &gn - &cauchy;
    let a = d.norm_squared();
    let b = 2.0 * cauchy.dot(&d);
    let c = cauchy_norm * cauchy_norm - radius * radius;
    let tau = (-b + (b * b - 4.0 * a * c).max(0.0).sqrt()) / (2.0 * a);
    cauchy + d * tau.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dogleg_takes_full_gauss_newton_step_when_it_fits() {
        let jac = DMatrix::identity(2, 2);
        let r = DVector::from_vec(vec![0.3, -0.4]);
        let g = jac.transpose() * &r;
        let p = dogleg(&jac, &r, &g, 10.0);
        assert!((p - (-&r)).amax() < 1e-12);
    }

    #[test]
    fn dogleg_step_respects_radius() {
        let jac = DMatrix::from_row_slice(2, 2, &[3.0, 0.0, 0.0, 0.1]);
        let r = DVector::from_vec(vec![1.0, 1.0]);
        let g = jac.transpose() * &r;
        let p = dogleg(&jac, &r, &g, 0.5);
        assert!(p.norm() <= 0.5 + 1e-12);
        assert!(g.dot(&p) < 0.0);
    }
}
