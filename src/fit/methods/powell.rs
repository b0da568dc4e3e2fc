//! `powell`: Powell's conjugate-direction method (derivative free).

use argmin::core::{CostFunction, Error, Executor, IterState, State};
use argmin::solver::brent::BrentOpt;
use nalgebra::DVector;

use super::{MinimizerOutcome, Settings};
use crate::fit::problem::ScalarObjective;

/// Evaluations allowed per line minimization.
const LINE_EVALS: usize = 100;
const GROW: f64 = 1.618_033_988_749_895;

pub fn minimize(obj: &dyn ScalarObjective, x0: DVector<f64>, settings: &Settings) -> MinimizerOutcome {
    let n = x0.len();
    let mut directions: Vec<DVector<f64>> = (0..n)
        .map(|k| {
            let mut e = DVector::zeros(n);
            e[k] = 1.0;
            e
        })
        .collect();
    let mut x = x0;
    let mut f = obj.value(&x);
    if !f.is_finite() {
        return MinimizerOutcome::stopped(x, 0, "objective is not finite at the initial point");
    }
    let line_tol = settings.xtol.sqrt().max(1e-10);

    let mut iter = 0;
    loop {
        if !settings.budget_left(obj) {
            return MinimizerOutcome::budget_exhausted(x, iter, settings.max_nfev);
        }
        iter += 1;

        let x_start = x.clone();
        let f_start = f;
        let mut biggest_drop = 0.0;
        let mut biggest_index = 0;
        for (k, dir) in directions.iter().enumerate() {
            let (x_new, f_new) = line_minimize(obj, &x, f, dir, line_tol);
            if f - f_new > biggest_drop {
                biggest_drop = f - f_new;
                biggest_index = k;
            }
            x = x_new;
            f = f_new;
        }

        if 2.0 * (f_start - f) <= settings.ftol * (f_start.abs() + f.abs()) + 1e-20 {
            return MinimizerOutcome::converged(x, iter, "relative reduction of f below ftol");
        }

        // Replace the direction of largest decrease by the overall displacement.
        let displacement = &x - &x_start;
        let extrapolated = &x + &displacement;
        let f_ext = obj.value(&extrapolated);
        if f_ext < f_start {
            let t = 2.0 * (f_start - 2.0 * f + f_ext) * (f_start - f - biggest_drop).powi(2)
                - biggest_drop * (f_start - f_ext).powi(2);
            if t < 0.0 && displacement.norm() > 0.0 {
                (x, f) = line_minimize(obj, &x, f, &displacement, line_tol);
                directions.remove(biggest_index);
                directions.push(displacement);
            }
        }
    }
}

/// `f(x + α·d)` as a function of `α`.
struct Line<'a> {
    obj: &'a dyn ScalarObjective,
    x: &'a DVector<f64>,
    dir: &'a DVector<f64>,
}

impl Line<'_> {
    fn at(&self, alpha: f64) -> f64 {
        let v = self.obj.value(&(self.x + self.dir * alpha));
        if v.is_finite() { v } else { f64::INFINITY }
    }
}

impl CostFunction for Line<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, alpha: &f64) -> Result<f64, Error> {
        Ok(self.at(*alpha))
    }
}

/// Minimize along `dir` from `x`: bracket the minimum, then refine it with
/// Brent's method. Never returns a point worse than `x` itself.
fn line_minimize(
    obj: &dyn ScalarObjective,
    x: &DVector<f64>,
    f0: f64,
    dir: &DVector<f64>,
    tol: f64,
) -> (DVector<f64>, f64) {
    let line = Line { obj, x, dir };
    let (a, b, fb, c) = bracket(&line, f0);

    let (lo, hi) = if a < c { (a, c) } else { (c, a) };
    let brent = BrentOpt::new(lo, hi).set_tolerance(tol.max(f64::EPSILON.sqrt()), tol * 1e-3);
    let refined = Executor::new(line, brent)
        .configure(|state: IterState<f64, (), (), (), (), f64>| state.max_iters(LINE_EVALS as u64))
        .run()
        .ok()
        .and_then(|res| {
            let state = res.state();
            state.get_best_param().map(|alpha| (*alpha, state.get_best_cost()))
        });

    let mut best = (0.0, f0);
    for (alpha, value) in refined.into_iter().chain([(b, fb)]) {
        if value < best.1 {
            best = (alpha, value);
        }
    }
    (x + dir * best.0, best.1)
}

/// Step sizes `(a, b, f(b), c)` with `f(b)` no larger than at either end.
fn bracket(line: &Line<'_>, f0: f64) -> (f64, f64, f64, f64) {
    let (mut a, mut b) = (0.0, 1.0);
    let mut fb = line.at(b);
    if fb >= f0 {
        let f_neg = line.at(-1.0);
        if f_neg >= f0 {
            return (-1.0, 0.0, f0, 1.0);
        }
        b = -1.0;
        fb = f_neg;
    }

    // Expand away from zero until the cost rises again.
    let mut c = b + GROW * (b - a);
    let mut fc = line.at(c);
    let mut expansions = 0;
    while fc < fb && expansions < LINE_EVALS {
        a = b;
        b = c;
        fb = fc;
        c = b + GROW * (b - a);
        fc = line.at(c);
        expansions += 1;
    }
    (a, b, fb, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::methods::test_support::{Valley, assert_near, settings};

    #[test]
    fn powell_reaches_valley_minimum() {
        let obj = Valley::new(3);
        let out = minimize(&obj, DVector::zeros(3), &settings());
        assert!(out.success, "{}", out.message);
        assert_near(&out.x, &obj.minimum(), 1e-4);
    }

    #[test]
    fn line_minimize_locates_one_dimensional_minimum() {
        let obj = Valley::new(1);
        let x = DVector::from_vec(vec![-3.0]);
        let d = DVector::from_vec(vec![1.0]);
        let (best, value) = line_minimize(&obj, &x, obj.value(&x), &d, 1e-8);
        assert!((best[0] - 1.0).abs() < 1e-6, "{best:?}");
        assert!(value < 1e-10);
    }

    #[test]
    fn line_minimize_never_moves_uphill() {
        let obj = Valley::new(1);
        let x = obj.minimum();
        let d = DVector::from_vec(vec![1.0]);
        let (best, value) = line_minimize(&obj, &x, 0.0, &d, 1e-8);
        assert_eq!(value, 0.0);
        assert_eq!(best, x);
    }
}
