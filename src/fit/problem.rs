//! The global-fit objective.
//!
//! Residuals are `model - target` over every retained rSV, flattened column by
//! column (all time delays of rSV 0, then rSV 1, ...). Vector-valued methods
//! use the residuals and Jacobian directly; scalar methods minimize
//! `0.5 · ‖r‖²` through the `ScalarObjective` trait.

use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::fit::params::ParameterLayout;
use crate::models::KineticModel;

/// Relative step used for forward-difference derivatives.
const FD_STEP: f64 = 1.4901161193847656e-8; // sqrt(f64::EPSILON)

/// A scalar function to minimize over an unbounded space.
pub trait ScalarObjective: Sync {
    fn dim(&self) -> usize;

    fn value(&self, x: &DVector<f64>) -> f64;

    /// Objective evaluations spent so far (shared with every wrapper of the same problem).
    fn evaluations(&self) -> usize;

    /// Forward-difference gradient, columns evaluated in parallel.
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let f0 = self.value(x);
        let grads: Vec<f64> = (0..self.dim())
            .into_par_iter()
            .map(|k| {
                let h = FD_STEP * x[k].abs().max(1.0);
                let mut xp = x.clone();
                xp[k] += h;
                (self.value(&xp) - f0) / h
            })
            .collect();
        DVector::from_vec(grads)
    }

    /// Symmetrized forward difference of `gradient`.
    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n = self.dim();
        let g0 = self.gradient(x);
        let mut h = DMatrix::zeros(n, n);
        for k in 0..n {
            // Gradients are themselves finite differences, so the step is well above sqrt(eps).
            let step = 1e-4 * x[k].abs().max(1.0);
            let mut xp = x.clone();
            xp[k] += step;
            h.set_column(k, &((self.gradient(&xp) - &g0) / step));
        }
        (&h + h.transpose()) * 0.5
    }
}

/// Bound fit data, model and parameter layout.
pub struct FitProblem<'a> {
    model: &'a KineticModel,
    time_delays: &'a [f64],
    targets: &'a DMatrix<f64>,
    layout: &'a ParameterLayout,
    n_fev: AtomicUsize,
}

impl<'a> FitProblem<'a> {
    /// `targets` is time delays × retained components.
    ///
    /// # Panics
    /// Panics if `targets` does not have one row per time delay and one column
    /// per model component.
    pub fn new(
        model: &'a KineticModel,
        time_delays: &'a [f64],
        targets: &'a DMatrix<f64>,
        layout: &'a ParameterLayout,
    ) -> Self {
        assert_eq!(targets.shape(), (time_delays.len(), model.n_components()));
        Self {
            model,
            time_delays,
            targets,
            layout,
            n_fev: AtomicUsize::new(0),
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        self.layout
    }

    pub fn n_data(&self) -> usize {
        self.targets.len()
    }

    pub fn n_vars(&self) -> usize {
        self.layout.len()
    }

    pub fn n_fev(&self) -> usize {
        self.n_fev.load(Ordering::Relaxed)
    }

    /// Model traces at external parameter values.
    pub fn predict_external(&self, ext: &[f64]) -> DMatrix<f64> {
        let (taus, amps) = self.layout.split(ext);
        self.model.predict(self.time_delays, &taus, &amps)
    }

    /// Residual vector at external parameter values. Does not count as an evaluation.
    pub fn residuals_external(&self, ext: &[f64]) -> DVector<f64> {
        let diff = self.predict_external(ext) - self.targets;
        DVector::from_column_slice(diff.as_slice())
    }

    /// Residual vector at internal parameter values.
    pub fn residuals(&self, internal: &DVector<f64>) -> DVector<f64> {
        self.n_fev.fetch_add(1, Ordering::Relaxed);
        let ext = self.layout.to_external(internal);
        self.residuals_external(ext.as_slice())
    }

    /// Forward-difference Jacobian of `residuals` in internal space.
    pub fn jacobian(&self, internal: &DVector<f64>) -> DMatrix<f64> {
        let r0 = self.residuals(internal);
        let columns: Vec<DVector<f64>> = (0..internal.len())
            .into_par_iter()
            .map(|k| {
                let h = FD_STEP * internal[k].abs().max(1.0);
                let mut xp = internal.clone();
                xp[k] += h;
                (self.residuals(&xp) - &r0) / h
            })
            .collect();
        DMatrix::from_columns(&columns)
    }

    /// Central-difference Jacobian in external space, used for covariance.
    ///
    /// Steps are kept inside the parameter bounds.
    pub fn jacobian_external(&self, ext: &DVector<f64>) -> DMatrix<f64> {
        let specs = self.layout.specs();
        let columns: Vec<DVector<f64>> = (0..ext.len())
            .into_par_iter()
            .map(|k| {
                let h = 1e-6 * ext[k].abs().max(1e-3);
                let hi = (ext[k] + h).min(specs[k].max);
                let lo = (ext[k] - h).max(specs[k].min);
                let mut xp = ext.clone();
                let mut xm = ext.clone();
                xp[k] = hi;
                xm[k] = lo;
                let span = hi - lo;
                if span <= 0.0 {
                    return DVector::zeros(self.n_data());
                }
                (self.residuals_external(xp.as_slice()) - self.residuals_external(xm.as_slice())) / span
            })
            .collect();
        DMatrix::from_columns(&columns)
    }

    /// `0.5 · ‖r‖²`; non-finite residuals give `+∞`.
    pub fn cost(&self, internal: &DVector<f64>) -> f64 {
        cost_of(&self.residuals(internal))
    }
}

pub fn cost_of(residuals: &DVector<f64>) -> f64 {
    let c = 0.5 * residuals.norm_squared();
    if c.is_finite() { c } else { f64::INFINITY }
}

impl ScalarObjective for FitProblem<'_> {
    fn dim(&self) -> usize {
        self.n_vars()
    }

    fn value(&self, x: &DVector<f64>) -> f64 {
        self.cost(x)
    }

    fn evaluations(&self) -> usize {
        self.n_fev()
    }

    /// `Jᵀ r` from the residual Jacobian.
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let r = self.residuals(x);
        let j = self.jacobian(x);
        j.transpose() * r
    }

    /// Gauss–Newton approximation `JᵀJ`.
    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let j = self.jacobian(x);
        j.transpose() * j
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialGuesses;
    use crate::domain::{ComponentSelection, FitOptions};

    fn fixture() -> (KineticModel, Vec<f64>, DMatrix<f64>, ParameterLayout) {
        let sel = ComponentSelection::new([0]).unwrap();
        let model = KineticModel::generic(&sel);
        let t: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let targets = DMatrix::from_fn(6, 1, |r, _| 2.0 * (-(r as f64) / 3.0).exp());
        let guesses = InitialGuesses {
            taus: vec![3.0],
            amps: DMatrix::from_element(1, 1, 2.0),
            fallback_reason: None,
        };
        let layout = ParameterLayout::new(&sel, &guesses, &FitOptions::default()).unwrap();
        (model, t, targets, layout)
    }

    #[test]
    fn residuals_vanish_at_true_parameters_and_count_evaluations() {
        let (model, t, targets, layout) = fixture();
        let problem = FitProblem::new(&model, &t, &targets, &layout);
        let x = layout.to_internal(&layout.initial_external());
        let r = problem.residuals(&x);
        assert!(r.amax() < 1e-9);
        assert_eq!(problem.n_fev(), 1);
        assert!(problem.cost(&x) < 1e-18);
    }

    #[test]
    fn analytic_style_gradient_matches_finite_difference() {
        let (model, t, targets, layout) = fixture();
        let problem = FitProblem::new(&model, &t, &targets, &layout);
        let x = layout.to_internal(&DVector::from_vec(vec![5.0, 1.0]));
        let g = ScalarObjective::gradient(&problem, &x);
        let h = 1e-6;
        for k in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[k] += h;
            xm[k] -= h;
            let fd = (problem.cost(&xp) - problem.cost(&xm)) / (2.0 * h);
            assert!((g[k] - fd).abs() < 1e-4 * fd.abs().max(1.0), "k={k}: {} vs {fd}", g[k]);
        }
    }

    #[test]
    fn gauss_newton_hessian_matches_curvature_at_exact_fit() {
        let (model, t, targets, layout) = fixture();
        let problem = FitProblem::new(&model, &t, &targets, &layout);
        let x = layout.to_internal(&layout.initial_external());
        let h = ScalarObjective::hessian(&problem, &x);
        assert_eq!(h.shape(), (2, 2));
        assert!((h[(0, 1)] - h[(1, 0)]).abs() < 1e-12);
        let step = 1e-4;
        for k in 0..2 {
            let mut xp = x.clone();
            xp[k] += step;
            let dg = (ScalarObjective::gradient(&problem, &xp) - ScalarObjective::gradient(&problem, &x)) / step;
            for i in 0..2 {
                assert!((h[(i, k)] - dg[i]).abs() < 1e-3 * h[(k, k)].abs().max(1.0), "({i}, {k})");
            }
        }
    }
}
