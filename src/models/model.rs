//! Kinetic model evaluation.
//!
//! The fitter relies on two primitive operations:
//! - build the basis matrix `B` (rows = time delays, one column per component)
//!   for given decay constants
//! - predict every retained rSV at once as `B · Aᵀ`, where row `i` of the
//!   amplitude matrix `A` belongs to rSV `i`
//!
//! The generic model uses `exp(-t/τ_j)` as column `j`; a target model uses the
//! user's summand for component `j`.

use nalgebra::DMatrix;

use crate::domain::{ComponentSelection, ModelDescription};
use crate::error::Result;
use crate::math::decay;
use crate::models::expr::BoundExpression;
use crate::models::target::TargetModel;

#[derive(Debug, Clone)]
pub enum KineticModel {
    /// Sum of exponentials.
    Generic { n_components: usize },
    /// User summands bound to the selection.
    Target {
        model: TargetModel,
        bound: Vec<BoundExpression>,
    },
}

impl KineticModel {
    pub fn generic(selection: &ComponentSelection) -> Self {
        KineticModel::Generic {
            n_components: selection.len(),
        }
    }

    pub fn target(model: TargetModel) -> Result<Self> {
        let bound = model
            .expressions()
            .iter()
            .map(|e| e.bind(model.selection()))
            .collect::<Result<Vec<_>>>()?;
        Ok(KineticModel::Target { model, bound })
    }

    pub fn n_components(&self) -> usize {
        match self {
            KineticModel::Generic { n_components } => *n_components,
            KineticModel::Target { bound, .. } => bound.len(),
        }
    }

    pub fn describe(&self) -> ModelDescription {
        match self {
            KineticModel::Generic { .. } => ModelDescription::Generic,
            KineticModel::Target { model, .. } => model.describe(),
        }
    }

    /// Fill `out` (time delays × components) with the basis for `taus`.
    ///
    /// # Panics
    /// Panics if `out` is not `time_delays.len() × n_components()` or `taus`
    /// is shorter than `n_components()`. Callers size these correctly.
    pub fn fill_basis(&self, time_delays: &[f64], taus: &[f64], out: &mut DMatrix<f64>) {
        match self {
            KineticModel::Generic { n_components } => {
                for j in 0..*n_components {
                    for (r, &t) in time_delays.iter().enumerate() {
                        out[(r, j)] = decay(t, taus[j]);
                    }
                }
            }
            KineticModel::Target { bound, .. } => {
                for (j, expr) in bound.iter().enumerate() {
                    for (r, &t) in time_delays.iter().enumerate() {
                        out[(r, j)] = expr.eval(t, taus);
                    }
                }
            }
        }
    }

    pub fn basis(&self, time_delays: &[f64], taus: &[f64]) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(time_delays.len(), self.n_components());
        self.fill_basis(time_delays, taus, &mut out);
        out
    }

    /// Model traces for every retained rSV: column `i` = `Σ_j A[i,j] · B[:,j]`.
    pub fn predict(&self, time_delays: &[f64], taus: &[f64], amps: &DMatrix<f64>) -> DMatrix<f64> {
        self.basis(time_delays, taus) * amps.transpose()
    }
}
