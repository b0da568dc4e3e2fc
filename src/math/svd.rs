//! Singular-value decomposition of a (bounded) data matrix.
//!
//! nalgebra's SVD does not promise an ordering of the singular values, so
//! `decompose` sorts them in descending order and permutes the singular
//! vectors to match. Each (leftSV, rightSV) pair keeps the sign nalgebra gave
//! it; flipping both vectors together would not change the reconstruction.

use nalgebra::{DMatrix, DVector};

use crate::domain::{ComponentSelection, DataMatrix};
use crate::error::{Result, SvdgfError};

/// `M = U · diag(σ) · Vᵀ` with σ descending.
#[derive(Debug, Clone)]
pub struct SingularValueDecomposition {
    /// Left singular vectors, one column per component (rows = wavelengths).
    pub left: DMatrix<f64>,
    /// Singular values, descending.
    pub singular_values: DVector<f64>,
    /// Right singular vectors, one column per component (rows = time delays).
    pub right: DMatrix<f64>,
}

impl SingularValueDecomposition {
    pub fn n_components(&self) -> usize {
        self.singular_values.len()
    }

    /// Rank-reduced reconstruction `Σ_i U_i σ_i V_iᵀ` over the selected components.
    pub fn reconstruct(&self, selection: &ComponentSelection) -> Result<DMatrix<f64>> {
        let retained = self.select(selection)?;
        Ok(retained.reconstruct())
    }

    /// Pick the components named in `selection`.
    pub fn select(&self, selection: &ComponentSelection) -> Result<RetainedComponents> {
        let available = self.n_components();
        if let Some(bad) = selection.iter().find(|&c| c >= available) {
            return Err(SvdgfError::InvalidSelection(format!(
                "component {bad} requested but only {available} are available (0..{})",
                available.saturating_sub(1)
            )));
        }

        let cols: Vec<usize> = selection.indices().to_vec();
        Ok(RetainedComponents {
            selection: selection.clone(),
            left: self.left.select_columns(cols.iter()),
            singular_values: DVector::from_iterator(
                cols.len(),
                cols.iter().map(|&c| self.singular_values[c]),
            ),
            right: self.right.select_columns(cols.iter()),
        })
    }
}

/// The subset of an SVD retained for fitting.
///
/// Column `j` of each matrix belongs to component `selection.indices()[j]`.
#[derive(Debug, Clone)]
pub struct RetainedComponents {
    pub selection: ComponentSelection,
    pub left: DMatrix<f64>,
    pub singular_values: DVector<f64>,
    pub right: DMatrix<f64>,
}

impl RetainedComponents {
    /// Fit targets `σ_j · V_j`, one column per retained component.
    pub fn weighted_right(&self) -> DMatrix<f64> {
        let mut out = self.right.clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            col *= self.singular_values[j];
        }
        out
    }

    pub fn reconstruct(&self) -> DMatrix<f64> {
        let mut scaled_left = self.left.clone();
        for (j, mut col) in scaled_left.column_iter_mut().enumerate() {
            col *= self.singular_values[j];
        }
        scaled_left * self.right.transpose()
    }
}

/// Decompose `matrix` into descending singular triples.
pub fn decompose(matrix: &DataMatrix) -> Result<SingularValueDecomposition> {
    let svd = matrix.values().clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(SvdgfError::Data("SVD did not produce singular vectors".to_string()));
    };

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let left = u.select_columns(order.iter());
    let right = v_t.select_rows(order.iter()).transpose();
    let singular_values =
        DVector::from_iterator(order.len(), order.iter().map(|&i| svd.singular_values[i]));

    log::debug!(
        "SVD of {}x{} matrix: {} components, sigma_0 = {:.4e}",
        matrix.n_wavelengths(),
        matrix.n_time_delays(),
        singular_values.len(),
        singular_values.get(0).copied().unwrap_or(0.0)
    );

    Ok(SingularValueDecomposition {
        left,
        singular_values,
        right,
    })
}
