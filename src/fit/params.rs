//! Parameter layout and bound handling.
//!
//! The optimizers work in an unbounded "internal" space. Bounded parameters
//! are mapped onto it with the usual MINUIT transforms:
//!
//! - both bounds: `ext = min + (sin(int) + 1) · (max - min) / 2`
//! - lower bound only: `ext = min - 1 + sqrt(int² + 1)`
//! - upper bound only: `ext = max + 1 - sqrt(int² + 1)`
//!
//! Layout: the `n` decay constants come first (selection order), followed by
//! the `n × n` amplitudes in row-major order (row = retained rSV).

use nalgebra::{DMatrix, DVector};

use crate::config::InitialGuesses;
use crate::domain::{ComponentSelection, FitOptions, amp_name, tau_name};
use crate::error::{Result, SvdgfError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transform {
    Free,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl Transform {
    fn new(min: f64, max: f64) -> Self {
        match (min.is_finite(), max.is_finite()) {
            (true, true) => Transform::Both(min, max),
            (true, false) => Transform::Lower(min),
            (false, true) => Transform::Upper(max),
            (false, false) => Transform::Free,
        }
    }

    fn to_internal(self, ext: f64) -> f64 {
        match self {
            Transform::Free => ext,
            Transform::Lower(min) => ((ext - min + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Transform::Upper(max) => ((max - ext + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Transform::Both(min, max) => (2.0 * (ext - min) / (max - min) - 1.0).clamp(-1.0, 1.0).asin(),
        }
    }

    fn to_external(self, int: f64) -> f64 {
        match self {
            Transform::Free => int,
            Transform::Lower(min) => min - 1.0 + (int * int + 1.0).sqrt(),
            Transform::Upper(max) => max + 1.0 - (int * int + 1.0).sqrt(),
            Transform::Both(min, max) => min + (int.sin() + 1.0) * (max - min) / 2.0,
        }
    }
}

/// One scalar parameter of the fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub init: f64,
    pub min: f64,
    pub max: f64,
}

/// Ordered parameter list for one fit.
#[derive(Debug, Clone)]
pub struct ParameterLayout {
    specs: Vec<ParamSpec>,
    transforms: Vec<Transform>,
    n_components: usize,
}

impl ParameterLayout {
    /// Lay out `n` decay constants and `n × n` amplitudes for `selection`.
    pub fn new(selection: &ComponentSelection, guesses: &InitialGuesses, options: &FitOptions) -> Result<Self> {
        let n = selection.len();
        if guesses.taus.len() != n || guesses.amps.shape() != (n, n) {
            return Err(SvdgfError::InvalidSelection(format!(
                "initial guesses cover {} component(s) but {n} are selected",
                guesses.taus.len()
            )));
        }
        let (tau_min, tau_max) = (options.tau_min, options.tau_max);
        if tau_min.is_nan() || tau_max.is_nan() || tau_min >= tau_max {
            return Err(SvdgfError::InvalidBounds(format!(
                "decay-constant bounds must satisfy min < max (got min={tau_min}, max={tau_max})"
            )));
        }

        let mut specs = Vec::with_capacity(n + n * n);
        for (j, c) in selection.iter().enumerate() {
            let init = guesses.taus[j];
            let clamped = init.clamp(tau_min, tau_max);
            if clamped != init {
                log::warn!(
                    "initial {} = {init} lies outside [{tau_min}, {tau_max}]; using {clamped}",
                    tau_name(c)
                );
            }
            specs.push(ParamSpec {
                name: tau_name(c),
                init: clamped,
                min: tau_min,
                max: tau_max,
            });
        }
        for i in 0..n {
            for (j, c) in selection.iter().enumerate() {
                specs.push(ParamSpec {
                    name: amp_name(i, c),
                    init: guesses.amps[(i, j)],
                    min: f64::NEG_INFINITY,
                    max: f64::INFINITY,
                });
            }
        }

        let transforms = specs.iter().map(|s| Transform::new(s.min, s.max)).collect();
        Ok(Self {
            specs,
            transforms,
            n_components: n,
        })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn initial_external(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.specs.iter().map(|s| s.init))
    }

    pub fn to_internal(&self, ext: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            ext.len(),
            ext.iter().zip(&self.transforms).map(|(&v, t)| t.to_internal(v)),
        )
    }

    pub fn to_external(&self, int: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            int.len(),
            int.iter().zip(&self.transforms).map(|(&v, t)| t.to_external(v)),
        )
    }

    /// Clamp external values into their bounds.
    pub fn clamp_external(&self, ext: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            ext.len(),
            ext.iter().zip(&self.specs).map(|(&v, s)| v.clamp(s.min, s.max)),
        )
    }

    /// Split an external vector into decay constants and the amplitude matrix.
    pub fn split(&self, ext: &[f64]) -> (Vec<f64>, DMatrix<f64>) {
        let n = self.n_components;
        let taus = ext[..n].to_vec();
        let amps = DMatrix::from_row_slice(n, n, &ext[n..n + n * n]);
        (taus, amps)
    }
}
