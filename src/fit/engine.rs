//! Global fit of the retained right singular vectors.
//!
//! For `n` retained components the fit has `n` decay constants shared by all
//! traces and an `n × n` amplitude matrix. Target `i` is `σ_i · V_i`, so the
//! fitted amplitudes combine directly with the left singular vectors into
//! decay-associated spectra.

use nalgebra::DVector;

use crate::config::InitialFitParameters;
use crate::domain::{FitMethod, FitOptions, FitParameter, FitParameterSet, FitResult, FitStatistics};
use crate::error::{Result, SvdgfError};
use crate::fit::covariance;
use crate::fit::methods::{MinimizerOutcome, Settings, minimizer_for};
use crate::fit::params::ParameterLayout;
use crate::fit::problem::{FitProblem, cost_of};
use crate::math::RetainedComponents;
use crate::models::{KineticModel, TargetModel};

/// Runs fits with a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct GlobalFitEngine {
    options: FitOptions,
}

impl GlobalFitEngine {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Fit the retained components with `method`.
    ///
    /// Uses the generic sum-of-exponentials model unless `target` is given.
    pub fn fit(
        &self,
        retained: &RetainedComponents,
        time_delays: &[f64],
        initial: &InitialFitParameters,
        method: FitMethod,
        target: Option<&TargetModel>,
    ) -> Result<FitResult> {
        let selection = &retained.selection;
        if retained.right.nrows() != time_delays.len() {
            return Err(SvdgfError::Data(format!(
                "right singular vectors have {} rows but there are {} time delays",
                retained.right.nrows(),
                time_delays.len()
            )));
        }

        let model = match target {
            Some(t) if t.selection() != selection => {
                return Err(SvdgfError::InvalidSelection(format!(
                    "target model was compiled for components {} but {} are retained",
                    t.selection(),
                    selection
                )));
            }
            Some(t) => KineticModel::target(t.clone())?,
            None => KineticModel::generic(selection),
        };

        let guesses = if self.options.fallback_to_defaults {
            initial.resolve_or_default(selection)
        } else {
            initial.resolve(selection)?
        };
        let layout = ParameterLayout::new(selection, &guesses, &self.options)?;
        let targets = retained.weighted_right();
        let problem = FitProblem::new(&model, time_delays, &targets, &layout);

        let n_vars = layout.len();
        let n_data = problem.n_data();
        if n_data < n_vars {
            return Err(SvdgfError::fit(
                method,
                n_vars,
                format!("{n_data} data points cannot determine {n_vars} parameters"),
            ));
        }

        let init_ext = layout.initial_external();
        let x0 = layout.to_internal(&init_ext);
        if !cost_of(&problem.residuals_external(init_ext.as_slice())).is_finite() {
            return Err(SvdgfError::fit(method, n_vars, "model is not finite at the initial values"));
        }

        let settings = Settings::from_options(&self.options, n_vars);
        log::info!(
            "fitting components {selection} with {method} ({n_vars} parameters, {n_data} points, max_nfev={})",
            settings.max_nfev
        );
        let outcome = minimizer_for(method).minimize(&problem, x0, &settings);
        log::info!(
            "{method} finished: {} ({} evaluations)",
            outcome.message,
            problem.n_fev()
        );

        let ext = layout.clamp_external(&layout.to_external(&outcome.x));
        let residual_vec = problem.residuals_external(ext.as_slice());
        if residual_vec.iter().any(|v| !v.is_finite()) {
            return Err(SvdgfError::fit(method, n_vars, "fitted model is not finite"));
        }
        if !outcome.success {
            return Err(SvdgfError::fit(method, n_vars, outcome.message));
        }

        let statistics = statistics(&residual_vec, n_vars, &outcome, problem.n_fev());
        let cov = covariance::estimate(&problem, method, &ext, statistics.reduced_chi_square);

        let params = FitParameterSet {
            params: layout
                .specs()
                .iter()
                .zip(ext.iter())
                .zip(cov.stderrs)
                .map(|((spec, &value), stderr)| FitParameter {
                    name: spec.name.clone(),
                    value,
                    init_value: spec.init,
                    min: spec.min,
                    max: spec.max,
                    stderr,
                })
                .collect(),
        };

        let (decay_constants, amplitudes) = layout.split(ext.as_slice());
        let basis = model.basis(time_delays, &decay_constants);
        let best_fit = problem.predict_external(ext.as_slice());
        let residuals = &best_fit - &targets;

        Ok(FitResult {
            method,
            components: selection.clone(),
            model: model.describe(),
            params,
            correlations: cov.correlations,
            statistics,
            decay_constants,
            amplitudes,
            time_delays: time_delays.to_vec(),
            basis,
            targets,
            best_fit,
            residuals,
            notes: guesses.fallback_reason.into_iter().collect(),
        })
    }
}

fn statistics(
    residuals: &DVector<f64>,
    n_vars: usize,
    outcome: &MinimizerOutcome,
    n_fev: usize,
) -> FitStatistics {
    let n_data = residuals.len();
    let chi_square = residuals.norm_squared();
    let n_free = n_data.saturating_sub(n_vars).max(1);
    let nd = n_data as f64;
    // Keep the log finite for a perfect fit.
    let ln_term = nd * (chi_square.max(1e-250 * nd) / nd).ln();
    FitStatistics {
        success: outcome.success,
        message: outcome.message.clone(),
        n_fev,
        n_iter: outcome.n_iter,
        n_data,
        n_vars,
        chi_square,
        reduced_chi_square: chi_square / n_free as f64,
        aic: ln_term + 2.0 * n_vars as f64,
        bic: ln_term + nd.ln() * n_vars as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComponentSelection, DataMatrix, StdErr};
    use crate::math::decompose;
    use crate::models::TargetModelSpec;
    use nalgebra::DMatrix;

    fn single_decay_matrix(tau: f64) -> DataMatrix {
        let t: Vec<f64> = (0..12).map(|i| i as f64 * 2.5).collect();
        let spectrum = [0.2, 0.6, 1.0, 0.7, 0.3, 0.1];
        let values = DMatrix::from_fn(spectrum.len(), t.len(), |r, c| spectrum[r] * (-t[c] / tau).exp());
        DataMatrix::new(values, (0..spectrum.len()).map(|w| 450.0 + 5.0 * w as f64).collect(), t).unwrap()
    }

    fn retained(m: &DataMatrix) -> RetainedComponents {
        decompose(m).unwrap().select(&ComponentSelection::new([0]).unwrap()).unwrap()
    }

    #[test]
    fn leastsq_recovers_decay_constant_with_stderr() {
        let m = single_decay_matrix(10.0);
        let result = GlobalFitEngine::default()
            .fit(&retained(&m), m.time_delays(), &InitialFitParameters::default(), FitMethod::Leastsq, None)
            .unwrap();
        let tau = result.params.tau(0).unwrap();
        assert!((tau.value - 10.0).abs() < 1e-4, "tau = {}", tau.value);
        assert_eq!(tau.init_value, 50.0);
        assert!(result.statistics.chi_square < 1e-12);
        assert_eq!(result.residuals.shape(), (12, 1));
        assert!(!matches!(tau.stderr, StdErr::Unsupported));
    }

    fn five_by_five_decay() -> DataMatrix {
        let t: [f64; 5] = [0.0, 4.0, 8.0, 12.0, 16.0];
        let spectrum = [0.5, 1.0, 0.8, 0.3, 0.1];
        let values = DMatrix::from_fn(5, 5, |r, c| spectrum[r] * (-t[c] / 10.0).exp());
        DataMatrix::new(values, vec![400.0, 450.0, 500.0, 550.0, 600.0], t.to_vec()).unwrap()
    }

    #[test]
    fn every_method_recovers_the_decay_constant() {
        let m = five_by_five_decay();
        for method in FitMethod::ALL {
            let result = GlobalFitEngine::default()
                .fit(&retained(&m), m.time_delays(), &InitialFitParameters::default(), method, None)
                .unwrap_or_else(|e| panic!("{method}: {e}"));
            assert!(result.statistics.success, "{method}: {}", result.statistics.message);
            let tau = result.params.tau(0).unwrap();
            assert!((tau.value - 10.0).abs() < 1e-3, "{method}: tau = {}", tau.value);
            if matches!(method, FitMethod::Leastsq | FitMethod::LeastSquares) {
                assert!(!matches!(tau.stderr, StdErr::Unsupported), "{method}: {:?}", tau.stderr);
            } else {
                assert_eq!(tau.stderr, StdErr::Unsupported, "{method}");
            }
        }
    }

    #[test]
    fn target_model_fit_uses_summands() {
        let m = single_decay_matrix(8.0);
        let mut spec = TargetModelSpec::default();
        spec.set_summand(0, "np.exp(-t/k0)").unwrap();
        let sel = ComponentSelection::new([0]).unwrap();
        let target = spec.compile(&sel).unwrap();
        let result = GlobalFitEngine::default()
            .fit(&retained(&m), m.time_delays(), &InitialFitParameters::default(), FitMethod::LeastSquares, Some(&target))
            .unwrap();
        assert!((result.decay_constants[0] - 8.0).abs() < 1e-4, "{:?}", result.decay_constants);
    }

    #[test]
    fn strict_mode_rejects_unaddressable_guesses() {
        let m = single_decay_matrix(10.0);
        let svd = decompose(&m).unwrap();
        let two = svd.select(&ComponentSelection::new([0, 1]).unwrap()).unwrap();
        let strict = GlobalFitEngine::new(FitOptions {
            fallback_to_defaults: false,
            ..FitOptions::default()
        });
        let err = strict
            .fit(&two, m.time_delays(), &InitialFitParameters::default(), FitMethod::Leastsq, None)
            .unwrap_err();
        assert!(matches!(err, SvdgfError::Validation { .. }), "{err}");
    }

    #[test]
    fn mismatched_target_selection_is_rejected() {
        let m = single_decay_matrix(10.0);
        let mut spec = TargetModelSpec::default();
        spec.set_summand(0, "exp(-t/k0)").unwrap();
        spec.set_summand(1, "exp(-t/k1)").unwrap();
        let target = spec.compile(&ComponentSelection::new([0, 1]).unwrap()).unwrap();
        let err = GlobalFitEngine::default()
            .fit(&retained(&m), m.time_delays(), &InitialFitParameters::default(), FitMethod::Leastsq, Some(&target))
            .unwrap_err();
        assert!(matches!(err, SvdgfError::InvalidSelection(_)));
    }
}
