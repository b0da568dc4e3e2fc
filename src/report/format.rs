//! Formatted terminal output for decompositions, fits and stored parameters.
//!
//! All formatting lives here so the numerical code stays free of presentation.

use nalgebra::DMatrix;

use crate::config::InitialFitParameters;
use crate::domain::{ComponentSelection, DataMatrix, Das, FitMethod, FitResult, ModelDescription, StdErr};
use crate::math::SingularValueDecomposition;
use crate::report::das::Reconstructions;

/// Fit report in the usual fit-statistics / variables / correlations layout.
pub fn format_fit_report(result: &FitResult) -> String {
    let stats = &result.statistics;
    let mut out = String::new();

    out.push_str("[[Model]]\n");
    match &result.model {
        ModelDescription::Generic => {
            out.push_str("    generic: sum_j amp_rSV{i}_component{j} * exp(-t / tau_component{j})\n");
        }
        ModelDescription::Target { summands } => {
            for (component, expr) in summands {
                out.push_str(&format!("    component {component}: {expr}\n"));
            }
        }
    }

    out.push_str("[[Fit Statistics]]\n");
    out.push_str(&format!("    # fitting method   = {}\n", result.method));
    out.push_str(&format!("    # function evals   = {}\n", stats.n_fev));
    out.push_str(&format!("    # data points      = {}\n", stats.n_data));
    out.push_str(&format!("    # variables        = {}\n", stats.n_vars));
    out.push_str(&format!("    chi-square         = {:.8e}\n", stats.chi_square));
    out.push_str(&format!("    reduced chi-square = {:.8e}\n", stats.reduced_chi_square));
    out.push_str(&format!("    Akaike info crit   = {:.4}\n", stats.aic));
    out.push_str(&format!("    Bayesian info crit = {:.4}\n", stats.bic));
    out.push_str(&format!("    message            = {}\n", stats.message));

    out.push_str("[[Variables]]\n");
    let width = result.params.params.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for p in &result.params.params {
        let err = match &p.stderr {
            StdErr::Estimated(e) => {
                let rel = if p.value != 0.0 {
                    format!(" ({:.2}%)", 100.0 * e / p.value.abs())
                } else {
                    String::new()
                };
                format!(" +/- {e:.8}{rel}")
            }
            _ => " +/- not computed".to_string(),
        };
        out.push_str(&format!(
            "    {:<width$}  {:.8}{err} (init = {})\n",
            format!("{}:", p.name),
            p.value,
            p.init_value,
            width = width + 1
        ));
    }
    if let Some(StdErr::Failed(reason)) = result
        .params
        .params
        .iter()
        .map(|p| &p.stderr)
        .find(|s| matches!(s, StdErr::Failed(_)))
    {
        out.push_str(&format!("    (uncertainties could not be estimated: {reason})\n"));
    }

    if !result.correlations.is_empty() {
        out.push_str("[[Correlations]] (unreported correlations are < 0.100)\n");
        for c in &result.correlations {
            out.push_str(&format!("    C({}, {}) = {:+.4}\n", c.first, c.second, c.value));
        }
    }

    for note in &result.notes {
        out.push_str(&format!("note: {note}\n"));
    }
    out
}

/// One line per DAS column with its decay constant.
pub fn format_das_summary(das: &Das) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "DAS: {} components over {} wavelengths\n",
        das.components.len(),
        das.wavelengths.len()
    ));
    for (j, col) in das.spectra.column_iter().enumerate() {
        let (at_min, min) = extreme(col.iter().copied(), &das.wavelengths, |a, b| a < b);
        let (at_max, max) = extreme(col.iter().copied(), &das.wavelengths, |a, b| a > b);
        out.push_str(&format!(
            "- {} | min {min:.4e} @ {at_min:.1} | max {max:.4e} @ {at_max:.1}\n",
            das.label(j)
        ));
    }
    out
}

/// Singular values with their share of the total, marking the retained ones.
pub fn format_singular_values(
    svd: &SingularValueDecomposition,
    selection: Option<&ComponentSelection>,
    limit: usize,
) -> String {
    let total: f64 = svd.singular_values.iter().map(|s| s * s).sum();
    let mut out = String::new();
    out.push_str(&format!(
        "{:<4} {:>5} {:>14} {:>10} {:>10}\n",
        "", "comp", "sigma", "var %", "cum %"
    ));
    out.push_str(&format!("{:-<4} {:-<5} {:-<14} {:-<10} {:-<10}\n", "", "", "", "", ""));

    let mut cumulative = 0.0;
    for (i, s) in svd.singular_values.iter().enumerate().take(limit) {
        let share = if total > 0.0 { 100.0 * s * s / total } else { 0.0 };
        cumulative += share;
        let mark = match selection {
            Some(sel) if sel.indices().contains(&i) => "*",
            _ => "",
        };
        out.push_str(&format!("{mark:<4} {i:>5} {s:>14.6e} {share:>10.4} {cumulative:>10.4}\n"));
    }
    if svd.n_components() > limit {
        out.push_str(&format!("({} more not shown)\n", svd.n_components() - limit));
    }
    out
}

/// RMS of the rank-reduced and SVDGF reconstructions against the data.
pub fn format_reconstruction(data: &DataMatrix, selection: &ComponentSelection, rec: &Reconstructions) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Reconstruction over components {selection} ({}x{} matrix):\n",
        data.n_wavelengths(),
        data.n_time_delays()
    ));
    out.push_str(&format!(
        "- SVD   rms(data - reconstruction) = {:.4e}\n",
        Reconstructions::rms(&rec.svd_difference)
    ));
    out.push_str(&format!(
        "- SVDGF rms(data - reconstruction) = {:.4e}\n",
        Reconstructions::rms(&rec.svdgf_difference)
    ));
    out
}

/// Rank-reduced reconstruction error for the `svd` command, without a fit.
pub fn format_svd_error(data: &DataMatrix, selection: &ComponentSelection, reconstruction: &DMatrix<f64>) -> String {
    let diff = data.values() - reconstruction;
    format!(
        "SVD reconstruction over components {selection}: rms(data - reconstruction) = {:.4e}\n",
        Reconstructions::rms(&diff)
    )
}

pub fn format_methods() -> String {
    let mut out = String::new();
    for method in FitMethod::ALL {
        let cov = if method.estimates_covariance() { "stderr" } else { "" };
        out.push_str(&format!("{:<14} {:<7} {}\n", method.name(), cov, method.description()));
    }
    out
}

/// The stored initial values in display order.
pub fn format_initial_params(values: &InitialFitParameters) -> String {
    let mut out = String::new();
    for (key, list) in values.ordered() {
        out.push_str(&format!("{key:<16} = {}\n", fmt_vec(list)));
    }
    out
}

/// Per-target comparison of the model at the initial values with `σ_i · V_i`.
pub fn format_preview(selection: &ComponentSelection, targets: &DMatrix<f64>, model: &DMatrix<f64>) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<8} {:>14} {:>14}\n", "target", "rms(target)", "rms(diff)"));
    out.push_str(&format!("{:-<8} {:-<14} {:-<14}\n", "", "", ""));
    for (j, component) in selection.iter().enumerate() {
        let target = targets.column(j);
        let diff = model.column(j) - target;
        let n = target.len().max(1) as f64;
        out.push_str(&format!(
            "{:<8} {:>14.6e} {:>14.6e}\n",
            format!("rSV{component}"),
            (target.norm_squared() / n).sqrt(),
            (diff.norm_squared() / n).sqrt()
        ));
    }
    out
}

fn extreme(values: impl Iterator<Item = f64>, axis: &[f64], better: impl Fn(f64, f64) -> bool) -> (f64, f64) {
    let mut best = (f64::NAN, f64::NAN);
    for (v, &x) in values.zip(axis) {
        if best.1.is_nan() || better(v, best.1) {
            best = (x, v);
        }
    }
    best
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitParameter, FitParameterSet, FitStatistics};

    fn result_with(stderr: StdErr) -> FitResult {
        FitResult {
            method: FitMethod::Leastsq,
            components: ComponentSelection::new([0]).unwrap(),
            model: ModelDescription::Generic,
            params: FitParameterSet {
                params: vec![
                    FitParameter {
                        name: "tau_component0".to_string(),
                        value: 10.0,
                        init_value: 50.0,
                        min: 0.0,
                        max: f64::INFINITY,
                        stderr: stderr.clone(),
                    },
                    FitParameter {
                        name: "amp_rSV0_component0".to_string(),
                        value: 1.5,
                        init_value: 0.7,
                        min: f64::NEG_INFINITY,
                        max: f64::INFINITY,
                        stderr,
                    },
                ],
            },
            correlations: Vec::new(),
            statistics: FitStatistics {
                success: true,
                message: "converged".to_string(),
                n_fev: 17,
                n_iter: 5,
                n_data: 5,
                n_vars: 2,
                chi_square: 1e-12,
                reduced_chi_square: 3e-13,
                aic: -130.0,
                bic: -131.0,
            },
            decay_constants: vec![10.0],
            amplitudes: DMatrix::from_element(1, 1, 1.5),
            time_delays: vec![0.0, 1.0, 2.0, 3.0, 4.0],
            basis: DMatrix::zeros(5, 1),
            targets: DMatrix::zeros(5, 1),
            best_fit: DMatrix::zeros(5, 1),
            residuals: DMatrix::zeros(5, 1),
            notes: vec!["defaults used".to_string()],
        }
    }

    #[test]
    fn fit_report_lists_variables_with_stderr() {
        let txt = format_fit_report(&result_with(StdErr::Estimated(0.25)));
        assert!(txt.contains("# fitting method   = leastsq"));
        assert!(txt.contains("tau_component0:"));
        assert!(txt.contains("+/- 0.25000000 (2.50%)"));
        assert!(txt.contains("(init = 50)"));
        assert!(txt.contains("note: defaults used"));
    }

    #[test]
    fn fit_report_marks_missing_stderr() {
        let txt = format_fit_report(&result_with(StdErr::Unsupported));
        assert!(txt.contains("+/- not computed"));
        assert!(!txt.contains("could not be estimated"));

        let txt = format_fit_report(&result_with(StdErr::Failed("singular".to_string())));
        assert!(txt.contains("could not be estimated: singular"));
    }

    #[test]
    fn methods_table_has_every_method() {
        let txt = format_methods();
        assert_eq!(txt.lines().count(), FitMethod::ALL.len());
        assert!(txt.starts_with("leastsq"));
    }

    #[test]
    fn das_summary_uses_labels() {
        let das = Das {
            wavelengths: vec![500.0, 510.0, 520.0],
            components: vec![0],
            spectra: DMatrix::from_column_slice(3, 1, &[0.1, -0.4, 0.3]),
            decay_constants: vec![12.0],
            stderrs: vec![StdErr::Unsupported],
        };
        let txt = format_das_summary(&das);
        assert!(txt.contains("DAS_comp0, tau = 12.00 ± not computed"));
        assert!(txt.contains("@ 510.0"));
        assert!(txt.contains("@ 520.0"));
    }
}
