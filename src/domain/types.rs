//! Shared domain types.
//!
//! These types flow through the whole pipeline:
//!
//! - the data matrix and the sub-rectangle of it we analyze (`DataMatrix`, `MatrixBounds`)
//! - which SVD components the user retained (`ComponentSelection`)
//! - the optimizer catalogue (`FitMethod`) and its knobs (`FitOptions`)
//! - fit outputs (`FitParameterSet`, `FitResult`, `Das`)

use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SvdgfError};

/// Transient-absorption intensities indexed by wavelength (rows) and time delay (columns).
#[derive(Debug, Clone)]
pub struct DataMatrix {
    values: DMatrix<f64>,
    wavelengths: Vec<f64>,
    time_delays: Vec<f64>,
}

impl DataMatrix {
    /// Build a matrix, checking axis lengths, axis order and finiteness.
    pub fn new(values: DMatrix<f64>, wavelengths: Vec<f64>, time_delays: Vec<f64>) -> Result<Self> {
        if values.nrows() != wavelengths.len() || values.ncols() != time_delays.len() {
            return Err(SvdgfError::Data(format!(
                "matrix is {}x{} but there are {} wavelengths and {} time delays",
                values.nrows(),
                values.ncols(),
                wavelengths.len(),
                time_delays.len()
            )));
        }
        if values.is_empty() {
            return Err(SvdgfError::Data("data matrix is empty".to_string()));
        }
        if !is_ascending(&wavelengths) {
            return Err(SvdgfError::Data("wavelengths must be finite and ascending".to_string()));
        }
        if !is_ascending(&time_delays) {
            return Err(SvdgfError::Data("time delays must be finite and ascending".to_string()));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            let (row, col) = (pos % values.nrows(), pos / values.nrows());
            return Err(SvdgfError::Data(format!(
                "non-finite intensity at wavelength {} / time delay {}",
                wavelengths[row], time_delays[col]
            )));
        }
        Ok(Self {
            values,
            wavelengths,
            time_delays,
        })
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn time_delays(&self) -> &[f64] {
        &self.time_delays
    }

    pub fn n_wavelengths(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn n_time_delays(&self) -> usize {
        self.time_delays.len()
    }

    /// Drop every time delay before the one closest to `start_time`.
    pub fn after_start_time(&self, start_time: f64) -> Result<Self> {
        let first = closest_index(&self.time_delays, start_time);
        let bounds = MatrixBounds {
            min_wavelength_index: 0,
            max_wavelength_index: self.n_wavelengths() - 1,
            min_time_delay_index: first,
            max_time_delay_index: self.n_time_delays() - 1,
        };
        self.bounded(Some(&bounds))
    }

    /// Copy out the sub-rectangle described by `bounds` (or the whole matrix).
    pub fn bounded(&self, bounds: Option<&MatrixBounds>) -> Result<Self> {
        let Some(b) = bounds else {
            return Ok(self.clone());
        };
        b.validate(self.n_wavelengths(), self.n_time_delays())?;

        let n_rows = b.max_wavelength_index - b.min_wavelength_index + 1;
        let n_cols = b.max_time_delay_index - b.min_time_delay_index + 1;
        let values = self
            .values
            .view((b.min_wavelength_index, b.min_time_delay_index), (n_rows, n_cols))
            .into_owned();

        Ok(Self {
            values,
            wavelengths: self.wavelengths[b.min_wavelength_index..=b.max_wavelength_index].to_vec(),
            time_delays: self.time_delays[b.min_time_delay_index..=b.max_time_delay_index].to_vec(),
        })
    }
}

fn is_ascending(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite()) && values.windows(2).all(|w| w[0] <= w[1])
}

/// Index of the element closest to `target` (first one on ties).
pub fn closest_index(values: &[f64], target: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in values.iter().enumerate() {
        let dist = (v - target).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Inclusive index window into a `DataMatrix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixBounds {
    pub min_wavelength_index: usize,
    pub max_wavelength_index: usize,
    pub min_time_delay_index: usize,
    pub max_time_delay_index: usize,
}

impl MatrixBounds {
    /// Check the window against a matrix of the given shape.
    pub fn validate(&self, n_wavelengths: usize, n_time_delays: usize) -> Result<()> {
        if self.min_wavelength_index > self.max_wavelength_index {
            return Err(SvdgfError::InvalidBounds(format!(
                "min_wavelength_index {} > max_wavelength_index {}",
                self.min_wavelength_index, self.max_wavelength_index
            )));
        }
        if self.min_time_delay_index > self.max_time_delay_index {
            return Err(SvdgfError::InvalidBounds(format!(
                "min_time_delay_index {} > max_time_delay_index {}",
                self.min_time_delay_index, self.max_time_delay_index
            )));
        }
        if self.max_wavelength_index >= n_wavelengths {
            return Err(SvdgfError::InvalidBounds(format!(
                "max_wavelength_index {} is outside 0..{n_wavelengths}",
                self.max_wavelength_index
            )));
        }
        if self.max_time_delay_index >= n_time_delays {
            return Err(SvdgfError::InvalidBounds(format!(
                "max_time_delay_index {} is outside 0..{n_time_delays}",
                self.max_time_delay_index
            )));
        }
        Ok(())
    }

    /// Translate physical limits into the closest indices.
    ///
    /// A missing range keeps the full axis.
    pub fn from_values(
        matrix: &DataMatrix,
        wavelength_range: Option<(f64, f64)>,
        time_delay_range: Option<(f64, f64)>,
    ) -> Result<Self> {
        let (min_wavelength_index, max_wavelength_index) = match wavelength_range {
            Some((lo, hi)) => (
                closest_index(matrix.wavelengths(), lo),
                closest_index(matrix.wavelengths(), hi),
            ),
            None => (0, matrix.n_wavelengths() - 1),
        };
        let (min_time_delay_index, max_time_delay_index) = match time_delay_range {
            Some((lo, hi)) => (
                closest_index(matrix.time_delays(), lo),
                closest_index(matrix.time_delays(), hi),
            ),
            None => (0, matrix.n_time_delays() - 1),
        };
        let bounds = Self {
            min_wavelength_index,
            max_wavelength_index,
            min_time_delay_index,
            max_time_delay_index,
        };
        bounds.validate(matrix.n_wavelengths(), matrix.n_time_delays())?;
        Ok(bounds)
    }
}

/// Non-empty, duplicate-free, ascending set of SVD component indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSelection(Vec<usize>);

impl ComponentSelection {
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        if indices.is_empty() {
            return Err(SvdgfError::InvalidSelection(
                "no components selected; select at least one".to_string(),
            ));
        }
        indices.sort_unstable();
        if let Some(w) = indices.windows(2).find(|w| w[0] == w[1]) {
            return Err(SvdgfError::InvalidSelection(format!(
                "component {} selected more than once",
                w[0]
            )));
        }
        Ok(Self(indices))
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max_index(&self) -> usize {
        self.0.last().copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl FromStr for ComponentSelection {
    type Err = SvdgfError;

    /// Parse `"0,1,3"` (whitespace tolerated).
    fn from_str(s: &str) -> Result<Self> {
        let mut out = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let idx = token.parse::<usize>().map_err(|_| {
                SvdgfError::InvalidSelection(format!("'{token}' is not a component index"))
            })?;
            out.push(idx);
        }
        Self::new(out)
    }
}

impl std::fmt::Display for ComponentSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Optimizer used to minimize the global-fit residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Levenberg–Marquardt.
    Leastsq,
    /// Trust-region least squares.
    #[value(name = "least_squares")]
    LeastSquares,
    /// Basin-hopping global search.
    Basinhopping,
    /// Adaptive Memory Programming for Global Optimization.
    Ampgo,
    /// Nelder–Mead simplex.
    Nelder,
    /// Limited-memory BFGS.
    Lbfgsb,
    /// Powell's conjugate directions.
    Powell,
    /// Nonlinear conjugate gradient.
    Cg,
    /// Constrained optimization by linear approximation.
    Cobyla,
    /// Broyden–Fletcher–Goldfarb–Shanno.
    Bfgs,
    /// Truncated Newton.
    Tnc,
}

impl FitMethod {
    pub const ALL: [FitMethod; 11] = [
        FitMethod::Leastsq,
        FitMethod::LeastSquares,
        FitMethod::Basinhopping,
        FitMethod::Ampgo,
        FitMethod::Nelder,
        FitMethod::Lbfgsb,
        FitMethod::Powell,
        FitMethod::Cg,
        FitMethod::Cobyla,
        FitMethod::Bfgs,
        FitMethod::Tnc,
    ];

    /// Short name used on the command line and in reports.
    pub fn name(self) -> &'static str {
        match self {
            FitMethod::Leastsq => "leastsq",
            FitMethod::LeastSquares => "least_squares",
            FitMethod::Basinhopping => "basinhopping",
            FitMethod::Ampgo => "ampgo",
            FitMethod::Nelder => "nelder",
            FitMethod::Lbfgsb => "lbfgsb",
            FitMethod::Powell => "powell",
            FitMethod::Cg => "cg",
            FitMethod::Cobyla => "cobyla",
            FitMethod::Bfgs => "bfgs",
            FitMethod::Tnc => "tnc",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FitMethod::Leastsq => "Levenberg-Marquardt (default)",
            FitMethod::LeastSquares => "Least-squares minimization using a trust region (dogleg) method",
            FitMethod::Basinhopping => "Basin-hopping",
            FitMethod::Ampgo => "Adaptive Memory Programming for Global Optimization",
            FitMethod::Nelder => "Nelder-Mead",
            FitMethod::Lbfgsb => "L-BFGS-B",
            FitMethod::Powell => "Powell",
            FitMethod::Cg => "Conjugate-Gradient",
            FitMethod::Cobyla => "Cobyla",
            FitMethod::Bfgs => "BFGS",
            FitMethod::Tnc => "Truncated Newton",
        }
    }

    /// Whether the method estimates a covariance matrix (and hence standard errors).
    pub fn estimates_covariance(self) -> bool {
        matches!(self, FitMethod::Leastsq | FitMethod::LeastSquares)
    }
}

impl Default for FitMethod {
    fn default() -> Self {
        FitMethod::Leastsq
    }
}

impl std::fmt::Display for FitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FitMethod {
    type Err = SvdgfError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        FitMethod::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SvdgfError::UnknownMethod(wanted.to_string()))
    }
}

/// Name of the decay-constant parameter of a component.
pub fn tau_name(component: usize) -> String {
    format!("tau_component{component}")
}

/// Name of the amplitude of `component` in the fit of retained rSV `rsv`.
pub fn amp_name(rsv: usize, component: usize) -> String {
    format!("amp_rSV{rsv}_component{component}")
}

/// Standard error of a fitted parameter.
///
/// `Unsupported` and `Failed` are kept apart: the former means the method never
/// estimates a covariance, the latter that the estimate broke down for this fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StdErr {
    Estimated(f64),
    Unsupported,
    Failed(String),
}

impl StdErr {
    pub fn value(&self) -> Option<f64> {
        match self {
            StdErr::Estimated(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for StdErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StdErr::Estimated(v) => write!(f, "{v:.2}"),
            StdErr::Unsupported | StdErr::Failed(_) => f.write_str("not computed"),
        }
    }
}

/// One resolved scalar fit parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitParameter {
    pub name: String,
    pub value: f64,
    pub init_value: f64,
    pub min: f64,
    pub max: f64,
    pub stderr: StdErr,
}

/// Ordered collection of fit parameters: decay constants first, then amplitudes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitParameterSet {
    pub params: Vec<FitParameter>,
}

impl FitParameterSet {
    pub fn get(&self, name: &str) -> Option<&FitParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn tau(&self, component: usize) -> Option<&FitParameter> {
        self.get(&tau_name(component))
    }

    pub fn amp(&self, rsv: usize, component: usize) -> Option<&FitParameter> {
        self.get(&amp_name(rsv, component))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }
}

/// Which kinetic model the fit used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelDescription {
    /// `Σ_j amp_ij · exp(-t / tau_j)`.
    Generic,
    /// User summands, stored as `(component, grouped expression)`.
    Target { summands: Vec<(usize, String)> },
}

/// Goodness-of-fit numbers and optimizer bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitStatistics {
    pub success: bool,
    pub message: String,
    pub n_fev: usize,
    pub n_iter: usize,
    pub n_data: usize,
    pub n_vars: usize,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    pub aic: f64,
    pub bic: f64,
}

/// Pairwise parameter correlation derived from the covariance matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub first: String,
    pub second: String,
    pub value: f64,
}

/// Output of one global fit. Immutable once built.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub method: FitMethod,
    pub components: ComponentSelection,
    pub model: ModelDescription,
    pub params: FitParameterSet,
    pub correlations: Vec<Correlation>,
    pub statistics: FitStatistics,
    /// Fitted decay constants, ordered like `components`.
    pub decay_constants: Vec<f64>,
    /// Fitted amplitudes: row = retained rSV, column = component.
    pub amplitudes: DMatrix<f64>,
    pub time_delays: Vec<f64>,
    /// Kinetic traces at the fitted decay constants (rows = time delays).
    pub basis: DMatrix<f64>,
    /// Fit targets `σ_i · rSV_i`, one column per retained component (rows = time delays).
    pub targets: DMatrix<f64>,
    /// Model evaluated at the fitted parameters, same shape as `targets`.
    pub best_fit: DMatrix<f64>,
    /// `best_fit - targets`.
    pub residuals: DMatrix<f64>,
    /// Non-fatal notes, e.g. a fallback to default initial values.
    pub notes: Vec<String>,
}

/// Decay-associated spectra: one column per retained component.
#[derive(Debug, Clone)]
pub struct Das {
    pub wavelengths: Vec<f64>,
    pub components: Vec<usize>,
    pub spectra: DMatrix<f64>,
    pub decay_constants: Vec<f64>,
    pub stderrs: Vec<StdErr>,
}

impl Das {
    /// Legend label for column `j`, e.g. `DAS_comp0, tau = 10.00 ± 0.12`.
    pub fn label(&self, j: usize) -> String {
        format!(
            "DAS_comp{}, tau = {:.2} ± {}",
            self.components[j], self.decay_constants[j], self.stderrs[j]
        )
    }
}

/// Instrument-response settings. Collected for completeness; the fit ignores them.
#[derive(Debug, Clone, Default)]
pub struct InstrumentResponse {
    pub temporal_resolution: Option<f64>,
    pub time_zero: Option<f64>,
}

/// Knobs shared by every fit method.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Lower bound applied to every decay constant.
    pub tau_min: f64,
    /// Upper bound applied to every decay constant.
    pub tau_max: f64,
    /// Objective-evaluation budget; `None` means `2000 * (n_vars + 1)`.
    pub max_nfev: Option<usize>,
    /// Relative tolerance on the cost.
    pub ftol: f64,
    /// Relative tolerance on the parameter step.
    pub xtol: f64,
    /// Tolerance on the gradient infinity norm.
    pub gtol: f64,
    /// Outer iterations of the global methods (basin-hopping, AMPGO).
    pub global_iterations: usize,
    /// Seed of the RNG used by the global methods.
    pub seed: u64,
    /// Use default guesses (instead of failing) when the stored ones cannot
    /// address the selected components.
    pub fallback_to_defaults: bool,
    pub instrument_response: InstrumentResponse,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            tau_min: 0.0,
            tau_max: f64::INFINITY,
            max_nfev: None,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            global_iterations: 100,
            seed: 42,
            fallback_to_defaults: true,
            instrument_response: InstrumentResponse::default(),
        }
    }
}

impl FitOptions {
    pub fn max_nfev_for(&self, n_vars: usize) -> usize {
        self.max_nfev.unwrap_or(2000 * (n_vars + 1))
    }
}

/// How the analysed sub-rectangle is chosen.
#[derive(Debug, Clone, Default)]
pub enum BoundsSpec {
    /// Whole matrix.
    #[default]
    Full,
    /// Explicit inclusive indices.
    Indices(MatrixBounds),
    /// Physical limits, mapped to the closest indices.
    Values {
        wavelengths: Option<(f64, f64)>,
        time_delays: Option<(f64, f64)>,
    },
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_path: PathBuf,
    pub start_time: Option<f64>,
    pub bounds: BoundsSpec,
    pub components: ComponentSelection,
    pub method: FitMethod,
    pub use_target_model: bool,
    pub config_dir: PathBuf,
    pub options: FitOptions,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub export_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_3x4() -> DataMatrix {
        let values = DMatrix::from_fn(3, 4, |r, c| (r * 10 + c) as f64);
        DataMatrix::new(values, vec![400.0, 500.0, 600.0], vec![-1.0, 0.0, 1.0, 2.0]).unwrap()
    }

    #[test]
    fn data_matrix_rejects_shape_mismatch() {
        let values = DMatrix::zeros(2, 2);
        let err = DataMatrix::new(values, vec![1.0, 2.0, 3.0], vec![0.0, 1.0]).unwrap_err();
        assert!(matches!(err, SvdgfError::Data(_)));
    }

    #[test]
    fn bounded_copies_inclusive_window() {
        let m = matrix_3x4();
        let bounds = MatrixBounds {
            min_wavelength_index: 1,
            max_wavelength_index: 2,
            min_time_delay_index: 1,
            max_time_delay_index: 2,
        };
        let sub = m.bounded(Some(&bounds)).unwrap();
        assert_eq!(sub.values().shape(), (2, 2));
        assert_eq!(sub.wavelengths(), &[500.0, 600.0]);
        assert_eq!(sub.time_delays(), &[0.0, 1.0]);
        assert_eq!(sub.values()[(0, 0)], 11.0);
        assert_eq!(sub.values()[(1, 1)], 22.0);
    }

    #[test]
    fn bounds_outside_matrix_are_rejected() {
        let m = matrix_3x4();
        let bounds = MatrixBounds {
            min_wavelength_index: 0,
            max_wavelength_index: 3,
            min_time_delay_index: 0,
            max_time_delay_index: 1,
        };
        assert!(matches!(m.bounded(Some(&bounds)), Err(SvdgfError::InvalidBounds(_))));
    }

    #[test]
    fn start_time_keeps_closest_delay_onwards() {
        let m = matrix_3x4();
        let sub = m.after_start_time(0.3).unwrap();
        assert_eq!(sub.time_delays(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn bounds_from_values_pick_closest_indices() {
        let m = matrix_3x4();
        let b = MatrixBounds::from_values(&m, Some((480.0, 590.0)), None).unwrap();
        assert_eq!((b.min_wavelength_index, b.max_wavelength_index), (1, 2));
        assert_eq!((b.min_time_delay_index, b.max_time_delay_index), (0, 3));
    }

    #[test]
    fn empty_selection_is_invalid() {
        let err = ComponentSelection::new(Vec::new()).unwrap_err();
        assert!(matches!(err, SvdgfError::InvalidSelection(_)));
        assert!(matches!("".parse::<ComponentSelection>(), Err(SvdgfError::InvalidSelection(_))));
    }

    #[test]
    fn selection_is_sorted_and_unique() {
        let sel: ComponentSelection = "3, 0,1".parse().unwrap();
        assert_eq!(sel.indices(), &[0, 1, 3]);
        assert_eq!(sel.max_index(), 3);
        assert!("1,1".parse::<ComponentSelection>().is_err());
    }

    #[test]
    fn fit_method_names_round_trip_and_reject_unknown() {
        for m in FitMethod::ALL {
            assert_eq!(m.name().parse::<FitMethod>().unwrap(), m);
        }
        assert!(matches!("simplex".parse::<FitMethod>(), Err(SvdgfError::UnknownMethod(_))));
    }

    #[test]
    fn stderr_reports_not_computed() {
        assert_eq!(StdErr::Unsupported.to_string(), "not computed");
        assert_eq!(StdErr::Failed("singular".into()).to_string(), "not computed");
        assert_eq!(StdErr::Estimated(0.125).to_string(), "0.12");
    }
}
