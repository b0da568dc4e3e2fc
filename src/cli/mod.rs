//! Command-line parsing for the SVD global-fit tool.
//!
//! Argument parsing and command dispatch stay separate from the numerical code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{ComponentSelection, FitMethod};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "svdgf", version, about = "SVD global fitting of transient-absorption data")]
pub struct Cli {
    /// Directory holding the persisted initial parameters and target model
    /// (default: $SVDGF_CONFIG_DIR, else ./configFiles).
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decompose, fit the retained components, print the report and DAS, optionally export.
    Fit(FitArgs),
    /// Print the singular values and the rank-reduced reconstruction error.
    Svd(SvdArgs),
    /// Show or edit the persisted initial fit parameters.
    #[command(subcommand)]
    Params(ParamsCommand),
    /// Show or edit the persisted target-model summands.
    #[command(subcommand)]
    Target(TargetCommand),
    /// Write a synthetic TA matrix.
    Simulate(SimulateArgs),
    /// List the available fit methods.
    Methods,
}

/// Where the data comes from and which part of it to analyse.
#[derive(Debug, Args, Clone)]
pub struct DataArgs {
    /// Matrix file: first row `label, t_0, t_1, ...`; then `wavelength, values...`.
    #[arg(value_name = "MATRIX")]
    pub data: PathBuf,

    /// Drop time delays before the one closest to this value.
    #[arg(long)]
    pub start_time: Option<f64>,

    /// Wavelength window as `MIN,MAX` (closest indices are used).
    #[arg(long, value_parser = parse_range, value_name = "MIN,MAX", conflicts_with = "index_bounds")]
    pub wavelengths: Option<(f64, f64)>,

    /// Time-delay window as `MIN,MAX` (closest indices are used).
    #[arg(long, value_parser = parse_range, value_name = "MIN,MAX", conflicts_with = "index_bounds")]
    pub time_delays: Option<(f64, f64)>,

    /// Inclusive index window as `WL_MIN,WL_MAX,T_MIN,T_MAX`.
    #[arg(long = "index-bounds", value_parser = parse_index_bounds, value_name = "WL_MIN,WL_MAX,T_MIN,T_MAX")]
    pub index_bounds: Option<[usize; 4]>,

    /// Retained SVD components, e.g. `0,1,2`.
    #[arg(short = 'c', long, default_value = "0")]
    pub components: ComponentSelection,
}

/// Plot output options.
#[derive(Debug, Args, Clone)]
pub struct PlotArgs {
    /// Disable the terminal plots.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Optimizer.
    #[arg(short = 'm', long, value_enum, default_value_t = FitMethod::Leastsq)]
    pub method: FitMethod,

    /// Fit the persisted target model instead of the generic sum of exponentials.
    #[arg(long)]
    pub target_model: bool,

    /// Fail instead of falling back to default initial values.
    #[arg(long)]
    pub strict: bool,

    /// Lower bound for every decay constant.
    #[arg(long, default_value_t = 0.0)]
    pub tau_min: f64,

    /// Upper bound for every decay constant.
    #[arg(long, default_value_t = f64::INFINITY)]
    pub tau_max: f64,

    /// Evaluation budget (default: 2000 * (parameters + 1)).
    #[arg(long)]
    pub max_nfev: Option<usize>,

    /// Iterations of the global searches (basinhopping, ampgo).
    #[arg(long, default_value_t = 100)]
    pub global_iterations: usize,

    /// Seed for the global searches.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Temporal resolution of the instrument (recorded, not modelled).
    #[arg(long)]
    pub temporal_resolution: Option<f64>,

    /// Time zero (recorded, not modelled).
    #[arg(long)]
    pub time_zero: Option<f64>,

    /// Also plot each rSV against its fitted model.
    #[arg(long)]
    pub plot_fit: bool,

    #[command(flatten)]
    pub plot: PlotArgs,

    /// Export fit JSON, DAS and reconstruction CSVs into this directory.
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SvdArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Number of singular values to list.
    #[arg(long, default_value_t = 10)]
    pub show: usize,
}

#[derive(Debug, Subcommand)]
pub enum ParamsCommand {
    /// Print the stored values.
    Show,
    /// Replace the stored values; every entry is validated before anything is written.
    Set(ParamsSetArgs),
    /// Append an amplitude row and extend every list by one default value.
    AddRow,
    /// Remove the last amplitude row and the last value of every list.
    RemoveRow,
    /// Check the stored values against a component selection.
    Check(SelectionArgs),
    /// Compare the model at the stored values with the fit targets.
    Preview(PreviewArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ParamsSetArgs {
    /// Entries as `KEY=LIST`, e.g. `time_constants=[5, 50]` `amps_rSV0=[0.7, 0.2]`.
    #[arg(value_parser = parse_entry, required = true, value_name = "KEY=LIST")]
    pub entries: Vec<(String, String)>,

    /// Components the values must address.
    #[arg(short = 'c', long, default_value = "0")]
    pub components: ComponentSelection,
}

#[derive(Debug, Args, Clone)]
pub struct SelectionArgs {
    #[arg(short = 'c', long, default_value = "0")]
    pub components: ComponentSelection,
}

#[derive(Debug, Args, Clone)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Use the persisted target model.
    #[arg(long)]
    pub target_model: bool,

    #[command(flatten)]
    pub plot: PlotArgs,
}

#[derive(Debug, Subcommand)]
pub enum TargetCommand {
    /// Print the stored summands.
    Show,
    /// Set the summand of one component, e.g. `set 1 "k0*exp(-t/k0) - exp(-t/k1)"`.
    Set(TargetSetArgs),
    /// Parse the summands for a component selection.
    Check(SelectionArgs),
}

#[derive(Debug, Args, Clone)]
pub struct TargetSetArgs {
    pub component: usize,
    /// Expression in `t` and `k<N>`; empty means the component contributes nothing.
    #[arg(allow_hyphen_values = true)]
    pub expression: String,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output matrix file.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Decay constants, one band per value.
    #[arg(long, value_delimiter = ',', default_value = "2,40")]
    pub taus: Vec<f64>,

    /// Standard deviation of Gaussian noise.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, value_parser = parse_range, default_value = "450,700", value_name = "MIN,MAX")]
    pub wavelengths: (f64, f64),

    #[arg(long, default_value_t = 51)]
    pub n_wavelengths: usize,

    /// Largest time delay; the axis is 0 then log-spaced from `--t-first`.
    #[arg(long, default_value_t = 500.0)]
    pub t_max: f64,

    #[arg(long, default_value_t = 0.1)]
    pub t_first: f64,

    #[arg(long, default_value_t = 60)]
    pub n_time_delays: usize,
}

fn parse_range(raw: &str) -> Result<(f64, f64), String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [lo, hi] = parts.as_slice() else {
        return Err(format!("expected MIN,MAX but got '{raw}'"));
    };
    let lo: f64 = lo.parse().map_err(|_| format!("'{lo}' is not a number"))?;
    let hi: f64 = hi.parse().map_err(|_| format!("'{hi}' is not a number"))?;
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(format!("range must be finite with MIN < MAX, got {lo},{hi}"));
    }
    Ok((lo, hi))
}

fn parse_index_bounds(raw: &str) -> Result<[usize; 4], String> {
    let values = raw
        .split(',')
        .map(|p| p.trim().parse::<usize>().map_err(|_| format!("'{p}' is not an index")))
        .collect::<Result<Vec<_>, _>>()?;
    values
        .try_into()
        .map_err(|v: Vec<usize>| format!("expected 4 indices but got {}", v.len()))
}

fn parse_entry(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=LIST but got '{raw}'"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_command_parses_selection_and_method() {
        let cli = Cli::try_parse_from([
            "svdgf", "fit", "data.csv", "-c", "0,2", "--method", "least_squares", "--strict",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.data.components.indices(), &[0, 2]);
        assert_eq!(args.method, FitMethod::LeastSquares);
        assert!(args.strict);
        assert!(args.tau_max.is_infinite());
    }

    #[test]
    fn unknown_method_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["svdgf", "fit", "data.csv", "--method", "simplex"]).is_err());
    }

    #[test]
    fn ranges_and_entries_parse() {
        assert_eq!(parse_range("400, 700").unwrap(), (400.0, 700.0));
        assert!(parse_range("700,400").is_err());
        assert_eq!(parse_index_bounds("0,10,2,30").unwrap(), [0, 10, 2, 30]);
        assert!(parse_index_bounds("0,10").is_err());
        assert_eq!(
            parse_entry("amps_rSV0=[0.7, 0.2]").unwrap(),
            ("amps_rSV0".to_string(), "[0.7, 0.2]".to_string())
        );
    }

    #[test]
    fn params_set_collects_entries() {
        let cli = Cli::try_parse_from([
            "svdgf",
            "--config-dir",
            "/tmp/cfg",
            "params",
            "set",
            "time_constants=[5, 50]",
            "amps_rSV0=[1, 1]",
            "-c",
            "0,1",
        ])
        .unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/cfg")));
        let Command::Params(ParamsCommand::Set(args)) = cli.command else {
            panic!("expected params set");
        };
        assert_eq!(args.entries.len(), 2);
        assert_eq!(args.components.len(), 2);
    }
}
