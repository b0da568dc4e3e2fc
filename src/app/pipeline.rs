//! The shared analysis workflow used by the CLI commands:
//!
//! load matrix -> bound -> SVD -> (target model) -> background fit -> DAS -> reconstructions
//!
//! Parsing and validation run before the decomposition so bad input fails fast.

use std::time::Duration;

use crate::config::{ConfigPaths, InitialFitParameters, InitialParameterStore};
use crate::domain::{BoundsSpec, ComponentSelection, DataMatrix, Das, FitOptions, FitResult, MatrixBounds, RunConfig};
use crate::error::Result;
use crate::fit::{FitJob, FitStatus};
use crate::io::{CsvMatrixFile, MatrixSource};
use crate::math::{RetainedComponents, SingularValueDecomposition, decompose};
use crate::models::{KineticModel, TargetModel, TargetModelSpec};
use crate::report::{Reconstructions, build_das};

/// How often a running fit logs that it is still busy.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Matrix plus its decomposition.
#[derive(Debug, Clone)]
pub struct Decomposed {
    pub data: DataMatrix,
    pub svd: SingularValueDecomposition,
}

/// All computed outputs of a single fit run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub data: DataMatrix,
    pub svd: SingularValueDecomposition,
    pub retained: RetainedComponents,
    pub result: FitResult,
    pub das: Das,
    pub reconstructions: Reconstructions,
    /// Non-fatal problems met on the way, e.g. an unreadable parameters file.
    pub warnings: Vec<String>,
}

/// Load the matrix from `source`, then cut it down to the requested bounds.
pub fn load_bounded(source: &dyn MatrixSource, start_time: Option<f64>, bounds: &BoundsSpec) -> Result<DataMatrix> {
    let full = source.load(start_time)?;
    let bounds = match bounds {
        BoundsSpec::Full => None,
        BoundsSpec::Indices(b) => Some(*b),
        BoundsSpec::Values {
            wavelengths,
            time_delays,
        } => Some(MatrixBounds::from_values(&full, *wavelengths, *time_delays)?),
    };
    let data = full.bounded(bounds.as_ref())?;
    if let Some(b) = bounds {
        log::info!(
            "bounds: wavelengths [{}, {}], time delays [{}, {}] -> {}x{}",
            b.min_wavelength_index,
            b.max_wavelength_index,
            b.min_time_delay_index,
            b.max_time_delay_index,
            data.n_wavelengths(),
            data.n_time_delays()
        );
    }
    Ok(data)
}

pub fn decompose_file(config: &RunConfig) -> Result<Decomposed> {
    let source = CsvMatrixFile::new(&config.data_path);
    let data = load_bounded(&source, config.start_time, &config.bounds)?;
    let svd = decompose(&data)?;
    Ok(Decomposed { data, svd })
}

/// Read and compile the persisted target model for `selection`.
pub fn load_target_model(paths: &ConfigPaths, selection: &ComponentSelection) -> Result<TargetModel> {
    TargetModelSpec::load(&paths.target_model())?.compile(selection)
}

/// Run the whole fit pipeline for `config`.
pub fn run_fit(config: &RunConfig) -> Result<RunOutput> {
    let paths = ConfigPaths::new(&config.config_dir);
    let (store, warning) = InitialParameterStore::load(paths.initial_params());
    let warnings: Vec<String> = warning.iter().map(ToString::to_string).collect();
    let target = if config.use_target_model {
        Some(load_target_model(&paths, &config.components)?)
    } else {
        None
    };

    let Decomposed { data, svd } = decompose_file(config)?;
    let retained = svd.select(&config.components)?;

    let result = fit_in_background(FitJob {
        retained: retained.clone(),
        time_delays: data.time_delays().to_vec(),
        initial: store.values().clone(),
        method: config.method,
        target,
        options: config.options.clone(),
    })?;

    let das = build_das(&result, &retained, data.wavelengths())?;
    let reconstructions = Reconstructions::build(&data, &retained, &das, &result)?;

    Ok(RunOutput {
        data,
        svd,
        retained,
        result,
        das,
        reconstructions,
        warnings,
    })
}

/// Submit `job` to the worker pool and wait for it, logging while it runs.
pub fn fit_in_background(job: FitJob) -> Result<FitResult> {
    let method = job.method;
    let handle = job.spawn();
    loop {
        match handle.wait_timeout(PROGRESS_INTERVAL) {
            FitStatus::Finished(result) => {
                log::info!("{method} fit finished after {:.1}s", handle.elapsed().as_secs_f64());
                return result;
            }
            FitStatus::Running => {
                log::info!("still computing ({method}, {:.0}s)", handle.elapsed().as_secs_f64());
            }
        }
    }
}

/// Model traces at the initial values next to the fit targets `σ_i · V_i`.
pub struct Preview {
    pub selection: ComponentSelection,
    pub time_delays: Vec<f64>,
    pub targets: nalgebra::DMatrix<f64>,
    pub model: nalgebra::DMatrix<f64>,
    pub fallback_reason: Option<String>,
}

/// Evaluate the chosen model at the stored initial values without fitting.
pub fn preview_initial_guess(
    retained: &RetainedComponents,
    time_delays: &[f64],
    initial: &InitialFitParameters,
    target: Option<TargetModel>,
    options: &FitOptions,
) -> Result<Preview> {
    let selection = &retained.selection;
    let model = match target {
        Some(t) => KineticModel::target(t)?,
        None => KineticModel::generic(selection),
    };
    let guesses = if options.fallback_to_defaults {
        initial.resolve_or_default(selection)
    } else {
        initial.resolve(selection)?
    };
    Ok(Preview {
        selection: selection.clone(),
        time_delays: time_delays.to_vec(),
        targets: retained.weighted_right(),
        model: model.predict(time_delays, &guesses.taus, &guesses.amps),
        fallback_reason: guesses.fallback_reason,
    })
}
