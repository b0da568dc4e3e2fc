//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the outcome to an exit code; this module is the
//! real main: parse arguments, resolve the config directory, dispatch.

use std::collections::BTreeMap;

use clap::Parser;

use crate::cli::{Command, DataArgs, FitArgs, ParamsCommand, PreviewArgs, SimulateArgs, SvdArgs, TargetCommand};
use crate::config::{ConfigPaths, InitialParameterStore, RowRemoval};
use crate::data::{SyntheticSpec, generate};
use crate::domain::{BoundsSpec, FitOptions, InstrumentResponse, MatrixBounds, RunConfig};
use crate::error::AppError;
use crate::io::{export_fit, write_matrix_csv};
use crate::models::TargetModelSpec;

pub mod pipeline;

/// Entry point for the `svdgf` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    let paths = ConfigPaths::resolve(cli.config_dir.as_deref());
    log::debug!("configuration directory: {}", paths.dir().display());

    match cli.command {
        Command::Fit(args) => handle_fit(&paths, args),
        Command::Svd(args) => handle_svd(&paths, args),
        Command::Params(cmd) => handle_params(&paths, cmd),
        Command::Target(cmd) => handle_target(&paths, cmd),
        Command::Simulate(args) => handle_simulate(args),
        Command::Methods => {
            print!("{}", crate::report::format_methods());
            Ok(())
        }
    }
}

fn handle_fit(paths: &ConfigPaths, args: FitArgs) -> Result<(), AppError> {
    let config = run_config_from_args(paths, &args);
    let run = pipeline::run_fit(&config)?;
    for warning in &run.warnings {
        eprintln!("warning: {warning}");
    }

    println!("{}", crate::report::format_fit_report(&run.result));
    println!("{}", crate::report::format_das_summary(&run.das));
    println!(
        "{}",
        crate::report::format_reconstruction(&run.data, &config.components, &run.reconstructions)
    );

    if config.plot {
        println!(
            "{}",
            crate::plot::render_das_plot(&run.das, config.plot_width, config.plot_height)
        );
        if args.plot_fit {
            println!(
                "{}",
                crate::plot::render_fit_plot(&run.result, config.plot_width, config.plot_height)
            );
        }
    }

    if let Some(dir) = &config.export_dir {
        let files = export_fit(
            dir,
            &config.data_path,
            &run.data,
            &run.result,
            &run.das,
            &run.reconstructions,
        )?;
        println!("Exported {}", files.fit_json.display());
        println!("Exported {}", files.das_csv.display());
        for path in &files.matrices {
            println!("Exported {}", path.display());
        }
    }
    Ok(())
}

fn handle_svd(paths: &ConfigPaths, args: SvdArgs) -> Result<(), AppError> {
    let config = base_run_config(paths, &args.data);
    let decomposed = pipeline::decompose_file(&config)?;
    let svd = &decomposed.svd;

    println!(
        "=== SVD of {}x{} matrix ({} components) ===",
        decomposed.data.n_wavelengths(),
        decomposed.data.n_time_delays(),
        svd.n_components()
    );
    print!(
        "{}",
        crate::report::format_singular_values(svd, Some(&config.components), args.show)
    );
    let reconstruction = svd.reconstruct(&config.components)?;
    print!(
        "{}",
        crate::report::format_svd_error(&decomposed.data, &config.components, &reconstruction)
    );
    Ok(())
}

fn handle_params(paths: &ConfigPaths, cmd: ParamsCommand) -> Result<(), AppError> {
    let (mut store, warning) = InitialParameterStore::load(paths.initial_params());
    if let Some(err) = warning {
        eprintln!("warning: {err}");
    }

    match cmd {
        ParamsCommand::Show => {
            println!("# {}", store.path().display());
            print!("{}", crate::report::format_initial_params(store.values()));
        }
        ParamsCommand::Set(args) => {
            let candidate: BTreeMap<String, String> = args.entries.into_iter().collect();
            store.apply(&candidate, &args.components)?;
            println!("Saved {}", store.path().display());
            print!("{}", crate::report::format_initial_params(store.values()));
        }
        ParamsCommand::AddRow => {
            let row = store.add_parameter_row()?;
            println!("Added amplitude row {row}");
            print!("{}", crate::report::format_initial_params(store.values()));
        }
        ParamsCommand::RemoveRow => {
            match store.remove_parameter_row()? {
                RowRemoval::Removed { row } => println!("Removed amplitude row {row}"),
                RowRemoval::NothingToRemove => println!("Only amplitude row 0 is left; nothing removed"),
            }
            print!("{}", crate::report::format_initial_params(store.values()));
        }
        ParamsCommand::Check(args) => {
            store.values().check_lengths(&args.components)?;
            println!("Initial values address components {}", args.components);
        }
        ParamsCommand::Preview(args) => handle_preview(paths, &store, args)?,
    }
    Ok(())
}

fn handle_preview(paths: &ConfigPaths, store: &InitialParameterStore, args: PreviewArgs) -> Result<(), AppError> {
    let config = base_run_config(paths, &args.data);
    let target = if args.target_model {
        Some(pipeline::load_target_model(paths, &config.components)?)
    } else {
        None
    };
    let decomposed = pipeline::decompose_file(&config)?;
    let retained = decomposed.svd.select(&config.components)?;
    let preview = pipeline::preview_initial_guess(
        &retained,
        decomposed.data.time_delays(),
        store.values(),
        target,
        &config.options,
    )?;

    if let Some(reason) = &preview.fallback_reason {
        println!("note: {reason}");
    }
    print!(
        "{}",
        crate::report::format_preview(&preview.selection, &preview.targets, &preview.model)
    );
    if !args.plot.no_plot {
        for (j, component) in preview.selection.iter().enumerate() {
            let series = [
                crate::plot::Series {
                    label: "initial guess".to_string(),
                    ch: '-',
                    points: zip(&preview.time_delays, preview.model.column(j).iter().copied()),
                    connected: true,
                },
                crate::plot::Series {
                    label: format!("sigma_{component} * rSV_{component}"),
                    ch: 'o',
                    points: zip(&preview.time_delays, preview.targets.column(j).iter().copied()),
                    connected: false,
                },
            ];
            println!(
                "{}",
                crate::plot::render_plot(
                    &format!("rSV{component} initial guess"),
                    "time delay",
                    &series,
                    args.plot.width,
                    args.plot.height
                )
            );
        }
    }
    Ok(())
}

fn handle_target(paths: &ConfigPaths, cmd: TargetCommand) -> Result<(), AppError> {
    let path = paths.target_model();
    match cmd {
        TargetCommand::Show => {
            let spec = TargetModelSpec::load(&path)?;
            println!("# {}", path.display());
            for (component, expr) in spec.iter() {
                println!("{:<18} = {expr}", crate::models::target::summand_key(component));
            }
        }
        TargetCommand::Set(args) => {
            // A missing file starts a new model; a malformed one is an error.
            let mut spec = if path.exists() {
                TargetModelSpec::load(&path)?
            } else {
                TargetModelSpec::default()
            };
            spec.set_summand(args.component, &args.expression)?;
            spec.persist(&path)?;
            println!("Saved {}", path.display());
        }
        TargetCommand::Check(args) => {
            let model = TargetModelSpec::load(&path)?.compile(&args.components)?;
            for expr in model.expressions() {
                println!("component {}: {expr}", expr.component());
            }
        }
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let (wl_min, wl_max) = args.wavelengths;
    let spec = SyntheticSpec {
        wavelength_min: wl_min,
        wavelength_max: wl_max,
        n_wavelengths: args.n_wavelengths,
        t_first: args.t_first,
        t_max: args.t_max,
        n_time_delays: args.n_time_delays,
        components: SyntheticSpec::bands_for(&args.taus, wl_min, wl_max),
        noise: args.noise,
        seed: args.seed,
    };
    let matrix = generate(&spec)?;
    write_matrix_csv(
        &args.output,
        "wavelength",
        matrix.values(),
        matrix.wavelengths(),
        matrix.time_delays(),
    )?;
    println!(
        "Wrote {}x{} matrix to {}",
        matrix.n_wavelengths(),
        matrix.n_time_delays(),
        args.output.display()
    );
    Ok(())
}

fn base_run_config(paths: &ConfigPaths, data: &DataArgs) -> RunConfig {
    let bounds = match data.index_bounds {
        Some([wl_min, wl_max, t_min, t_max]) => BoundsSpec::Indices(MatrixBounds {
            min_wavelength_index: wl_min,
            max_wavelength_index: wl_max,
            min_time_delay_index: t_min,
            max_time_delay_index: t_max,
        }),
        None if data.wavelengths.is_some() || data.time_delays.is_some() => BoundsSpec::Values {
            wavelengths: data.wavelengths,
            time_delays: data.time_delays,
        },
        None => BoundsSpec::Full,
    };
    RunConfig {
        data_path: data.data.clone(),
        start_time: data.start_time,
        bounds,
        components: data.components.clone(),
        method: Default::default(),
        use_target_model: false,
        config_dir: paths.dir().to_path_buf(),
        options: FitOptions::default(),
        plot: true,
        plot_width: 100,
        plot_height: 25,
        export_dir: None,
    }
}

pub fn run_config_from_args(paths: &ConfigPaths, args: &FitArgs) -> RunConfig {
    RunConfig {
        method: args.method,
        use_target_model: args.target_model,
        options: FitOptions {
            tau_min: args.tau_min,
            tau_max: args.tau_max,
            max_nfev: args.max_nfev,
            global_iterations: args.global_iterations,
            seed: args.seed,
            fallback_to_defaults: !args.strict,
            instrument_response: InstrumentResponse {
                temporal_resolution: args.temporal_resolution,
                time_zero: args.time_zero,
            },
            ..FitOptions::default()
        },
        plot: !args.plot.no_plot,
        plot_width: args.plot.width,
        plot_height: args.plot.height,
        export_dir: args.export_dir.clone(),
        ..base_run_config(paths, &args.data)
    }
}

fn zip(x: &[f64], y: impl Iterator<Item = f64>) -> Vec<(f64, f64)> {
    x.iter().copied().zip(y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use std::path::Path;

    #[test]
    fn fit_args_become_run_config() {
        let cli = Cli::try_parse_from([
            "svdgf",
            "fit",
            "m.csv",
            "-c",
            "0,1",
            "--wavelengths",
            "500,600",
            "--strict",
            "--no-plot",
            "--tau-min",
            "0.5",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let config = run_config_from_args(&ConfigPaths::new("/tmp/cfg"), &args);
        assert_eq!(config.data_path, Path::new("m.csv"));
        assert_eq!(config.config_dir, Path::new("/tmp/cfg"));
        assert!(!config.options.fallback_to_defaults);
        assert_eq!(config.options.tau_min, 0.5);
        assert!(!config.plot);
        let BoundsSpec::Values { wavelengths, time_delays } = config.bounds else {
            panic!("expected value bounds");
        };
        assert_eq!(wavelengths, Some((500.0, 600.0)));
        assert_eq!(time_delays, None);
    }
}
