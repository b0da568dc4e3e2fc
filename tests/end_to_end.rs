//! Integration tests: synthetic matrix -> file -> SVD -> global fit -> DAS.

use std::collections::BTreeMap;
use std::path::PathBuf;

use nalgebra::DMatrix;

use ta_svdgf::app::pipeline;
use ta_svdgf::config::{ConfigPaths, InitialFitParameters, InitialParameterStore};
use ta_svdgf::data::{SyntheticSpec, generate};
use ta_svdgf::domain::{BoundsSpec, ComponentSelection, DataMatrix, FitMethod, FitOptions, RunConfig, StdErr};
use ta_svdgf::error::SvdgfError;
use ta_svdgf::fit::GlobalFitEngine;
use ta_svdgf::io::write_matrix_csv;
use ta_svdgf::math::decompose;
use ta_svdgf::models::TargetModelSpec;

fn scratch(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("svdgf-e2e-{label}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_synthetic(dir: &std::path::Path) -> PathBuf {
    let matrix = generate(&SyntheticSpec::default()).unwrap();
    let path = dir.join("synthetic.csv");
    write_matrix_csv(&path, "wavelength", matrix.values(), matrix.wavelengths(), matrix.time_delays()).unwrap();
    path
}

fn run_config(data_path: PathBuf, config_dir: PathBuf, components: &[usize]) -> RunConfig {
    RunConfig {
        data_path,
        start_time: None,
        bounds: BoundsSpec::Full,
        components: ComponentSelection::new(components.iter().copied()).unwrap(),
        method: FitMethod::Leastsq,
        use_target_model: false,
        config_dir,
        options: FitOptions::default(),
        plot: false,
        plot_width: 80,
        plot_height: 20,
        export_dir: None,
    }
}

fn store_two_component_guesses(config_dir: &std::path::Path) {
    let mut store = InitialParameterStore::load(ConfigPaths::new(config_dir).initial_params()).0;
    let candidate = BTreeMap::from([
        ("time_constants".to_string(), "[3, 30]".to_string()),
        ("amps_rSV0".to_string(), "[1, 1]".to_string()),
        ("amps_rSV1".to_string(), "[0.5, -0.5]".to_string()),
    ]);
    store.apply(&candidate, &ComponentSelection::new([0, 1]).unwrap()).unwrap();
}

fn sorted(mut v: Vec<f64>) -> Vec<f64> {
    v.sort_by(f64::total_cmp);
    v
}

#[test]
fn single_exponential_5x5_recovers_tau() {
    let t: [f64; 5] = [0.0, 4.0, 8.0, 12.0, 16.0];
    let spectrum = [0.5, 1.0, 0.8, 0.3, 0.1];
    let values = DMatrix::from_fn(5, 5, |r, c| spectrum[r] * (-t[c] / 10.0).exp());
    let m = DataMatrix::new(values, vec![400.0, 450.0, 500.0, 550.0, 600.0], t.to_vec()).unwrap();

    let retained = decompose(&m)
        .unwrap()
        .select(&ComponentSelection::new([0]).unwrap())
        .unwrap();
    let initial = InitialFitParameters::default();
    assert_eq!(initial.time_constants(), &[50.0]);

    let result = GlobalFitEngine::default()
        .fit(&retained, m.time_delays(), &initial, FitMethod::Leastsq, None)
        .unwrap();
    let tau = result.decay_constants[0];
    assert!((tau - 10.0).abs() < 1e-4, "tau = {tau}");
}

#[test]
fn csv_file_through_fit_to_das() {
    let dir = scratch("pipeline");
    let data_path = write_synthetic(&dir);
    let config_dir = dir.join("cfg");
    store_two_component_guesses(&config_dir);

    let run = pipeline::run_fit(&run_config(data_path, config_dir, &[0, 1])).unwrap();
    let taus = sorted(run.result.decay_constants.clone());
    assert!((taus[0] - 2.0).abs() < 1e-3, "taus = {taus:?}");
    assert!((taus[1] - 40.0).abs() < 1e-2, "taus = {taus:?}");

    assert_eq!(run.das.spectra.shape(), (51, 2));
    assert_eq!(run.das.components, vec![0, 1]);
    assert!(run.das.stderrs.iter().all(|s| !matches!(s, StdErr::Unsupported)));

    let rms = ta_svdgf::report::Reconstructions::rms(&run.reconstructions.svdgf_difference);
    assert!(rms < 1e-4, "SVDGF reconstruction rms = {rms}");
    assert!(run.warnings.is_empty(), "{:?}", run.warnings);
}

#[test]
fn malformed_parameters_file_is_reported_as_warning() {
    let dir = scratch("bad-params");
    let data_path = write_synthetic(&dir);
    let config_dir = dir.join("cfg");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(ConfigPaths::new(&config_dir).initial_params(), "{ not json").unwrap();

    let run = pipeline::run_fit(&run_config(data_path, config_dir, &[0])).unwrap();
    assert_eq!(run.warnings.len(), 1, "{:?}", run.warnings);
    assert!(run.warnings[0].contains("could not deserialize"), "{}", run.warnings[0]);
    assert_eq!(run.result.decay_constants.len(), 1);
}

#[test]
fn target_model_from_config_dir_is_used() {
    let dir = scratch("target");
    let data_path = write_synthetic(&dir);
    let config_dir = dir.join("cfg");
    store_two_component_guesses(&config_dir);

    let mut spec = TargetModelSpec::default();
    spec.set_summand(0, "exp(-t/k0)").unwrap();
    spec.set_summand(1, "np.exp(-t/k1)").unwrap();
    spec.persist(&ConfigPaths::new(&config_dir).target_model()).unwrap();

    let mut config = run_config(data_path, config_dir, &[0, 1]);
    config.use_target_model = true;
    config.method = FitMethod::LeastSquares;
    let run = pipeline::run_fit(&config).unwrap();

    let taus = sorted(run.result.decay_constants.clone());
    assert!((taus[0] - 2.0).abs() < 1e-2, "taus = {taus:?}");
    assert!((taus[1] - 40.0).abs() < 1e-1, "taus = {taus:?}");
}

#[test]
fn missing_target_model_fails_before_fitting() {
    let dir = scratch("no-target");
    let data_path = write_synthetic(&dir);
    let mut config = run_config(data_path, dir.join("cfg"), &[0]);
    config.use_target_model = true;

    let err = pipeline::run_fit(&config).unwrap_err();
    assert!(matches!(err, SvdgfError::Parse { .. }), "{err}");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn selecting_beyond_available_components_is_rejected() {
    let dir = scratch("selection");
    let data_path = write_synthetic(&dir);
    let err = pipeline::run_fit(&run_config(data_path, dir.join("cfg"), &[0, 99])).unwrap_err();
    assert!(matches!(err, SvdgfError::InvalidSelection(_)), "{err}");
}
