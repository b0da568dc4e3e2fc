//! Export fit outputs: DAS and matrices as CSV, the fit itself as JSON.
//!
//! Everything goes into one caller-chosen directory, created on demand.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::domain::{ComponentSelection, Correlation, DataMatrix, Das, FitMethod, FitParameter, FitResult, FitStatistics, ModelDescription};
use crate::error::{Result, SvdgfError};
use crate::io::matrix::write_matrix_csv;
use crate::report::Reconstructions;

/// JSON form of a fit, stamped with the time of export.
#[derive(Debug, Serialize)]
pub struct FitExport<'a> {
    pub exported_at: String,
    pub data_file: String,
    pub method: FitMethod,
    pub components: &'a ComponentSelection,
    pub model: &'a ModelDescription,
    pub statistics: &'a FitStatistics,
    pub params: &'a [FitParameter],
    pub correlations: &'a [Correlation],
    pub decay_constants: &'a [f64],
    pub notes: &'a [String],
}

impl<'a> FitExport<'a> {
    pub fn new(result: &'a FitResult, data_file: &Path) -> Self {
        Self {
            exported_at: Local::now().to_rfc3339(),
            data_file: data_file.display().to_string(),
            method: result.method,
            components: &result.components,
            model: &result.model,
            statistics: &result.statistics,
            params: &result.params.params,
            correlations: &result.correlations,
            decay_constants: &result.decay_constants,
            notes: &result.notes,
        }
    }
}

/// Write the fit as pretty JSON.
pub fn write_fit_json(path: &Path, result: &FitResult, data_file: &Path) -> Result<()> {
    let body = serde_json::to_string_pretty(&FitExport::new(result, data_file))
        .map_err(|e| SvdgfError::Io(format!("failed to serialize fit result: {e}")))?;
    fs::write(path, body).map_err(|e| SvdgfError::Io(format!("failed to write '{}': {e}", path.display())))
}

/// One row per wavelength, one column per DAS (headed by its label).
pub fn write_das_csv(path: &Path, das: &Das) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| SvdgfError::Io(format!("failed to create '{}': {e}", path.display())))?;
    let to_io = |e: csv::Error| SvdgfError::Io(format!("failed to write '{}': {e}", path.display()));

    let mut header = vec!["wavelength".to_string()];
    header.extend((0..das.components.len()).map(|j| das.label(j)));
    writer.write_record(&header).map_err(to_io)?;

    for (r, wl) in das.wavelengths.iter().enumerate() {
        let mut row = vec![wl.to_string()];
        row.extend(das.spectra.row(r).iter().map(|v| format!("{v:.10e}")));
        writer.write_record(&row).map_err(to_io)?;
    }
    writer
        .flush()
        .map_err(|e| SvdgfError::Io(format!("failed to flush '{}': {e}", path.display())))
}

/// Files written by `export_fit`.
#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub fit_json: PathBuf,
    pub das_csv: PathBuf,
    pub matrices: Vec<PathBuf>,
}

/// Write the fit JSON, the DAS and every reconstruction into `dir`.
pub fn export_fit(
    dir: &Path,
    data_file: &Path,
    data: &DataMatrix,
    result: &FitResult,
    das: &Das,
    rec: &Reconstructions,
) -> Result<ExportedFiles> {
    fs::create_dir_all(dir)
        .map_err(|e| SvdgfError::Io(format!("failed to create export directory '{}': {e}", dir.display())))?;

    let stem = format!("{}_comp{}", result.method, join_components(&result.components));
    let fit_json = dir.join(format!("fit_{stem}.json"));
    write_fit_json(&fit_json, result, data_file)?;
    let das_csv = dir.join(format!("DAS_{stem}.csv"));
    write_das_csv(&das_csv, das)?;

    let mut matrices = Vec::new();
    for (name, values) in [
        ("SVD_reconstruction", &rec.svd),
        ("SVDGF_reconstruction", &rec.svdgf),
        ("SVD_difference", &rec.svd_difference),
        ("SVDGF_difference", &rec.svdgf_difference),
    ] {
        let path = dir.join(format!("{name}_{stem}.csv"));
        write_matrix_csv(&path, name, values, data.wavelengths(), data.time_delays())?;
        matrices.push(path);
    }

    log::info!("exported fit, DAS and {} matrices to '{}'", matrices.len(), dir.display());
    Ok(ExportedFiles {
        fit_json,
        das_csv,
        matrices,
    })
}

fn join_components(selection: &ComponentSelection) -> String {
    let parts: Vec<String> = selection.iter().map(|c| c.to_string()).collect();
    parts.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::persist::test_support::scratch_dir;
    use crate::domain::StdErr;
    use nalgebra::DMatrix;

    #[test]
    fn das_csv_has_labelled_columns() {
        let dir = scratch_dir("export-das");
        let path = dir.join("das.csv");
        let das = Das {
            wavelengths: vec![500.0, 510.0],
            components: vec![0, 2],
            spectra: DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]),
            decay_constants: vec![1.5, 20.0],
            stderrs: vec![StdErr::Estimated(0.1), StdErr::Unsupported],
        };
        write_das_csv(&path, &das).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("wavelength,"));
        assert!(header.contains("DAS_comp0, tau = 1.50 ± 0.10"));
        assert!(header.contains("DAS_comp2, tau = 20.00 ± not computed"));
        assert_eq!(lines.count(), 2);
    }
}
