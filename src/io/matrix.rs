//! Matrix files: read a TA data matrix from delimited text and write one back.
//!
//! Layout (delimiter `,`, `;` or tab, detected from the first line):
//!
//! ```text
//! label,   t_0,   t_1,   ...
//! wl_0,    a_00,  a_01,  ...
//! wl_1,    a_10,  a_11,  ...
//! ```
//!
//! Rows may come in descending wavelength order; they are flipped on load.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use nalgebra::DMatrix;

use crate::domain::DataMatrix;
use crate::error::{Result, SvdgfError};

/// Anything that can produce a data matrix.
pub trait MatrixSource {
    /// Load the matrix, dropping time delays before the one closest to `start_time`.
    fn load(&self, start_time: Option<f64>) -> Result<DataMatrix>;
}

/// A delimited text file on disk.
#[derive(Debug, Clone)]
pub struct CsvMatrixFile {
    path: PathBuf,
}

impl CsvMatrixFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MatrixSource for CsvMatrixFile {
    fn load(&self, start_time: Option<f64>) -> Result<DataMatrix> {
        load_matrix(&self.path, start_time)
    }
}

/// Read `path` and apply the optional start-time filter.
pub fn load_matrix(path: &Path, start_time: Option<f64>) -> Result<DataMatrix> {
    let delimiter = sniff_delimiter(path)?;
    let file = File::open(path)
        .map_err(|e| SvdgfError::Data(format!("failed to open matrix file '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(file);

    let mut records = reader.records();
    let header = match records.next() {
        Some(r) => r.map_err(|e| SvdgfError::Data(format!("failed to read header line: {e}")))?,
        None => return Err(SvdgfError::Data(format!("matrix file '{}' is empty", path.display()))),
    };
    let time_delays = parse_fields(&header, 1, 1)?;
    if time_delays.is_empty() {
        return Err(SvdgfError::Data("header line has no time delays".to_string()));
    }

    let mut wavelengths = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (idx, result) in records.enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| SvdgfError::Data(format!("line {line}: {e}")))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let fields = parse_fields(&record, 0, line)?;
        if fields.len() != time_delays.len() + 1 {
            return Err(SvdgfError::Data(format!(
                "line {line}: expected {} values after the wavelength, found {}",
                time_delays.len(),
                fields.len().saturating_sub(1)
            )));
        }
        wavelengths.push(fields[0]);
        rows.push(fields[1..].to_vec());
    }
    if rows.is_empty() {
        return Err(SvdgfError::Data(format!("matrix file '{}' has no data rows", path.display())));
    }

    if wavelengths.len() > 1 && wavelengths[0] > wavelengths[wavelengths.len() - 1] {
        wavelengths.reverse();
        rows.reverse();
    }

    let values = DMatrix::from_fn(rows.len(), time_delays.len(), |r, c| rows[r][c]);
    let matrix = DataMatrix::new(values, wavelengths, time_delays)?;
    log::info!(
        "loaded {}x{} matrix from '{}' (delimiter {:?})",
        matrix.n_wavelengths(),
        matrix.n_time_delays(),
        path.display(),
        delimiter as char
    );

    match start_time {
        Some(t0) => {
            let filtered = matrix.after_start_time(t0)?;
            log::info!(
                "start time {t0}: keeping {} of {} time delays",
                filtered.n_time_delays(),
                matrix.n_time_delays()
            );
            Ok(filtered)
        }
        None => Ok(matrix),
    }
}

/// Write `matrix` in the layout `load_matrix` reads, comma-delimited.
pub fn write_matrix_csv(
    path: &Path,
    label: &str,
    values: &DMatrix<f64>,
    wavelengths: &[f64],
    time_delays: &[f64],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| SvdgfError::Io(format!("failed to create '{}': {e}", path.display())))?;
    let to_io = |e: csv::Error| SvdgfError::Io(format!("failed to write '{}': {e}", path.display()));

    let mut header = vec![label.to_string()];
    header.extend(time_delays.iter().map(|t| t.to_string()));
    writer.write_record(&header).map_err(to_io)?;

    for (r, wl) in wavelengths.iter().enumerate() {
        let mut row = vec![wl.to_string()];
        row.extend(values.row(r).iter().map(|v| format!("{v:.10e}")));
        writer.write_record(&row).map_err(to_io)?;
    }
    writer
        .flush()
        .map_err(|e| SvdgfError::Io(format!("failed to flush '{}': {e}", path.display())))
}

fn sniff_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)
        .map_err(|e| SvdgfError::Data(format!("failed to open matrix file '{}': {e}", path.display())))?;
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .map_err(|e| SvdgfError::Data(format!("failed to read '{}': {e}", path.display())))?;

    let best = [b'\t', b';', b',']
        .into_iter()
        .max_by_key(|&d| first.bytes().filter(|&b| b == d).count())
        .unwrap_or(b',');
    if first.bytes().any(|b| b == best) {
        Ok(best)
    } else {
        Ok(b',')
    }
}

fn parse_fields(record: &StringRecord, skip: usize, line: usize) -> Result<Vec<f64>> {
    record
        .iter()
        .skip(skip)
        .enumerate()
        .filter(|(i, field)| !(field.is_empty() && *i + skip == record.len().saturating_sub(1)))
        .map(|(i, field)| {
            field.parse::<f64>().map_err(|_| {
                SvdgfError::Data(format!("line {line}, column {}: '{field}' is not a number", i + skip + 1))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::persist::test_support::scratch_dir;

    fn write(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn loads_semicolon_file_and_flips_descending_wavelengths() {
        let dir = scratch_dir("matrix-semicolon");
        let path = dir.join("m.csv");
        write(&path, "wl;0;1;2\n600;1;2;3\n500;4;5;6\n");

        let m = load_matrix(&path, None).unwrap();
        assert_eq!(m.wavelengths(), &[500.0, 600.0]);
        assert_eq!(m.time_delays(), &[0.0, 1.0, 2.0]);
        assert_eq!(m.values()[(0, 0)], 4.0);
        assert_eq!(m.values()[(1, 2)], 3.0);
    }

    #[test]
    fn start_time_drops_earlier_delays() {
        let dir = scratch_dir("matrix-start");
        let path = dir.join("m.tsv");
        write(&path, "x\t-1\t0\t1\t2\n500\t0\t1\t2\t3\n");

        let m = load_matrix(&path, Some(0.9)).unwrap();
        assert_eq!(m.time_delays(), &[1.0, 2.0]);
        assert_eq!(m.values()[(0, 0)], 2.0);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = scratch_dir("matrix-ragged");
        let path = dir.join("m.csv");
        write(&path, "wl,0,1\n500,1\n");
        assert!(matches!(load_matrix(&path, None), Err(SvdgfError::Data(_))));
    }

    #[test]
    fn written_matrix_loads_back() {
        let dir = scratch_dir("matrix-write");
        let path = dir.join("m.csv");
        let values = DMatrix::from_fn(2, 3, |r, c| (r + 1) as f64 * 0.5 - c as f64);
        write_matrix_csv(&path, "wavelength", &values, &[450.0, 460.0], &[0.0, 0.5, 1.0]).unwrap();

        let m = CsvMatrixFile::new(&path).load(None).unwrap();
        assert!((m.values() - &values).amax() < 1e-9);
    }
}
