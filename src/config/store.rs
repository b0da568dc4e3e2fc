//! Initial fit-parameter store.
//!
//! The persisted mapping has one `time_constants` list (one guess per
//! component index) and amplitude lists `amps_rSV0, amps_rSV1, ...` (row `i`
//! holds the amplitudes used when fitting retained right singular vector `i`,
//! indexed by component). Edits arrive as raw list text and are validated as
//! a whole before anything is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::persist::{self, ReadOutcome};
use crate::domain::ComponentSelection;
use crate::error::{Result, SvdgfError, ValidationRule};

pub const TIME_CONSTANTS_KEY: &str = "time_constants";
pub const DEFAULT_TIME_CONSTANT: f64 = 50.0;
pub const DEFAULT_AMPLITUDE: f64 = 0.7;

/// Key of amplitude row `i`.
pub fn amps_key(row: usize) -> String {
    format!("amps_rSV{row}")
}

fn parse_amps_key(key: &str) -> Option<usize> {
    let digits = key.strip_prefix("amps_rSV")?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    digits.parse().ok()
}

/// Validated initial guesses: `time_constants` plus contiguous `amps_rSV{i}` rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitialFitParameters {
    entries: BTreeMap<String, Vec<f64>>,
}

impl Default for InitialFitParameters {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(TIME_CONSTANTS_KEY.to_string(), vec![DEFAULT_TIME_CONSTANT]);
        entries.insert(amps_key(0), vec![DEFAULT_AMPLITUDE]);
        Self { entries }
    }
}

impl InitialFitParameters {
    /// Build from already-parsed lists, checking only the key rules.
    pub fn from_lists(entries: BTreeMap<String, Vec<f64>>) -> Result<Self> {
        check_keys(entries.keys().map(String::as_str))?;
        if let Some((key, _)) = entries
            .iter()
            .find(|(_, list)| list.iter().any(|v| !v.is_finite()))
        {
            return Err(SvdgfError::validation(
                ValidationRule::NonFinite,
                format!("'{key}' contains a non-finite value"),
            ));
        }
        Ok(Self { entries })
    }

    pub fn time_constants(&self) -> &[f64] {
        self.entries
            .get(TIME_CONSTANTS_KEY)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn amps(&self, row: usize) -> Option<&[f64]> {
        self.entries.get(&amps_key(row)).map(Vec::as_slice)
    }

    /// Number of `amps_rSV{i}` rows.
    pub fn n_amp_rows(&self) -> usize {
        (0..).take_while(|&i| self.entries.contains_key(&amps_key(i))).count()
    }

    /// Entries in display order: `time_constants` then `amps_rSV0, amps_rSV1, ...`.
    pub fn ordered(&self) -> Vec<(String, &[f64])> {
        let mut out = vec![(TIME_CONSTANTS_KEY.to_string(), self.time_constants())];
        for i in 0..self.n_amp_rows() {
            out.push((amps_key(i), self.amps(i).unwrap_or_default()));
        }
        out
    }

    /// Each entry rendered as list text, the form `validate` accepts back.
    pub fn to_raw(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), format_list(v)))
            .collect()
    }

    /// Check that every list addresses the selected components.
    pub fn check_lengths(&self, selection: &ComponentSelection) -> Result<()> {
        let needed = selection.max_index() + 1;
        for (key, list) in self.ordered() {
            if list.len() < needed {
                return Err(SvdgfError::validation(
                    ValidationRule::Length,
                    format!(
                        "'{key}' has {} value(s) but component {} is selected (needs at least {needed})",
                        list.len(),
                        selection.max_index()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Guesses for the fit of `selection`: one tau per component and an
    /// `n × n` amplitude matrix (row = retained rSV, column = component).
    pub fn resolve(&self, selection: &ComponentSelection) -> Result<InitialGuesses> {
        let n = selection.len();
        let rows = self.n_amp_rows();
        if rows < n {
            return Err(SvdgfError::validation(
                ValidationRule::Keys,
                format!(
                    "{n} components are selected but only {rows} amplitude row(s) exist; add '{}'",
                    amps_key(rows)
                ),
            ));
        }
        self.check_lengths(selection)?;

        let taus = selection
            .iter()
            .map(|c| self.time_constants()[c])
            .collect();
        let amps = DMatrix::from_fn(n, n, |i, j| {
            let c = selection.indices()[j];
            self.amps(i).map_or(DEFAULT_AMPLITUDE, |row| row[c])
        });
        Ok(InitialGuesses {
            taus,
            amps,
            fallback_reason: None,
        })
    }

    /// Like `resolve`, but substitute defaults when the stored guesses cannot be used.
    pub fn resolve_or_default(&self, selection: &ComponentSelection) -> InitialGuesses {
        match self.resolve(selection) {
            Ok(guesses) => guesses,
            Err(err) => {
                log::warn!("using default initial values: {err}");
                let n = selection.len();
                InitialGuesses {
                    taus: vec![DEFAULT_TIME_CONSTANT; n],
                    amps: DMatrix::from_element(n, n, DEFAULT_AMPLITUDE),
                    fallback_reason: Some(err.to_string()),
                }
            }
        }
    }
}

/// Per-fit initial values, ordered like the component selection.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialGuesses {
    pub taus: Vec<f64>,
    pub amps: DMatrix<f64>,
    /// Set when defaults replaced the stored values.
    pub fallback_reason: Option<String>,
}

fn format_list(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn check_keys<'a>(keys: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut has_time_constants = false;
    let mut rows = Vec::new();
    for key in keys {
        if key == TIME_CONSTANTS_KEY {
            has_time_constants = true;
        } else if let Some(i) = parse_amps_key(key) {
            rows.push(i);
        } else {
            return Err(SvdgfError::validation(
                ValidationRule::Keys,
                format!("unknown key '{key}' (expected '{TIME_CONSTANTS_KEY}' or 'amps_rSV<i>')"),
            ));
        }
    }
    if !has_time_constants {
        return Err(SvdgfError::validation(
            ValidationRule::Keys,
            format!("'{TIME_CONSTANTS_KEY}' is required"),
        ));
    }
    rows.sort_unstable();
    if let Some((expected, _)) = rows.iter().enumerate().find(|(i, r)| i != *r) {
        return Err(SvdgfError::validation(
            ValidationRule::Keys,
            format!("amplitude rows must be contiguous from 0; '{}' is missing", amps_key(expected)),
        ));
    }
    Ok(())
}

const NON_FINITE_WORDS: [&str; 6] = ["nan", "inf", "infinity", "-nan", "-inf", "-infinity"];

/// Parse one raw entry such as `[50, "60", 1e2]` into a flat list of finite numbers.
pub fn parse_list(key: &str, raw: &str) -> Result<Vec<f64>> {
    let text = raw.trim();

    let has_non_finite_word = text
        .split(|c: char| matches!(c, '[' | ']' | ',' | '"' | '\'') || c.is_whitespace())
        .map(|w| w.trim_start_matches('+').to_ascii_lowercase())
        .any(|w| NON_FINITE_WORDS.contains(&w.as_str()));
    if has_non_finite_word {
        return Err(SvdgfError::validation(
            ValidationRule::NonFinite,
            format!("'{key}' contains nan or inf: {text}"),
        ));
    }

    let syntax = |detail: &str| {
        SvdgfError::validation(ValidationRule::Syntax, format!("'{key}' {detail}: {text}"))
    };

    let value: Value = serde_json::from_str(text)
        .or_else(|_| serde_json::from_str(&text.replace('\'', "\"")))
        .map_err(|_| syntax("is not a list of numbers"))?;
    let Value::Array(items) = value else {
        return Err(syntax("must be a list like [50, 60]"));
    };
    if items.is_empty() {
        return Err(syntax("is an empty list"));
    }

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let v = match item {
            Value::Number(n) => n.as_f64().ok_or_else(|| syntax("holds an unrepresentable number"))?,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| syntax(&format!("holds the non-numeric string \"{s}\"")))?,
            Value::Array(_) => return Err(syntax("must not contain nested lists")),
            _ => return Err(syntax("holds a value that is not a number")),
        };
        if !v.is_finite() {
            return Err(SvdgfError::validation(
                ValidationRule::NonFinite,
                format!("'{key}' contains a non-finite value: {text}"),
            ));
        }
        out.push(v);
    }
    Ok(out)
}

/// Validate a whole candidate. Either every entry passes or nothing is returned.
pub fn validate(
    candidate: &BTreeMap<String, String>,
    selection: &ComponentSelection,
) -> Result<InitialFitParameters> {
    check_keys(candidate.keys().map(String::as_str))?;
    let mut entries = BTreeMap::new();
    for (key, raw) in candidate {
        entries.insert(key.clone(), parse_list(key, raw)?);
    }
    let params = InitialFitParameters { entries };
    params.check_lengths(selection)?;
    Ok(params)
}

/// Result of removing an amplitude row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRemoval {
    Removed { row: usize },
    NothingToRemove,
}

/// File-backed owner of the initial fit parameters.
#[derive(Debug, Clone)]
pub struct InitialParameterStore {
    path: PathBuf,
    values: InitialFitParameters,
}

impl InitialParameterStore {
    /// Read the persisted mapping, installing defaults when it is missing or malformed.
    ///
    /// A malformed file is copied to `<name>.bak` and the deserialization error
    /// is returned as a warning.
    pub fn load(path: impl Into<PathBuf>) -> (Self, Option<SvdgfError>) {
        let path = path.into();
        let (values, warning) = match persist::read_json::<BTreeMap<String, Vec<f64>>>(&path) {
            ReadOutcome::Loaded(entries) => match InitialFitParameters::from_lists(entries) {
                Ok(values) => (Some(values), None),
                Err(err) => (
                    None,
                    Some(SvdgfError::ConfigDeserialization {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    }),
                ),
            },
            ReadOutcome::Missing => {
                log::info!("no initial fit parameters at {}; writing defaults", path.display());
                (None, None)
            }
            ReadOutcome::Malformed(err) => (None, Some(err)),
        };

        if let Some(values) = values {
            return (Self { path, values }, None);
        }

        if let Some(err) = &warning {
            log::warn!("{err}; falling back to default initial fit parameters");
            if let Some(bak) = persist::backup(&path) {
                log::warn!("previous content saved to {}", bak.display());
            }
        }
        let mut store = Self {
            path,
            values: InitialFitParameters::default(),
        };
        if let Err(err) = store.persist(InitialFitParameters::default()) {
            log::warn!("could not persist default initial fit parameters: {err}");
            return (store, warning.or(Some(err)));
        }
        (store, warning)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn values(&self) -> &InitialFitParameters {
        &self.values
    }

    /// Atomically replace the persisted mapping.
    pub fn persist(&mut self, values: InitialFitParameters) -> Result<()> {
        persist::write_json_atomic(&self.path, &values)?;
        self.values = values;
        Ok(())
    }

    /// Validate `candidate` and persist it only if every entry passes.
    pub fn apply(
        &mut self,
        candidate: &BTreeMap<String, String>,
        selection: &ComponentSelection,
    ) -> Result<()> {
        let values = validate(candidate, selection)?;
        self.persist(values)
    }

    /// Add amplitude row `amps_rSV{m}` (a copy of `amps_rSV0`) and extend
    /// every list by one default value. Returns the new row index.
    pub fn add_parameter_row(&mut self) -> Result<usize> {
        let mut entries = self.values.entries.clone();
        let row = self.values.n_amp_rows();

        for (key, list) in entries.iter_mut() {
            if key == TIME_CONSTANTS_KEY {
                list.push(DEFAULT_TIME_CONSTANT);
            } else {
                list.push(DEFAULT_AMPLITUDE);
            }
        }
        let template = entries
            .get(&amps_key(0))
            .cloned()
            .unwrap_or_else(|| vec![DEFAULT_AMPLITUDE; self.values.time_constants().len() + 1]);
        entries.insert(amps_key(row), template);

        self.persist(InitialFitParameters { entries })?;
        log::info!("added parameter row {}", amps_key(row));
        Ok(row)
    }

    /// Drop the last amplitude row and the last element of every remaining list.
    ///
    /// Lists never shrink below one element.
    pub fn remove_parameter_row(&mut self) -> Result<RowRemoval> {
        let rows = self.values.n_amp_rows();
        if rows <= 1 {
            log::info!("nothing to remove: only {} remains", amps_key(0));
            return Ok(RowRemoval::NothingToRemove);
        }

        let row = rows - 1;
        let mut entries = self.values.entries.clone();
        entries.remove(&amps_key(row));
        for list in entries.values_mut() {
            if list.len() > 1 {
                list.pop();
            }
        }

        self.persist(InitialFitParameters { entries })?;
        log::info!("removed parameter row {}", amps_key(row));
        Ok(RowRemoval::Removed { row })
    }
}
