//! User-defined target models.
//!
//! A target model assigns each component a summand expression. The persisted
//! mapping is keyed `summand_component{i}`; an empty string means the
//! component contributes nothing.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::persist::{self, ReadOutcome};
use crate::domain::{ComponentSelection, ModelDescription};
use crate::error::{Result, SvdgfError};
use crate::models::expr::Expression;

/// Key of component `i` in the persisted mapping.
pub fn summand_key(component: usize) -> String {
    format!("summand_component{component}")
}

fn parse_summand_key(key: &str) -> Option<usize> {
    let digits = key.strip_prefix("summand_component")?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    digits.parse().ok()
}

/// Component index → raw summand expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetModelSpec {
    summands: BTreeMap<usize, String>,
}

impl TargetModelSpec {
    /// Read the mapping stored at `path`.
    ///
    /// Unlike the parameter store there is no default here: a missing,
    /// unreadable or malformed file is a parse error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match persist::read_json::<BTreeMap<String, serde_json::Value>>(path) {
            ReadOutcome::Loaded(raw) => raw,
            ReadOutcome::Missing => {
                return Err(SvdgfError::parse(format!(
                    "target model file {} does not exist",
                    path.display()
                )));
            }
            ReadOutcome::Malformed(err) => {
                return Err(SvdgfError::parse(format!(
                    "target model file is not a mapping of summands ({err})"
                )));
            }
        };

        let mut summands = BTreeMap::new();
        for (key, value) in raw {
            let component = parse_summand_key(&key).ok_or_else(|| {
                SvdgfError::parse(format!(
                    "unexpected key '{key}' in {} (expected summand_component<i>)",
                    path.display()
                ))
            })?;
            let serde_json::Value::String(expr) = value else {
                return Err(SvdgfError::parse(format!("'{key}' must be a string expression")));
            };
            summands.insert(component, expr);
        }
        Ok(Self { summands })
    }

    /// Atomically write the mapping to `path`.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let raw: BTreeMap<String, &str> = self
            .summands
            .iter()
            .map(|(c, e)| (summand_key(*c), e.as_str()))
            .collect();
        persist::write_json_atomic(path, &raw)
    }

    pub fn summand(&self, component: usize) -> Result<&str> {
        self.summands
            .get(&component)
            .map(String::as_str)
            .ok_or(SvdgfError::MissingComponent { component })
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.summands.iter().map(|(c, e)| (*c, e.as_str()))
    }

    /// Replace one summand after checking that it parses.
    pub fn set_summand(&mut self, component: usize, expression: &str) -> Result<()> {
        Expression::parse(expression, component)?;
        self.summands.insert(component, expression.trim().to_string());
        Ok(())
    }

    /// Parse the summands of every selected component, in selection order.
    ///
    /// Every referenced decay constant must belong to a selected component.
    pub fn compile(&self, selection: &ComponentSelection) -> Result<TargetModel> {
        let mut expressions = Vec::with_capacity(selection.len());
        for component in selection.iter() {
            let raw = self.summand(component)?;
            let expr = Expression::parse(raw, component)?;
            expr.bind(selection)?;
            expressions.push(expr);
        }
        log::debug!(
            "target model: {}",
            expressions
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(" + ")
        );
        Ok(TargetModel {
            selection: selection.clone(),
            expressions,
        })
    }
}

/// Parsed summands for one component selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetModel {
    selection: ComponentSelection,
    expressions: Vec<Expression>,
}

impl TargetModel {
    pub fn selection(&self) -> &ComponentSelection {
        &self.selection
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    pub fn describe(&self) -> ModelDescription {
        ModelDescription::Target {
            summands: self
                .expressions
                .iter()
                .map(|e| (e.component(), e.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::persist::test_support::scratch_dir;

    #[test]
    fn missing_file_is_a_parse_error() {
        let dir = scratch_dir("target-missing");
        let err = TargetModelSpec::load(&dir.join("none.json")).unwrap_err();
        assert!(matches!(err, SvdgfError::Parse { .. }));
    }

    #[test]
    fn non_mapping_is_a_parse_error() {
        let dir = scratch_dir("target-list");
        let path = dir.join("t.json");
        std::fs::write(&path, "[\"k0\"]").unwrap();
        assert!(matches!(TargetModelSpec::load(&path), Err(SvdgfError::Parse { .. })));
    }

    #[test]
    fn missing_component_is_reported() {
        let mut spec = TargetModelSpec::default();
        spec.set_summand(0, "exp(-t/k0)").unwrap();
        let sel = ComponentSelection::new([0, 1]).unwrap();
        let err = spec.compile(&sel).unwrap_err();
        assert!(matches!(err, SvdgfError::MissingComponent { component: 1 }));
    }

    #[test]
    fn persisted_summands_load_back() {
        let dir = scratch_dir("target-roundtrip");
        let path = dir.join("t.json");
        let mut spec = TargetModelSpec::default();
        spec.set_summand(0, "exp(-t/k0)").unwrap();
        spec.set_summand(1, "").unwrap();
        spec.persist(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("summand_component1"));

        let back = TargetModelSpec::load(&path).unwrap();
        assert_eq!(back, spec);
        let model = back.compile(&ComponentSelection::new([0, 1]).unwrap()).unwrap();
        assert!(model.expressions()[1].is_zero());
    }

    #[test]
    fn invalid_summand_is_not_stored() {
        let mut spec = TargetModelSpec::default();
        assert!(spec.set_summand(2, "os.system('x')").is_err());
        assert!(spec.summand(2).is_err());
    }

    #[test]
    fn legacy_single_quoted_file_is_read() {
        let dir = scratch_dir("target-legacy");
        let path = dir.join("t.json");
        std::fs::write(&path, "{'summand_component0': 'k0*exp(-t/k0)'}").unwrap();
        let spec = TargetModelSpec::load(&path).unwrap();
        assert_eq!(spec.summand(0).unwrap(), "k0*exp(-t/k0)");
    }
}
