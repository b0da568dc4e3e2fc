//! Error types.
//!
//! `SvdgfError` is the engine-level taxonomy; `AppError` is what the binary
//! prints before exiting. Every `SvdgfError` maps onto an exit code:
//!
//! - `2`: bad input or configuration (selection, bounds, parameters, models)
//! - `3`: not enough data to work with
//! - `4`: computation failure (optimizer, numerics, I/O)

use thiserror::Error;

use crate::domain::FitMethod;

/// Errors raised by the SVDGF engine and its configuration stores.
#[derive(Debug, Clone, Error)]
pub enum SvdgfError {
    /// A persisted configuration file could not be deserialized.
    ///
    /// Callers treat this as a warning: the store falls back to defaults.
    #[error("could not deserialize '{path}': {message}")]
    ConfigDeserialization { path: String, message: String },

    /// A component index is out of range, duplicated, or nothing was selected.
    #[error("invalid component selection: {0}")]
    InvalidSelection(String),

    /// Matrix bounds lie outside the data matrix or are inverted.
    #[error("invalid matrix bounds: {0}")]
    InvalidBounds(String),

    /// Initial fit parameters violate a shape, type or value rule.
    #[error("invalid initial fit parameters ({rule}): {message}")]
    Validation { rule: ValidationRule, message: String },

    /// A target-model file or expression could not be parsed.
    #[error("target model error{}: {message}", component_suffix(.component, .expression))]
    Parse {
        component: Option<usize>,
        expression: Option<String>,
        message: String,
    },

    /// The target-model mapping has no summand for a selected component.
    #[error("target model has no `summand_component{component}` entry")]
    MissingComponent { component: usize },

    /// The optimizer failed or produced an unusable result.
    #[error("fit failed (method={method}, parameters={n_params}): {message}")]
    Fit {
        method: FitMethod,
        n_params: usize,
        message: String,
    },

    /// A fit method name is not one of the supported optimizers.
    #[error("unknown fit method '{0}'")]
    UnknownMethod(String),

    /// The data matrix is missing, malformed, or too small.
    #[error("data error: {0}")]
    Data(String),

    /// A file could not be read or written.
    #[error("{0}")]
    Io(String),
}

/// Which initial-parameter rule rejected a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    /// An entry is not a flat list of numbers.
    Syntax,
    /// A number is NaN or infinite.
    NonFinite,
    /// A list is too short for the selected components.
    Length,
    /// A key is unknown, or a required key is missing.
    Keys,
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ValidationRule::Syntax => "syntax",
            ValidationRule::NonFinite => "non-finite value",
            ValidationRule::Length => "list length",
            ValidationRule::Keys => "keys",
        };
        f.write_str(label)
    }
}

fn component_suffix(component: &Option<usize>, expression: &Option<String>) -> String {
    match (component, expression) {
        (Some(c), Some(e)) => format!(" in summand_component{c} ('{e}')"),
        (Some(c), None) => format!(" in summand_component{c}"),
        (None, Some(e)) => format!(" in '{e}'"),
        (None, None) => String::new(),
    }
}

impl SvdgfError {
    pub fn validation(rule: ValidationRule, message: impl Into<String>) -> Self {
        SvdgfError::Validation {
            rule,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        SvdgfError::Parse {
            component: None,
            expression: None,
            message: message.into(),
        }
    }

    pub fn fit(method: FitMethod, n_params: usize, message: impl Into<String>) -> Self {
        SvdgfError::Fit {
            method,
            n_params,
            message: message.into(),
        }
    }

    /// Attach the offending component and raw expression to a parse error.
    pub fn in_summand(self, component: usize, expression: &str) -> Self {
        match self {
            SvdgfError::Parse { message, .. } => SvdgfError::Parse {
                component: Some(component),
                expression: Some(expression.to_string()),
                message,
            },
            other => other,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            SvdgfError::ConfigDeserialization { .. }
            | SvdgfError::InvalidSelection(_)
            | SvdgfError::InvalidBounds(_)
            | SvdgfError::Validation { .. }
            | SvdgfError::Parse { .. }
            | SvdgfError::MissingComponent { .. }
            | SvdgfError::UnknownMethod(_) => 2,
            SvdgfError::Data(_) => 3,
            SvdgfError::Fit { .. } | SvdgfError::Io(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, SvdgfError>;

/// Error printed by the `svdgf` binary.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<SvdgfError> for AppError {
    fn from(err: SvdgfError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(SvdgfError::InvalidSelection("x".into()).exit_code(), 2);
        assert_eq!(SvdgfError::Data("x".into()).exit_code(), 3);
        assert_eq!(SvdgfError::fit(FitMethod::Nelder, 2, "x").exit_code(), 4);
    }

    #[test]
    fn parse_error_names_component_and_expression() {
        let err = SvdgfError::parse("unknown symbol 'q'").in_summand(1, "q*t");
        let text = err.to_string();
        assert!(text.contains("summand_component1"), "{text}");
        assert!(text.contains("'q*t'"), "{text}");
    }
}
