//! Where persisted configuration lives.

use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "SVDGF_CONFIG_DIR";

/// Directory used when neither a flag nor the environment names one.
pub const DEFAULT_CONFIG_DIR: &str = "configFiles";

pub const INITIAL_PARAMS_FILE: &str = "initial_fit_parameter_values.json";
pub const TARGET_MODEL_FILE: &str = "target_model_summands.json";

/// Locations of the persisted configuration files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `--config-dir`, else `$SVDGF_CONFIG_DIR` (a `.env` file is honoured), else `./configFiles`.
    pub fn resolve(flag: Option<&Path>) -> Self {
        if let Some(dir) = flag {
            return Self::new(dir);
        }
        dotenvy::dotenv().ok();
        Self::from_env_value(std::env::var(CONFIG_DIR_ENV).ok())
    }

    fn from_env_value(value: Option<String>) -> Self {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(dir) => Self::new(dir),
            None => Self::new(DEFAULT_CONFIG_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn initial_params(&self) -> PathBuf {
        self.dir.join(INITIAL_PARAMS_FILE)
    }

    pub fn target_model(&self) -> PathBuf {
        self.dir.join(TARGET_MODEL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_environment() {
        let paths = ConfigPaths::resolve(Some(Path::new("/tmp/svdgf-flag")));
        assert_eq!(paths.dir(), Path::new("/tmp/svdgf-flag"));
        assert!(paths.initial_params().ends_with(INITIAL_PARAMS_FILE));
    }

    #[test]
    fn blank_environment_value_uses_default() {
        assert_eq!(ConfigPaths::from_env_value(Some("  ".into())).dir(), Path::new(DEFAULT_CONFIG_DIR));
        assert_eq!(ConfigPaths::from_env_value(Some("cfg".into())).dir(), Path::new("cfg"));
        assert_eq!(ConfigPaths::from_env_value(None).dir(), Path::new(DEFAULT_CONFIG_DIR));
    }
}
