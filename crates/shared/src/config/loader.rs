//! Configuration loader.
//!
//! Loads configuration from an optional `.env` file followed by environment
//! variables, then validates the result.

use std::path::Path;

use super::dto::ExecutorConfig;
use super::error::{ConfigError, Result};
use super::validator::validate_config;

/// Loads executor configuration at startup.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    env_file_path: Option<std::path::PathBuf>,
}

impl ConfigLoader {
    /// Create a loader; when `env_file_path` is set the file is loaded into
    /// the process environment before reading variables.
    pub fn new(env_file_path: Option<std::path::PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the executor configuration.
    pub fn load(&self) -> Result<ExecutorConfig> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = ExecutorConfig::from_env()?;
        validate_config(&config)?;

        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_file_fails() {
        let loader = ConfigLoader::new(Some("/nonexistent/.env".into()));
        assert!(matches!(loader.load(), Err(ConfigError::EnvFileLoad { .. })));
    }
}
