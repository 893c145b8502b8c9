//! Configuration validation.

use super::dto::ExecutorConfig;
use super::error::{ConfigError, Result};

/// Validate a loaded configuration, failing fast on values that would only
/// surface as confusing runtime errors later.
pub fn validate_config(config: &ExecutorConfig) -> Result<()> {
    if config.server.executor_secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "OPR_EXECUTOR_SECRET must not be empty".to_string(),
        ));
    }

    if config.kubernetes.namespace.trim().is_empty() {
        return Err(ConfigError::Validation(
            "KUBERNETES_NAMESPACE must not be empty".to_string(),
        ));
    }

    if config.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Validation(
            "S3_BUCKET must not be empty".to_string(),
        ));
    }

    if !config.storage.endpoint.starts_with("http://")
        && !config.storage.endpoint.starts_with("https://")
    {
        return Err(ConfigError::Validation(format!(
            "S3_ENDPOINT must be an http(s) URL, got: {}",
            config.storage.endpoint
        )));
    }

    if config.maintenance.interval.is_zero() {
        return Err(ConfigError::Validation(
            "OPR_EXECUTOR_MAINTENANCE_INTERVAL must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dto::ExecutorConfig;

    fn base_config() -> ExecutorConfig {
        ExecutorConfig::from_env_with(|key| match key {
            "OPR_EXECUTOR_SECRET" => Some("executor-secret".to_string()),
            "S3_ENDPOINT" => Some("http://minio:9000".to_string()),
            "S3_BUCKET" => Some("artifacts".to_string()),
            "S3_ACCESS_KEY_ID" => Some("access".to_string()),
            "S3_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            "HOSTNAME" => Some("executor-0".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn empty_secret_rejected() {
        let mut config = base_config();
        config.server.executor_secret = "  ".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(msg)) if msg.contains("OPR_EXECUTOR_SECRET")
        ));
    }

    #[test]
    fn bare_endpoint_rejected() {
        let mut config = base_config();
        config.storage.endpoint = "minio:9000".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = base_config();
        config.maintenance.interval = std::time::Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }
}
