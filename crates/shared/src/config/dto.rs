//! Configuration DTOs built from environment variables.

use std::time::Duration;

use super::error::{ConfigError, Result};

/// Top-level executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub server: ServerConfig,
    pub kubernetes: KubernetesConfig,
    pub storage: StorageConfig,
    pub maintenance: MaintenanceConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the API binds to.
    pub port: u16,
    /// Shared bearer secret callers must present.
    pub executor_secret: String,
    /// Executor hostname, forwarded to runtimes and used for lease identity.
    pub hostname: String,
}

/// Kubernetes settings.
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    /// Namespace all runtime resources live in.
    pub namespace: String,
}

/// Object store settings for build artifacts.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

/// Background maintenance (reaper) settings.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Sleep between reaper cycles.
    pub interval: Duration,
    /// Idle duration after which a warm runtime is scaled to zero.
    pub inactive_threshold: Duration,
}

impl ExecutorConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source. Used by
    /// tests to inject values without touching the process environment.
    pub fn from_env_with<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &str| {
            get(var).ok_or_else(|| ConfigError::MissingRequired {
                var: var.to_string(),
            })
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                var: "PORT".to_string(),
                value: raw,
            })?,
            None => 3000,
        };

        let parse_secs = |var: &str, default: u64| -> Result<Duration> {
            match get(var) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidValue {
                        var: var.to_string(),
                        value: raw,
                    }),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let hostname = get("HOSTNAME")
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "executor".to_string());

        Ok(Self {
            server: ServerConfig {
                port,
                executor_secret: require("OPR_EXECUTOR_SECRET")?,
                hostname,
            },
            kubernetes: KubernetesConfig {
                namespace: get("KUBERNETES_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            },
            storage: StorageConfig {
                endpoint: require("S3_ENDPOINT")?,
                bucket: require("S3_BUCKET")?,
                access_key_id: require("S3_ACCESS_KEY_ID")?,
                secret_access_key: require("S3_SECRET_ACCESS_KEY")?,
                region: get("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            },
            maintenance: MaintenanceConfig {
                interval: parse_secs("OPR_EXECUTOR_MAINTENANCE_INTERVAL", 60)?,
                inactive_threshold: parse_secs("OPR_EXECUTOR_INACTIVE_THRESHOLD", 300)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(key: &str) -> Option<String> {
        match key {
            "OPR_EXECUTOR_SECRET" => Some("executor-secret".to_string()),
            "S3_ENDPOINT" => Some("http://minio:9000".to_string()),
            "S3_BUCKET" => Some("artifacts".to_string()),
            "S3_ACCESS_KEY_ID" => Some("access".to_string()),
            "S3_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            "HOSTNAME" => Some("executor-0".to_string()),
            _ => None,
        }
    }

    #[test]
    fn parses_defaults() {
        let config = ExecutorConfig::from_env_with(minimal).expect("config");

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.hostname, "executor-0");
        assert_eq!(config.kubernetes.namespace, "default");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.maintenance.interval, Duration::from_secs(60));
        assert_eq!(config.maintenance.inactive_threshold, Duration::from_secs(300));
    }

    #[test]
    fn parses_overrides() {
        let config = ExecutorConfig::from_env_with(|key| match key {
            "PORT" => Some("8090".to_string()),
            "KUBERNETES_NAMESPACE" => Some("functions".to_string()),
            "S3_REGION" => Some("eu-west-1".to_string()),
            "OPR_EXECUTOR_MAINTENANCE_INTERVAL" => Some("10".to_string()),
            "OPR_EXECUTOR_INACTIVE_THRESHOLD" => Some("120".to_string()),
            other => minimal(other),
        })
        .expect("config");

        assert_eq!(config.server.port, 8090);
        assert_eq!(config.kubernetes.namespace, "functions");
        assert_eq!(config.storage.region, "eu-west-1");
        assert_eq!(config.maintenance.interval, Duration::from_secs(10));
        assert_eq!(config.maintenance.inactive_threshold, Duration::from_secs(120));
    }

    #[test]
    fn missing_secret_fails() {
        let result = ExecutorConfig::from_env_with(|key| match key {
            "OPR_EXECUTOR_SECRET" => None,
            other => minimal(other),
        });
        assert!(matches!(result, Err(ConfigError::MissingRequired { var }) if var == "OPR_EXECUTOR_SECRET"));
    }

    #[test]
    fn bad_port_fails() {
        let result = ExecutorConfig::from_env_with(|key| match key {
            "PORT" => Some("not-a-port".to_string()),
            other => minimal(other),
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { var, .. }) if var == "PORT"));
    }

    #[test]
    fn bad_interval_fails() {
        let result = ExecutorConfig::from_env_with(|key| match key {
            "OPR_EXECUTOR_MAINTENANCE_INTERVAL" => Some("soon".to_string()),
            other => minimal(other),
        });
        assert!(result.is_err());
    }
}
