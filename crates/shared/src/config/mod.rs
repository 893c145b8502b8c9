//! Configuration for the executor.
//!
//! All configuration is loaded once at startup from environment variables
//! (optionally seeded from a `.env` file) and passed down as an immutable
//! DTO. Missing required variables fail fast with a `ConfigError`; there are
//! no silent fallbacks for required values.
//!
//! # Required variables
//!
//! - `OPR_EXECUTOR_SECRET`: bearer secret shared with callers
//! - `S3_ENDPOINT`, `S3_BUCKET`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`
//!
//! # Optional variables
//!
//! - `KUBERNETES_NAMESPACE` (default `default`)
//! - `S3_REGION` (default `us-east-1`)
//! - `PORT` (default `3000`)
//! - `OPR_EXECUTOR_MAINTENANCE_INTERVAL` (seconds, default `60`)
//! - `OPR_EXECUTOR_INACTIVE_THRESHOLD` (seconds, default `300`)
//! - `HOSTNAME` (defaults to the OS hostname)

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{ExecutorConfig, MaintenanceConfig, ServerConfig, StorageConfig};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::validate_config;
