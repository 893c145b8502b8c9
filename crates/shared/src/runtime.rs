//! Runtime identity and annotation model.
//!
//! A runtime is materialized as a `Deployment`/`Service` pair; all of its
//! lifecycle state is carried in Deployment annotations under the
//! `appwrite.io/` prefix. The annotation names are an external contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ExecutorError;

/// Annotation prefix every lifecycle field is stored under.
pub const ANNOTATION_PREFIX: &str = "appwrite.io/";

/// Label identifying runtime Deployments and their pods.
pub const ROLE_LABEL: &str = "role";
pub const ROLE_RUNTIME: &str = "runtime";
pub const ROLE_BUILD: &str = "build";
pub const RUNTIME_ID_LABEL: &str = "runtime-id";

/// Annotation field names (stored as `appwrite.io/{field}`).
pub mod fields {
    pub const VERSION: &str = "version";
    pub const SECRET: &str = "secret";
    pub const HOSTNAME: &str = "hostname";
    pub const CREATED: &str = "created";
    pub const UPDATED: &str = "updated";
    pub const STATUS: &str = "status";
    pub const INITIALISED: &str = "initialised";
    pub const LISTENING: &str = "listening";
    pub const LAST_EXECUTION_TIME: &str = "last-execution-time";
    pub const ARTIFACT_PATH: &str = "artifact-path";
}

/// The `pending` status value stamped at create time.
pub const STATUS_PENDING: &str = "pending";

/// Port the in-pod server listens on.
pub const RUNTIME_PORT: u16 = 3000;

/// Runtime protocol version. Governs env variable names, log locations and
/// the authentication header shape of proxied calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeVersion {
    #[serde(rename = "v2")]
    V2,
    #[serde(rename = "v4")]
    V4,
    #[serde(rename = "v5")]
    V5,
}

impl RuntimeVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V4 => "v4",
            Self::V5 => "v5",
        }
    }
}

impl Default for RuntimeVersion {
    fn default() -> Self {
        Self::V5
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeVersion {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v2" => Ok(Self::V2),
            "v4" => Ok(Self::V4),
            "v5" => Ok(Self::V5),
            other => Err(ExecutorError::ExecutionBadRequest(format!(
                "Invalid runtime version: {other}"
            ))),
        }
    }
}

/// Deployment name for a runtime id.
pub fn deployment_name(runtime_id: &str) -> String {
    format!("dep-{runtime_id}")
}

/// Service name for a runtime id.
pub fn service_name(runtime_id: &str) -> String {
    format!("svc-{runtime_id}")
}

/// Lifecycle state derived from annotations, as read by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeState {
    pub status: String,
    pub initialised: u8,
    pub listening: u8,
    pub created: i64,
    pub updated: i64,
}

impl RuntimeState {
    pub fn is_pending(&self) -> bool {
        self.status == STATUS_PENDING
    }
}

/// Current wall clock in milliseconds, the unit every annotation timestamp uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 32 hex characters from 16 random bytes; used for per-runtime secrets and
/// opaque hostnames.
pub fn random_hex32() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 8 hex characters used to suffix ephemeral job names.
pub fn random_hex8() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names() {
        assert_eq!(deployment_name("fn-1"), "dep-fn-1");
        assert_eq!(service_name("fn-1"), "svc-fn-1");
    }

    #[test]
    fn version_round_trip() {
        for v in ["v2", "v4", "v5"] {
            assert_eq!(v.parse::<RuntimeVersion>().unwrap().as_str(), v);
        }
        assert!("v3".parse::<RuntimeVersion>().is_err());
    }

    #[test]
    fn version_serde_lowercase() {
        assert_eq!(serde_json::to_string(&RuntimeVersion::V5).unwrap(), "\"v5\"");
        let v: RuntimeVersion = serde_json::from_str("\"v2\"").unwrap();
        assert_eq!(v, RuntimeVersion::V2);
    }

    #[test]
    fn random_tokens_have_expected_shape() {
        let secret = random_hex32();
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(random_hex8().len(), 8);
        assert_ne!(random_hex32(), random_hex32());
    }

    #[test]
    fn pending_state() {
        let state = RuntimeState {
            status: STATUS_PENDING.to_string(),
            initialised: 0,
            listening: 0,
            created: 0,
            updated: 0,
        };
        assert!(state.is_pending());
    }
}
