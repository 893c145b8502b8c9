//! Runtime lifecycle use cases and their external DTOs.

pub mod create;
pub mod list;
pub mod remove;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use opr_executor_shared::runtime::{RuntimeVersion, RUNTIME_ID_LABEL};
use serde::{Deserialize, Serialize};

pub use create::CreateRuntimeUseCase;
pub use list::ListRuntimesUseCase;
pub use remove::DeleteRuntimeUseCase;

/// Create request, as posted to `/v1/runtimes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRuntimeRequest {
    pub runtime_id: String,
    pub image: String,
    pub entrypoint: String,
    /// Bucket key of the source tarball to build from.
    pub source: Option<String>,
    /// Caller-chosen artifact key reported back in the response.
    pub destination: Option<String>,
    /// Build script; when absent no build job runs.
    pub command: Option<String>,
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Build wait in seconds.
    pub timeout: Option<u64>,
    pub cpus: Option<f64>,
    pub memory: Option<i64>,
    pub version: Option<RuntimeVersion>,
    /// Tear the runtime down again right after construction.
    pub remove: bool,
    pub output_directory: Option<String>,
}

/// One timestamped chunk of build output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputLine {
    pub timestamp: String,
    pub content: String,
}

/// Create response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuntimeResponse {
    pub output: Vec<OutputLine>,
    /// Seconds since the epoch.
    pub start_time: f64,
    /// Seconds spent on the whole create.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// External runtime shape returned by list/describe.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeDescriptor {
    pub version: String,
    pub created: f64,
    pub updated: f64,
    pub name: String,
    pub hostname: String,
    pub status: String,
    pub key: String,
    pub listening: u8,
    pub image: String,
    pub initialised: u8,
}

/// Delete outcome surfaced to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteRuntimeResponse {
    #[serde(skip)]
    pub code: u16,
    pub status: String,
}

/// Default build wait when the caller does not pass one.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;

/// Clamp a requested page size into `[1, 100]`, defaulting to 25.
pub fn clamp_limit(limit: Option<i64>) -> u32 {
    limit.unwrap_or(25).clamp(1, 100) as u32
}

/// Stringify a JSON value the way variables are passed to pods.
fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merge caller variables with the protocol-specific injections.
///
/// The `INERNAL_` misspelling in the v2 executor-hostname variable is an
/// external contract and must not be fixed.
#[allow(clippy::too_many_arguments)]
pub fn merge_variables(
    version: RuntimeVersion,
    base: &BTreeMap<String, serde_json::Value>,
    secret: &str,
    entrypoint: &str,
    runtime_hostname: &str,
    executor_hostname: &str,
    cpus: Option<f64>,
    memory: Option<i64>,
    output_directory: Option<&str>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = base
        .iter()
        .map(|(k, v)| (k.clone(), stringify(v)))
        .collect();

    merged.insert("CI".to_string(), "true".to_string());
    match version {
        RuntimeVersion::V2 => {
            merged.insert("INTERNAL_RUNTIME_KEY".to_string(), secret.to_string());
            merged.insert(
                "INTERNAL_RUNTIME_ENTRYPOINT".to_string(),
                entrypoint.to_string(),
            );
            merged.insert(
                "INERNAL_EXECUTOR_HOSTNAME".to_string(),
                executor_hostname.to_string(),
            );
        }
        RuntimeVersion::V4 | RuntimeVersion::V5 => {
            merged.insert("OPEN_RUNTIMES_SECRET".to_string(), secret.to_string());
            merged.insert(
                "OPEN_RUNTIMES_ENTRYPOINT".to_string(),
                entrypoint.to_string(),
            );
            merged.insert(
                "OPEN_RUNTIMES_HOSTNAME".to_string(),
                runtime_hostname.to_string(),
            );
            if let Some(cpus) = cpus {
                merged.insert("OPEN_RUNTIMES_CPUS".to_string(), cpus.to_string());
            }
            if let Some(memory) = memory {
                merged.insert("OPEN_RUNTIMES_MEMORY".to_string(), memory.to_string());
            }
            if let Some(dir) = output_directory {
                merged.insert("OPEN_RUNTIMES_OUTPUT_DIRECTORY".to_string(), dir.to_string());
            }
        }
    }

    merged
}

/// Project a runtime Deployment into the external descriptor shape.
/// Millisecond annotations become second floats.
pub fn descriptor_of(deployment: &Deployment) -> RuntimeDescriptor {
    use opr_executor_infrastructure::kube::state::{annotation, state_of};
    use opr_executor_shared::runtime::fields;

    let state = state_of(deployment);
    let name = deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(RUNTIME_ID_LABEL))
        .cloned()
        .unwrap_or_default();
    let image = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    RuntimeDescriptor {
        version: annotation(deployment, fields::VERSION).unwrap_or("v5").to_string(),
        created: state.created as f64 / 1000.0,
        updated: state.updated as f64 / 1000.0,
        name,
        hostname: annotation(deployment, fields::HOSTNAME).unwrap_or_default().to_string(),
        status: state.status,
        key: annotation(deployment, fields::SECRET).unwrap_or_default().to_string(),
        listening: state.listening,
        image,
        initialised: state.initialised,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_to_bounds() {
        assert_eq!(clamp_limit(None), 25);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(1000)), 100);
    }

    #[test]
    fn v2_variables_keep_the_misspelling() {
        let base = BTreeMap::from([("A".to_string(), serde_json::json!(7))]);
        let merged = merge_variables(
            RuntimeVersion::V2,
            &base,
            "sec",
            "index.php",
            "runtimehost",
            "executor-0",
            None,
            None,
            None,
        );

        assert_eq!(merged.get("A").unwrap(), "7");
        assert_eq!(merged.get("CI").unwrap(), "true");
        assert_eq!(merged.get("INTERNAL_RUNTIME_KEY").unwrap(), "sec");
        assert_eq!(merged.get("INTERNAL_RUNTIME_ENTRYPOINT").unwrap(), "index.php");
        assert_eq!(merged.get("INERNAL_EXECUTOR_HOSTNAME").unwrap(), "executor-0");
        assert!(!merged.contains_key("INTERNAL_EXECUTOR_HOSTNAME"));
        assert!(!merged.contains_key("OPEN_RUNTIMES_SECRET"));
    }

    #[test]
    fn v5_variables_use_open_runtimes_names() {
        let merged = merge_variables(
            RuntimeVersion::V5,
            &BTreeMap::new(),
            "sec",
            "main.js",
            "runtimehost",
            "executor-0",
            Some(1.5),
            Some(512),
            Some("dist"),
        );

        assert_eq!(merged.get("OPEN_RUNTIMES_SECRET").unwrap(), "sec");
        assert_eq!(merged.get("OPEN_RUNTIMES_ENTRYPOINT").unwrap(), "main.js");
        assert_eq!(merged.get("OPEN_RUNTIMES_HOSTNAME").unwrap(), "runtimehost");
        assert_eq!(merged.get("OPEN_RUNTIMES_CPUS").unwrap(), "1.5");
        assert_eq!(merged.get("OPEN_RUNTIMES_MEMORY").unwrap(), "512");
        assert_eq!(merged.get("OPEN_RUNTIMES_OUTPUT_DIRECTORY").unwrap(), "dist");
    }

    #[test]
    fn values_are_stringified() {
        let base = BTreeMap::from([
            ("BOOL".to_string(), serde_json::json!(true)),
            ("TEXT".to_string(), serde_json::json!("plain")),
        ]);
        let merged = merge_variables(
            RuntimeVersion::V5,
            &base,
            "s",
            "",
            "h",
            "e",
            None,
            None,
            None,
        );
        assert_eq!(merged.get("BOOL").unwrap(), "true");
        assert_eq!(merged.get("TEXT").unwrap(), "plain");
    }

    #[test]
    fn descriptor_projects_annotations() {
        let deployment: Deployment = serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": "dep-r1",
                "labels": {"role": "runtime", "runtime-id": "r1"},
                "annotations": {
                    "appwrite.io/version": "v5",
                    "appwrite.io/secret": "deadbeef",
                    "appwrite.io/hostname": "cafe",
                    "appwrite.io/status": "Up 3s",
                    "appwrite.io/initialised": "1",
                    "appwrite.io/listening": "0",
                    "appwrite.io/created": "1700000000000",
                    "appwrite.io/updated": "1700000500000"
                }
            },
            "spec": {
                "selector": {"matchLabels": {"runtime-id": "r1"}},
                "template": {"spec": {"containers": [{"name": "runtime-container", "image": "img:v5"}]}}
            }
        }))
        .unwrap();

        let descriptor = descriptor_of(&deployment);
        assert_eq!(descriptor.name, "r1");
        assert_eq!(descriptor.key, "deadbeef");
        assert_eq!(descriptor.image, "img:v5");
        assert_eq!(descriptor.created, 1_700_000_000.0);
        assert_eq!(descriptor.updated, 1_700_000_500.0);
        assert_eq!(descriptor.initialised, 1);
        assert_eq!(descriptor.listening, 0);
    }
}
