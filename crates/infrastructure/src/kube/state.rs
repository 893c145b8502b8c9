//! Runtime state accessor.
//!
//! Lifecycle state lives in Deployment annotations; this module reads and
//! patches those fields and provides the readiness waits built on top of
//! them. Updates are JSON-patch `replace` lists, last-writer-wins; every
//! field is idempotent (monotonic timestamps, monotone bits) so concurrent
//! patches are safe without check-and-set.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use opr_executor_shared::runtime::{
    deployment_name, RuntimeState, ANNOTATION_PREFIX, RUNTIME_PORT,
};
use opr_executor_shared::ExecutorError;
use tracing::debug;

use super::is_not_found;

/// JSON-pointer path of an annotation field, with `/` escaped per RFC 6901.
pub fn annotation_path(field: &str) -> String {
    let full = format!("{ANNOTATION_PREFIX}{field}");
    format!(
        "/metadata/annotations/{}",
        full.replace('~', "~0").replace('/', "~1")
    )
}

/// Build a JSON-patch replacing the given annotation fields.
pub fn annotation_patch(fields: &[(&str, String)]) -> json_patch::Patch {
    let ops: Vec<serde_json::Value> = fields
        .iter()
        .map(|(field, value)| {
            serde_json::json!({
                "op": "replace",
                "path": annotation_path(field),
                "value": value,
            })
        })
        .collect();
    serde_json::from_value(serde_json::Value::Array(ops)).expect("replace ops are a valid patch")
}

/// Read one annotation off a Deployment.
pub fn annotation<'a>(deployment: &'a Deployment, field: &str) -> Option<&'a str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(&format!("{ANNOTATION_PREFIX}{field}")))
        .map(String::as_str)
}

/// Derive the lifecycle state from a Deployment's annotations.
pub fn state_of(deployment: &Deployment) -> RuntimeState {
    use opr_executor_shared::runtime::fields;

    let parse_i64 = |field: &str| {
        annotation(deployment, field)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
    };
    let parse_bit = |field: &str| {
        annotation(deployment, field)
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(0)
    };

    RuntimeState {
        status: annotation(deployment, fields::STATUS).unwrap_or_default().to_string(),
        initialised: parse_bit(fields::INITIALISED),
        listening: parse_bit(fields::LISTENING),
        created: parse_i64(fields::CREATED),
        updated: parse_i64(fields::UPDATED),
    }
}

/// Accessor over the runtime Deployments of one namespace.
#[derive(Clone)]
pub struct RuntimeStateAccessor {
    client: Client,
    namespace: String,
}

impl RuntimeStateAccessor {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Read a runtime's Deployment; `None` when absent.
    pub async fn get(&self, runtime_id: &str) -> Result<Option<Deployment>, ExecutorError> {
        match self.deployments().get(&deployment_name(runtime_id)).await {
            Ok(deployment) => Ok(Some(deployment)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(ExecutorError::GeneralUnknown(format!(
                "Failed to read runtime deployment: {e}"
            ))),
        }
    }

    /// True iff the runtime's Deployment exists.
    pub async fn exists(&self, runtime_id: &str) -> Result<bool, ExecutorError> {
        Ok(self.get(runtime_id).await?.is_some())
    }

    /// Lifecycle state of a runtime; `None` when the Deployment is absent.
    pub async fn state(&self, runtime_id: &str) -> Result<Option<RuntimeState>, ExecutorError> {
        Ok(self.get(runtime_id).await?.map(|d| state_of(&d)))
    }

    /// JSON-patch the given annotation fields. Atomic per call; last write
    /// wins under concurrency.
    pub async fn update(
        &self,
        runtime_id: &str,
        fields: &[(&str, String)],
    ) -> Result<(), ExecutorError> {
        let patch = annotation_patch(fields);
        self.deployments()
            .patch(
                &deployment_name(runtime_id),
                &PatchParams::default(),
                &Patch::Json::<()>(patch),
            )
            .await
            .map_err(|e| {
                ExecutorError::GeneralUnknown(format!("Failed to patch runtime annotations: {e}"))
            })?;
        Ok(())
    }

    /// Poll every 500 ms until the runtime's status leaves `pending`.
    pub async fn wait_ready(
        &self,
        runtime_id: &str,
        timeout: Duration,
    ) -> Result<RuntimeState, ExecutorError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Ok(Some(state)) = self.state(runtime_id).await {
                if !state.is_pending() {
                    return Ok(state);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutorError::RuntimeTimeout(
                    "Runtime was not ready in time".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Poll the in-pod server until it accepts a TCP connection on port 3000.
/// Any HTTP-level response, including 4xx, counts as listening.
pub async fn wait_listening(http: &reqwest::Client, pod_ip: &str, timeout: Duration) -> bool {
    let url = format!("http://{pod_ip}:{RUNTIME_PORT}/");
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match http
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(_) => return true,
            Err(e) => debug!(pod_ip, "runtime not listening yet: {e}"),
        }

        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opr_executor_shared::runtime::fields;

    fn deployment_with_annotations() -> Deployment {
        serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": "dep-r1",
                "annotations": {
                    "appwrite.io/status": "Up 12s",
                    "appwrite.io/initialised": "1",
                    "appwrite.io/listening": "0",
                    "appwrite.io/created": "1717243200000",
                    "appwrite.io/updated": "1717243212000",
                    "appwrite.io/secret": "deadbeef"
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn annotation_path_escapes_slash() {
        assert_eq!(
            annotation_path("status"),
            "/metadata/annotations/appwrite.io~1status"
        );
        assert_eq!(
            annotation_path("last-execution-time"),
            "/metadata/annotations/appwrite.io~1last-execution-time"
        );
    }

    #[test]
    fn patch_is_a_replace_list() {
        let patch = annotation_patch(&[
            ("updated", "123".to_string()),
            ("listening", "1".to_string()),
        ]);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value[0]["op"], "replace");
        assert_eq!(value[0]["path"], "/metadata/annotations/appwrite.io~1updated");
        assert_eq!(value[0]["value"], "123");
        assert_eq!(value[1]["path"], "/metadata/annotations/appwrite.io~1listening");
    }

    #[test]
    fn state_is_derived_from_annotations() {
        let state = state_of(&deployment_with_annotations());
        assert_eq!(state.status, "Up 12s");
        assert_eq!(state.initialised, 1);
        assert_eq!(state.listening, 0);
        assert_eq!(state.created, 1_717_243_200_000);
        assert_eq!(state.updated, 1_717_243_212_000);
        assert!(!state.is_pending());
    }

    #[test]
    fn missing_annotations_default_to_zero() {
        let state = state_of(&Deployment::default());
        assert_eq!(state.initialised, 0);
        assert_eq!(state.listening, 0);
        assert_eq!(state.status, "");
    }

    #[test]
    fn reads_single_annotation() {
        let deployment = deployment_with_annotations();
        assert_eq!(annotation(&deployment, fields::SECRET), Some("deadbeef"));
        assert_eq!(annotation(&deployment, "missing"), None);
    }
}
