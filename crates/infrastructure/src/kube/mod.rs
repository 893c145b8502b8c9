//! Kubernetes client plumbing.

pub mod lease;
pub mod manifests;
pub mod pod_fs;
pub mod state;
pub mod workloads;

use kube::{Client, Config};
use opr_executor_shared::ExecutorError;

/// Build a Kubernetes client from the ambient configuration (in-cluster
/// service account or local kubeconfig).
pub async fn init_client() -> Result<Client, ExecutorError> {
    let config = Config::infer().await.map_err(|e| {
        ExecutorError::GeneralUnknown(format!("Failed to infer Kubernetes config: {e}"))
    })?;

    Client::try_from(config).map_err(|e| {
        ExecutorError::GeneralUnknown(format!("Failed to create Kubernetes client: {e}"))
    })
}

/// HTTP status carried by an API-level kube error, if any.
pub fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// True when the error is an API-level 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    api_code(err) == Some(404)
}

/// True when the error is an API-level 409 conflict.
pub fn is_conflict(err: &kube::Error) -> bool {
    api_code(err) == Some(409)
}
