//! Runtime deletion. Best-effort: only the Deployment delete can fail the
//! call; the Service and the storage cleanup Job are fire-and-forget.

use opr_executor_infrastructure::kube::manifests;
use opr_executor_infrastructure::kube::workloads::DeleteOutcome;
use opr_executor_shared::runtime::{self, deployment_name, service_name};
use opr_executor_shared::ExecutorError;
use tracing::{info, warn};

use super::DeleteRuntimeResponse;
use crate::Adapters;

#[derive(Clone)]
pub struct DeleteRuntimeUseCase {
    adapters: Adapters,
}

impl DeleteRuntimeUseCase {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    pub async fn execute(&self, runtime_id: &str) -> Result<DeleteRuntimeResponse, ExecutorError> {
        let outcome = self
            .adapters
            .workloads
            .delete_deployment(&deployment_name(runtime_id))
            .await?;

        self.adapters
            .workloads
            .delete_service_best_effort(&service_name(runtime_id))
            .await;

        let cleanup_name = format!("delete-{runtime_id}-{}", runtime::random_hex8());
        let cleanup = manifests::cleanup_job(
            runtime_id,
            &cleanup_name,
            &self.adapters.config.storage,
        );
        if let Err(e) = self.adapters.workloads.create_job(&cleanup).await {
            warn!(runtime_id, "failed to enqueue storage cleanup job: {e}");
        }

        let response = match outcome {
            DeleteOutcome::Deleted => DeleteRuntimeResponse {
                code: 200,
                status: "Runtime deleted".to_string(),
            },
            DeleteOutcome::InProgress => DeleteRuntimeResponse {
                code: 200,
                status: "Runtime deletion already in progress".to_string(),
            },
            DeleteOutcome::NotFound => DeleteRuntimeResponse {
                code: 404,
                status: "Runtime not found or already deleted".to_string(),
            },
        };

        info!(runtime_id, status = %response.status, "runtime delete handled");
        Ok(response)
    }
}
