//! Ad-hoc command execution inside a runtime container.

use std::time::Duration;

use opr_executor_infrastructure::kube::manifests::RUNTIME_CONTAINER;
use opr_executor_shared::runtime::RUNTIME_ID_LABEL;
use opr_executor_shared::ExecutorError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Adapters;

/// Default command wait in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandRequest {
    pub command: String,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub output: String,
}

#[derive(Clone)]
pub struct CommandUseCase {
    adapters: Adapters,
}

impl CommandUseCase {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    pub async fn execute(
        &self,
        runtime_id: &str,
        request: CommandRequest,
    ) -> Result<CommandResponse, ExecutorError> {
        if request.command.is_empty() {
            return Err(ExecutorError::ExecutionBadRequest(
                "Missing required field: command".to_string(),
            ));
        }

        let pod = self
            .adapters
            .pod_fs
            .first_pod(&format!("{RUNTIME_ID_LABEL}={runtime_id}"))
            .await?
            .ok_or_else(|| {
                ExecutorError::RuntimeNotFound(format!("Runtime pod not found: {runtime_id}"))
            })?;
        let pod_name = pod.metadata.name.unwrap_or_default();

        let timeout = Duration::from_secs(request.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS));
        info!(runtime_id, pod = %pod_name, "running command in runtime");

        let exec_args = ["sh", "-c", request.command.as_str()];
        let run = self
            .adapters
            .pod_fs
            .exec_collect(&pod_name, RUNTIME_CONTAINER, &exec_args);

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => Ok(CommandResponse { output }),
            Ok(Err(e)) => Err(ExecutorError::CommandFailed(format!(
                "Command failed: {e}"
            ))),
            Err(_) => Err(ExecutorError::CommandTimeout("Command timed out".to_string())),
        }
    }
}
