//! Typed cluster operations on the runtime workloads: Deployments, Services
//! and the ephemeral build/cleanup Jobs.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use opr_executor_shared::runtime::{ROLE_LABEL, ROLE_RUNTIME};
use opr_executor_shared::ExecutorError;
use tracing::warn;

use super::{is_conflict, is_not_found};

/// Terminal observation of a build Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Succeeded,
    Failed,
}

/// Result of a Deployment delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// The cluster reported a deletion already underway.
    InProgress,
}

/// One page of runtime Deployments with native pagination metadata.
pub struct RuntimePage {
    pub items: Vec<Deployment>,
    pub continue_token: Option<String>,
    pub remaining: Option<i64>,
}

/// Phase derived from a Job's status counters. `backoffLimit=0` guarantees
/// exactly one of succeeded/failed terminates the wait.
pub fn job_phase_of(job: &Job) -> JobPhase {
    let status = job.status.as_ref();
    if status.and_then(|s| s.succeeded).unwrap_or(0) >= 1 {
        JobPhase::Succeeded
    } else if status.and_then(|s| s.failed).unwrap_or(0) >= 1 {
        JobPhase::Failed
    } else {
        JobPhase::Running
    }
}

/// Desired replicas of a Deployment (0 when unset).
pub fn replicas(deployment: &Deployment) -> i32 {
    deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

/// Ready replicas reported by the Deployment controller.
pub fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Cluster operations scoped to one namespace.
#[derive(Clone)]
pub struct Workloads {
    client: Client,
    namespace: String,
}

impl Workloads {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Create the Service unless it already exists.
    pub async fn create_service_if_absent(&self, service: &Service) -> Result<(), ExecutorError> {
        let name = service.metadata.name.as_deref().unwrap_or_default();
        match self.services().get_opt(name).await {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {}
            Err(e) => {
                return Err(ExecutorError::RuntimeFailed(format!(
                    "Failed to read service: {e}"
                )))
            }
        }

        match self.services().create(&PostParams::default(), service).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(ExecutorError::RuntimeFailed(format!(
                "Failed to create service: {e}"
            ))),
        }
    }

    /// Create the runtime Deployment, or replace it when a previous
    /// incarnation exists. A create-409 means another replica won the race
    /// and maps to a conflict.
    pub async fn apply_deployment(&self, deployment: &Deployment) -> Result<(), ExecutorError> {
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let existing = match self.deployments().get_opt(name).await {
            Ok(existing) => existing,
            Err(e) => {
                return Err(ExecutorError::RuntimeFailed(format!(
                    "Failed to read deployment: {e}"
                )))
            }
        };

        match existing {
            Some(current) => {
                let mut replacement = deployment.clone();
                replacement.metadata.resource_version = current.metadata.resource_version;
                self.deployments()
                    .replace(name, &PostParams::default(), &replacement)
                    .await
                    .map_err(|e| {
                        ExecutorError::RuntimeFailed(format!("Failed to replace deployment: {e}"))
                    })?;
            }
            None => {
                match self
                    .deployments()
                    .create(&PostParams::default(), deployment)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if is_conflict(&e) => {
                        return Err(ExecutorError::RuntimeConflict(
                            "Runtime already exists".to_string(),
                        ))
                    }
                    Err(e) => {
                        return Err(ExecutorError::RuntimeFailed(format!(
                            "Failed to create deployment: {e}"
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// Delete a runtime Deployment, classifying the cluster's response.
    pub async fn delete_deployment(&self, name: &str) -> Result<DeleteOutcome, ExecutorError> {
        match self.deployments().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_not_found(&e) => Ok(DeleteOutcome::NotFound),
            Err(kube::Error::Api(response))
                if response.code == 500 && response.message.contains("already in progress") =>
            {
                Ok(DeleteOutcome::InProgress)
            }
            Err(e) => Err(ExecutorError::GeneralUnknown(format!(
                "Failed to delete deployment: {e}"
            ))),
        }
    }

    /// Delete a Service, swallowing every error.
    pub async fn delete_service_best_effort(&self, name: &str) {
        if let Err(e) = self.services().delete(name, &DeleteParams::default()).await {
            if !is_not_found(&e) {
                warn!(service = name, "failed to delete service: {e}");
            }
        }
    }

    /// Create an ephemeral Job.
    pub async fn create_job(&self, job: &Job) -> Result<(), ExecutorError> {
        self.jobs()
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| ExecutorError::RuntimeFailed(format!("Failed to create job: {e}")))?;
        Ok(())
    }

    /// Observe a Job's phase; `None` while the Job is not yet visible (404).
    pub async fn job_phase(&self, name: &str) -> Result<Option<JobPhase>, ExecutorError> {
        match self.jobs().get_opt(name).await {
            Ok(Some(job)) => Ok(Some(job_phase_of(&job))),
            Ok(None) => Ok(None),
            Err(e) => Err(ExecutorError::RuntimeFailed(format!(
                "Failed to read job: {e}"
            ))),
        }
    }

    /// Jobs matching a label selector.
    pub async fn list_jobs(&self, selector: &str) -> Result<Vec<Job>, ExecutorError> {
        let list = self
            .jobs()
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| ExecutorError::GeneralUnknown(format!("Failed to list jobs: {e}")))?;
        Ok(list.items)
    }

    /// Read a Deployment by name; `None` when absent.
    pub async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, ExecutorError> {
        match self.deployments().get_opt(name).await {
            Ok(deployment) => Ok(deployment),
            Err(e) => Err(ExecutorError::GeneralUnknown(format!(
                "Failed to read deployment: {e}"
            ))),
        }
    }

    /// JSON-patch a Deployment's replica count.
    pub async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ExecutorError> {
        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/spec/replicas", "value": replicas}
        ]))
        .expect("replace op is a valid patch");

        self.deployments()
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|e| {
                ExecutorError::GeneralUnknown(format!("Failed to scale deployment: {e}"))
            })?;
        Ok(())
    }

    /// One page of `role=runtime` Deployments using native pagination.
    pub async fn list_runtimes(
        &self,
        limit: u32,
        continue_token: Option<&str>,
    ) -> Result<RuntimePage, ExecutorError> {
        let mut params = ListParams::default()
            .labels(&format!("{ROLE_LABEL}={ROLE_RUNTIME}"))
            .limit(limit);
        if let Some(token) = continue_token {
            params.continue_token = Some(token.to_string());
        }

        let list = self
            .deployments()
            .list(&params)
            .await
            .map_err(|e| ExecutorError::GeneralUnknown(format!("Failed to list runtimes: {e}")))?;

        Ok(RuntimePage {
            continue_token: list.metadata.continue_.clone().filter(|t| !t.is_empty()),
            remaining: list.metadata.remaining_item_count,
            items: list.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_status(status: serde_json::Value) -> Job {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": "build-r1-0a1b2c3d"},
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn job_phase_from_counters() {
        assert_eq!(
            job_phase_of(&job_with_status(serde_json::json!({"succeeded": 1}))),
            JobPhase::Succeeded
        );
        assert_eq!(
            job_phase_of(&job_with_status(serde_json::json!({"failed": 1}))),
            JobPhase::Failed
        );
        assert_eq!(
            job_phase_of(&job_with_status(serde_json::json!({"active": 1}))),
            JobPhase::Running
        );
    }

    #[test]
    fn replica_helpers_default_to_zero() {
        let deployment = Deployment::default();
        assert_eq!(replicas(&deployment), 0);
        assert_eq!(ready_replicas(&deployment), 0);

        let warm: Deployment = serde_json::from_value(serde_json::json!({
            "spec": {"replicas": 1},
            "status": {"readyReplicas": 1}
        }))
        .unwrap();
        assert_eq!(replicas(&warm), 1);
        assert_eq!(ready_replicas(&warm), 1);
    }
}
