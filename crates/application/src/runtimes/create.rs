//! Runtime creation: optional build job, then the Service/Deployment pair.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use opr_executor_infrastructure::kube::manifests::{
    self, BuildJobSpec, RuntimeDeploymentSpec, BUILD_CONTAINER, BUILD_LOG_FILE, BUILD_TIMING_FILE,
    V2_LOG_FILE,
};
use opr_executor_infrastructure::kube::workloads::JobPhase;
use opr_executor_infrastructure::logs::timing;
use opr_executor_shared::runtime::{
    self, deployment_name, fields, now_millis, service_name, RuntimeVersion,
};
use opr_executor_shared::ExecutorError;
use tracing::{info, warn};

use super::{CreateRuntimeRequest, CreateRuntimeResponse, OutputLine, DEFAULT_BUILD_TIMEOUT_SECS};
use crate::Adapters;

/// Creates runtimes: validates, optionally drives a build Job to completion,
/// binds the Service/Deployment pair and stamps the lifecycle annotations.
#[derive(Clone)]
pub struct CreateRuntimeUseCase {
    adapters: Adapters,
}

impl CreateRuntimeUseCase {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    pub async fn execute(
        &self,
        request: CreateRuntimeRequest,
    ) -> Result<CreateRuntimeResponse, ExecutorError> {
        let started = Instant::now();
        let start_ms = now_millis();

        if request.runtime_id.is_empty() {
            return Err(ExecutorError::ExecutionBadRequest(
                "Missing required field: runtimeId".to_string(),
            ));
        }
        if request.image.is_empty() {
            return Err(ExecutorError::ExecutionBadRequest(
                "Missing required field: image".to_string(),
            ));
        }

        let runtime_id = request.runtime_id.as_str();
        let version = request.version.unwrap_or_default();

        if let Some(state) = self.adapters.state.state(runtime_id).await? {
            return Err(if state.is_pending() {
                ExecutorError::RuntimeConflict(
                    "Runtime creation is already in progress".to_string(),
                )
            } else {
                ExecutorError::RuntimeConflict("Runtime already exists".to_string())
            });
        }

        let secret = runtime::random_hex32();
        let hostname = runtime::random_hex32();
        info!(runtime_id, %version, "creating runtime");

        let variables = super::merge_variables(
            version,
            &request.variables,
            &secret,
            &request.entrypoint,
            &hostname,
            &self.adapters.config.server.hostname,
            request.cpus,
            request.memory,
            request.output_directory.as_deref(),
        );

        let mut output: Vec<OutputLine> = Vec::new();
        // Key the artifact is actually uploaded to when a build runs.
        let mut upload_key: Option<String> = None;

        if let Some(command) = request.command.as_deref() {
            let build_id = uuid::Uuid::new_v4();
            let artifact_key = format!("{runtime_id}/{build_id}.tar.gz");
            let job_name = format!("build-{runtime_id}-{}", runtime::random_hex8());
            let timeout = Duration::from_secs(request.timeout.unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS));

            let source_b64 = match request.source.as_deref() {
                Some(source_key) => {
                    let body = self.adapters.artifacts.get(source_key).await.map_err(|e| {
                        ExecutorError::RuntimeFailed(format!("Failed to download source: {e}"))
                    })?;
                    Some(BASE64.encode(&body))
                }
                None => None,
            };

            let job = manifests::build_job(&BuildJobSpec {
                runtime_id,
                job_name: &job_name,
                image: &request.image,
                version,
                command,
                variables: &variables,
                source_b64: source_b64.as_deref(),
                artifact_key: &artifact_key,
                storage: &self.adapters.config.storage,
                cpus: request.cpus,
                memory_mib: request.memory,
            });
            self.adapters.workloads.create_job(&job).await?;

            let build_started = Utc::now();
            self.wait_for_build_outcome(&job_name, timeout, version, build_started, &mut output)
                .await?;

            upload_key = Some(artifact_key);
        }

        // With no build, the provided source key is the artifact as-is.
        let artifact_path = match (&upload_key, &request.destination, &request.source) {
            (_, Some(destination), _) => Some(destination.clone()),
            (Some(key), None, _) => Some(key.clone()),
            (None, None, Some(source)) => Some(source.clone()),
            _ => None,
        };

        self.adapters
            .workloads
            .create_service_if_absent(&manifests::runtime_service(runtime_id))
            .await?;

        let deployment = manifests::runtime_deployment(&RuntimeDeploymentSpec {
            runtime_id,
            image: &request.image,
            version,
            secret: &secret,
            hostname: &hostname,
            variables: &variables,
            cpus: request.cpus,
            memory_mib: request.memory,
            artifact_path: artifact_path.as_deref(),
            created: start_ms,
        });
        self.adapters.workloads.apply_deployment(&deployment).await?;

        let duration = started.elapsed().as_secs_f64();
        self.adapters
            .state
            .update(
                runtime_id,
                &[
                    (fields::STATUS, format!("Up {}s", duration.round() as i64)),
                    (fields::INITIALISED, "1".to_string()),
                    (fields::UPDATED, now_millis().to_string()),
                ],
            )
            .await?;

        // Report the artifact the caller asked for; HEAD errors are swallowed
        // because size reporting is cosmetic.
        let (mut size, mut path) = (None, None);
        if let Some(destination) = &request.destination {
            let head_key = upload_key.as_deref().unwrap_or(destination.as_str());
            match self.adapters.artifacts.head(head_key).await {
                Ok(meta) => size = Some(meta.size),
                Err(e) => warn!(runtime_id, "artifact head failed: {e}"),
            }
            path = Some(destination.clone());
        }

        if request.remove {
            // Give log consumers a moment before tearing the runtime down.
            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Err(e) = self
                .adapters
                .workloads
                .delete_deployment(&deployment_name(runtime_id))
                .await
            {
                warn!(runtime_id, "failed to remove transient runtime: {e}");
            }
            self.adapters
                .workloads
                .delete_service_best_effort(&service_name(runtime_id))
                .await;
        }

        info!(runtime_id, duration, "runtime created");
        Ok(CreateRuntimeResponse {
            output,
            start_time: start_ms as f64 / 1000.0,
            duration: started.elapsed().as_secs_f64(),
            size,
            path,
        })
    }

    /// Poll the Job every second until it terminates, the deadline expires or
    /// a read fails in a way that will not heal. A 404 right after creation
    /// is expected (the Job may not be visible yet) and tolerated.
    async fn wait_for_build_outcome(
        &self,
        job_name: &str,
        timeout: Duration,
        version: RuntimeVersion,
        build_started: DateTime<Utc>,
        output: &mut Vec<OutputLine>,
    ) -> Result<(), ExecutorError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.adapters.workloads.job_phase(job_name).await {
                Ok(Some(JobPhase::Succeeded)) => {
                    *output = self
                        .harvest_build_output(job_name, version, build_started, false)
                        .await;
                    return Ok(());
                }
                Ok(Some(JobPhase::Failed)) => {
                    *output = self
                        .harvest_build_output(job_name, version, build_started, true)
                        .await;
                    return Err(ExecutorError::RuntimeFailed("Build job failed".to_string()));
                }
                Ok(Some(JobPhase::Running)) | Ok(None) => {}
                // Unrecoverable read errors would loop tightly forever; fail.
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutorError::RuntimeTimeout("Build job timed out".to_string()));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Read build logs out of the job pod. Failures leave the output empty,
    /// except on the failure branch where the native pod-log API is tried as
    /// a fallback.
    async fn harvest_build_output(
        &self,
        job_name: &str,
        version: RuntimeVersion,
        build_started: DateTime<Utc>,
        failed: bool,
    ) -> Vec<OutputLine> {
        let pod = match self
            .adapters
            .pod_fs
            .first_pod(&format!("job-name={job_name}"))
            .await
        {
            Ok(Some(pod)) => pod,
            _ => return Vec::new(),
        };
        let Some(pod_name) = pod.metadata.name.clone() else {
            return Vec::new();
        };

        let harvested: Result<Vec<OutputLine>, _> = match version {
            RuntimeVersion::V2 => self
                .adapters
                .pod_fs
                .read_file(&pod_name, BUILD_CONTAINER, V2_LOG_FILE)
                .await
                .map(|content| {
                    vec![OutputLine {
                        timestamp: timing::render_timestamp(build_started, 0.0),
                        content,
                    }]
                }),
            _ => {
                let logs = self
                    .adapters
                    .pod_fs
                    .read_file(&pod_name, BUILD_CONTAINER, BUILD_LOG_FILE)
                    .await;
                let timings = self
                    .adapters
                    .pod_fs
                    .read_file(&pod_name, BUILD_CONTAINER, BUILD_TIMING_FILE)
                    .await;
                match (logs, timings) {
                    (Ok(logs), Ok(timings)) => Ok(timing::segments(&logs, &timings, build_started)
                        .into_iter()
                        .map(|s| OutputLine {
                            timestamp: s.timestamp,
                            content: s.content,
                        })
                        .collect()),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
        };

        match harvested {
            Ok(lines) => lines,
            Err(e) if failed => {
                warn!(job = job_name, "pod file harvest failed, falling back to pod logs: {e}");
                match self
                    .adapters
                    .pod_fs
                    .native_logs(&pod_name, BUILD_CONTAINER)
                    .await
                {
                    Ok(content) => vec![OutputLine {
                        timestamp: timing::render_timestamp(build_started, 0.0),
                        content,
                    }],
                    Err(_) => Vec::new(),
                }
            }
            Err(e) => {
                warn!(job = job_name, "pod file harvest failed: {e}");
                Vec::new()
            }
        }
    }
}
