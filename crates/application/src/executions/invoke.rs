//! The invocation path: cold start, readiness gates, proxying and log
//! collection.

use std::str::FromStr;
use std::time::{Duration, Instant};

use opr_executor_infrastructure::kube::manifests::{EXECUTION_LOG_DIR, RUNTIME_CONTAINER};
use opr_executor_infrastructure::kube::pod_fs::pod_ip;
use opr_executor_infrastructure::kube::state::{annotation, wait_listening};
use opr_executor_infrastructure::kube::workloads::{ready_replicas, replicas};
use opr_executor_shared::runtime::{
    deployment_name, fields, now_millis, RuntimeVersion, RUNTIME_ID_LABEL, RUNTIME_PORT,
};
use opr_executor_shared::ExecutorError;
use percent_encoding::percent_decode_str;
use tracing::{debug, info};

use super::{
    basic_auth, collect_headers, normalize_path, truncate_log, ExecutionRequest, ExecutionResult,
    DEFAULT_EXECUTION_TIMEOUT_SECS,
};
use crate::runtimes::{CreateRuntimeRequest, CreateRuntimeUseCase};
use crate::Adapters;

/// Cold start waits at most this long for the Deployment to report a ready
/// replica.
const COLD_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Executes calls against a runtime, creating and warming it on demand.
#[derive(Clone)]
pub struct ExecuteRuntimeUseCase {
    adapters: Adapters,
    create: CreateRuntimeUseCase,
}

impl ExecuteRuntimeUseCase {
    pub fn new(adapters: Adapters, create: CreateRuntimeUseCase) -> Self {
        Self { adapters, create }
    }

    pub async fn execute(
        &self,
        runtime_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutorError> {
        let prepare_start = Instant::now();
        let start_ms = now_millis();
        let timeout = request.timeout.unwrap_or(DEFAULT_EXECUTION_TIMEOUT_SECS);

        if !self.adapters.state.exists(runtime_id).await? {
            self.create_on_the_fly(runtime_id, &request).await?;
            self.adapters
                .state
                .wait_ready(runtime_id, Duration::from_secs_f64(timeout.max(0.0)))
                .await?;
        }

        let remaining = |prepare_start: Instant| (timeout - prepare_start.elapsed().as_secs_f64()).max(0.0);

        // Refresh the activity stamp; losing it only delays the reaper.
        if let Err(e) = self
            .adapters
            .state
            .update(runtime_id, &[(fields::UPDATED, now_millis().to_string())])
            .await
        {
            debug!(runtime_id, "failed to stamp updated: {e}");
        }
        self.adapters
            .state
            .wait_ready(runtime_id, Duration::from_secs_f64(remaining(prepare_start)))
            .await?;

        let deployment = self
            .adapters
            .state
            .get(runtime_id)
            .await?
            .ok_or_else(|| ExecutorError::RuntimeNotFound(format!("Runtime not found: {runtime_id}")))?;

        let secret = annotation(&deployment, fields::SECRET)
            .map(str::to_string)
            .ok_or_else(|| {
                ExecutorError::RuntimeNotFound(
                    "Runtime secret not found. Please re-create the runtime.".to_string(),
                )
            })?;
        let version = annotation(&deployment, fields::VERSION)
            .and_then(|v| v.parse::<RuntimeVersion>().ok())
            .unwrap_or_default();

        // The listening bit only holds within one pod lifetime; a cold start
        // brings up a fresh pod, so the gate must run again.
        let listening = if replicas(&deployment) == 0 {
            self.cold_start(runtime_id).await?;
            false
        } else {
            annotation(&deployment, fields::LISTENING) == Some("1")
        };

        let pod = self
            .adapters
            .pod_fs
            .first_pod(&format!("{RUNTIME_ID_LABEL}={runtime_id}"))
            .await?
            .ok_or_else(|| {
                ExecutorError::RuntimeNotFound(format!("Runtime pod not found: {runtime_id}"))
            })?;
        let ip = pod_ip(&pod).ok_or_else(|| {
            ExecutorError::RuntimeNotFound(format!("Runtime pod has no address: {runtime_id}"))
        })?;
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        if !listening {
            let window = Duration::from_secs_f64(remaining(prepare_start).max(1.0));
            if !wait_listening(&self.adapters.http, &ip, window).await {
                return Err(ExecutorError::RuntimeTimeout(
                    "Runtime did not start listening in time".to_string(),
                ));
            }
            if let Err(e) = self
                .adapters
                .state
                .update(runtime_id, &[(fields::LISTENING, "1".to_string())])
                .await
            {
                debug!(runtime_id, "failed to stamp listening: {e}");
            }
        }

        let logging = request.logging.unwrap_or(true);
        let response = self
            .proxy(&ip, &secret, version, logging, remaining(prepare_start), &request)
            .await?;
        let status_code = response.status().as_u16();

        let log_id = response
            .headers()
            .get("x-open-runtimes-log-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| percent_decode_str(v).decode_utf8_lossy().into_owned())
            .unwrap_or_default();

        let header_pairs: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let headers = collect_headers(header_pairs);

        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::GeneralUnknown(format!("Failed to read response: {e}")))?;

        let (logs, errors) = if version == RuntimeVersion::V5 && logging && !log_id.is_empty() {
            self.collect_logs(&pod_name, &log_id).await
        } else {
            (String::new(), String::new())
        };

        // Activity stamps feed the reaper; losing them is harmless.
        if let Err(e) = self
            .adapters
            .state
            .update(
                runtime_id,
                &[
                    (fields::LAST_EXECUTION_TIME, now_millis().to_string()),
                    (fields::UPDATED, now_millis().to_string()),
                ],
            )
            .await
        {
            debug!(runtime_id, "failed to stamp execution time: {e}");
        }

        info!(runtime_id, status_code, "execution proxied");
        Ok(ExecutionResult {
            status_code,
            headers,
            body,
            logs,
            errors,
            duration: prepare_start.elapsed().as_secs_f64(),
            start_time: start_ms as f64 / 1000.0,
        })
    }

    /// Create a missing runtime before executing into it. Equivalent to the
    /// create endpoint: same validation, same error propagation.
    async fn create_on_the_fly(
        &self,
        runtime_id: &str,
        request: &ExecutionRequest,
    ) -> Result<(), ExecutorError> {
        let (Some(image), Some(source)) = (request.image.clone(), request.source.clone()) else {
            return Err(ExecutorError::ExecutionBadRequest(
                "Runtime not found. Please provide image and source to create it.".to_string(),
            ));
        };

        info!(runtime_id, "runtime missing, creating on the fly");
        let mut variables = request.variables.clone();
        variables.insert(
            "INERNAL_EXECUTOR_HOSTNAME".to_string(),
            serde_json::Value::String(self.adapters.config.server.hostname.clone()),
        );
        self.create
            .execute(CreateRuntimeRequest {
                runtime_id: runtime_id.to_string(),
                image,
                source: Some(source),
                entrypoint: request.entrypoint.clone().unwrap_or_default(),
                variables,
                cpus: request.cpus,
                memory: request.memory,
                version: request.version,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Scale 0 -> 1 and wait for the Deployment to report a ready replica.
    /// Clears the listening bit first: the new pod has not accepted a
    /// connection yet, whatever the previous one did.
    async fn cold_start(&self, runtime_id: &str) -> Result<(), ExecutorError> {
        let name = deployment_name(runtime_id);
        info!(runtime_id, "cold starting runtime");
        if let Err(e) = self
            .adapters
            .state
            .update(runtime_id, &[(fields::LISTENING, "0".to_string())])
            .await
        {
            debug!(runtime_id, "failed to clear listening bit: {e}");
        }
        self.adapters.workloads.scale_deployment(&name, 1).await?;

        let deadline = tokio::time::Instant::now() + COLD_START_TIMEOUT;
        loop {
            if let Some(deployment) = self.adapters.workloads.get_deployment(&name).await? {
                if ready_replicas(&deployment) >= 1 {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutorError::RuntimeTimeout(
                    "Runtime did not become ready in time".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Forward the call to the in-pod server.
    async fn proxy(
        &self,
        ip: &str,
        secret: &str,
        version: RuntimeVersion,
        logging: bool,
        remaining_timeout: f64,
        request: &ExecutionRequest,
    ) -> Result<reqwest::Response, ExecutorError> {
        let path = normalize_path(request.path.as_deref().unwrap_or("/"));
        let url = format!("http://{ip}:{RUNTIME_PORT}{path}");
        let method = reqwest::Method::from_str(
            &request.method.as_deref().unwrap_or("GET").to_ascii_uppercase(),
        )
        .map_err(|_| {
            ExecutorError::ExecutionBadRequest(format!(
                "Invalid method: {}",
                request.method.as_deref().unwrap_or_default()
            ))
        })?;

        let mut builder = self.adapters.http.request(method.clone(), &url);
        for (name, value) in &request.headers {
            // v2 runtimes get no host header at all, caller-supplied or not.
            if version == RuntimeVersion::V2 && name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        match version {
            RuntimeVersion::V2 => {
                builder = builder
                    .header("x-internal-challenge", secret)
                    .header("content-type", "application/json");
            }
            _ => {
                let timeout_header = (remaining_timeout.floor() as i64).max(1).to_string();
                builder = builder
                    .header("authorization", basic_auth(secret))
                    .header("x-open-runtimes-secret", secret)
                    .header("x-open-runtimes-timeout", timeout_header)
                    .header(
                        "x-open-runtimes-logging",
                        if logging { "enabled" } else { "disabled" },
                    );
            }
        }

        if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
        }

        builder
            .timeout(Duration::from_secs_f64(remaining_timeout + 5.0))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::ExecutionTimeout("Execution timed out".to_string())
                } else {
                    ExecutorError::ExecutionTimeout(format!("Execution aborted: {e}"))
                }
            })
    }

    /// Pull per-execution logs out of the runtime container. Missing files
    /// are silently ignored.
    async fn collect_logs(&self, pod_name: &str, log_id: &str) -> (String, String) {
        let read = |suffix: &'static str| {
            let path = format!("{EXECUTION_LOG_DIR}/{log_id}_{suffix}.log");
            let pod_fs = self.adapters.pod_fs.clone();
            let pod = pod_name.to_string();
            async move {
                match pod_fs.read_file(&pod, RUNTIME_CONTAINER, &path).await {
                    Ok(content) => truncate_log(content),
                    Err(e) => {
                        debug!(pod = %pod, path, "execution log unavailable: {e}");
                        String::new()
                    }
                }
            }
        };

        tokio::join!(read("logs"), read("errors"))
    }
}
