//! Streaming build/runtime logs as timing data accrues.
//!
//! Composes a `tail -F` on the timing file with a 1 s flush ticker and a
//! liveness check; timestamped lines are pushed into a channel the HTTP
//! layer drains as a text event stream.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use opr_executor_infrastructure::kube::manifests::{
    BUILD_CONTAINER, BUILD_LOG_FILE, BUILD_TIMING_FILE, RUNTIME_CONTAINER,
};
use opr_executor_infrastructure::kube::pod_fs::TailEvent;
use opr_executor_infrastructure::kube::state::annotation;
use opr_executor_infrastructure::logs::timing;
use opr_executor_shared::runtime::{
    RuntimeVersion, ROLE_BUILD, ROLE_LABEL, ROLE_RUNTIME, RUNTIME_ID_LABEL,
};
use opr_executor_shared::ExecutorError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::Adapters;

/// How long we wait for the runtime's Deployment to appear at all.
const EXISTENCE_WINDOW: Duration = Duration::from_secs(5);
/// How long we wait for the runtime to report any status.
const STATUS_WINDOW: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct LogStreamUseCase {
    adapters: Adapters,
}

impl LogStreamUseCase {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    /// Open a log stream for a runtime. Setup failures surface as errors;
    /// after that the returned channel carries pre-rendered stream lines
    /// until `timeout` elapses or the runtime finishes initialising.
    pub async fn stream(
        &self,
        runtime_id: &str,
        timeout: Duration,
    ) -> Result<mpsc::Receiver<Bytes>, ExecutorError> {
        let deployment = self.wait_for_deployment(runtime_id).await?;

        let (tx, rx) = mpsc::channel::<Bytes>(64);

        let version = annotation(&deployment, opr_executor_shared::runtime::fields::VERSION)
            .and_then(|v| v.parse::<RuntimeVersion>().ok())
            .unwrap_or_default();
        if version == RuntimeVersion::V2 {
            // v2 has no streaming logs; an immediately closed channel yields
            // an empty body.
            return Ok(rx);
        }

        self.wait_for_status(runtime_id).await?;
        let (pod_name, container) = self.locate_source_pod(runtime_id).await?;

        let this = self.clone();
        let runtime_id = runtime_id.to_string();
        tokio::spawn(async move {
            this.pump(&runtime_id, &pod_name, container, timeout, tx).await;
        });

        Ok(rx)
    }

    async fn wait_for_deployment(
        &self,
        runtime_id: &str,
    ) -> Result<k8s_openapi::api::apps::v1::Deployment, ExecutorError> {
        let deadline = tokio::time::Instant::now() + EXISTENCE_WINDOW;
        loop {
            if let Some(deployment) = self.adapters.state.get(runtime_id).await? {
                return Ok(deployment);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutorError::RuntimeNotFound(format!(
                    "Runtime not found: {runtime_id}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn wait_for_status(&self, runtime_id: &str) -> Result<(), ExecutorError> {
        let deadline = tokio::time::Instant::now() + STATUS_WINDOW;
        loop {
            if self.adapters.state.state(runtime_id).await?.is_some() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutorError::RuntimeTimeout(
                    "Runtime has no status to stream logs for".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Prefer the most recent build Job's pod; fall back to the runtime pod.
    async fn locate_source_pod(
        &self,
        runtime_id: &str,
    ) -> Result<(String, &'static str), ExecutorError> {
        let selector = format!("{ROLE_LABEL}={ROLE_BUILD},{RUNTIME_ID_LABEL}={runtime_id}");
        let mut jobs = self.adapters.workloads.list_jobs(&selector).await?;
        jobs.sort_by_key(|j| j.metadata.creation_timestamp.clone());

        if let Some(job) = jobs.last() {
            if let Some(job_name) = job.metadata.name.as_deref() {
                if let Some(pod) = self
                    .adapters
                    .pod_fs
                    .first_pod(&format!("job-name={job_name}"))
                    .await?
                {
                    if let Some(name) = pod.metadata.name {
                        return Ok((name, BUILD_CONTAINER));
                    }
                }
            }
        }

        let selector = format!("{ROLE_LABEL}={ROLE_RUNTIME},{RUNTIME_ID_LABEL}={runtime_id}");
        if let Some(pod) = self.adapters.pod_fs.first_pod(&selector).await? {
            if let Some(name) = pod.metadata.name {
                return Ok((name, RUNTIME_CONTAINER));
            }
        }

        Err(ExecutorError::RuntimeNotFound(format!(
            "No pod to stream logs from: {runtime_id}"
        )))
    }

    /// The streaming loop proper: wait for log files, tail the timing file,
    /// flush rendered lines once a second, close when the runtime disappears
    /// or finishes initialising.
    async fn pump(
        &self,
        runtime_id: &str,
        pod_name: &str,
        container: &'static str,
        timeout: Duration,
        tx: mpsc::Sender<Bytes>,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;

        // Wait for both files to exist and the timing file to carry content.
        loop {
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            match self.adapters.state.state(runtime_id).await {
                Ok(None) => return,
                Ok(Some(_)) => {}
                Err(e) => {
                    debug!(runtime_id, "status check failed during log wait: {e}");
                }
            }

            let logs_ready = self
                .adapters
                .pod_fs
                .file_exists(pod_name, container, BUILD_LOG_FILE)
                .await;
            let timings_ready = match self
                .adapters
                .pod_fs
                .read_file(pod_name, container, BUILD_TIMING_FILE)
                .await
            {
                Ok(content) => !content.trim().is_empty(),
                Err(_) => false,
            };
            if logs_ready && timings_ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let Ok(initial_logs) = self
            .adapters
            .pod_fs
            .read_file(pod_name, container, BUILD_LOG_FILE)
            .await
        else {
            return;
        };
        let intro = timing::log_offset(&initial_logs);
        let mut logs_bytes = initial_logs.into_bytes();

        let (tail_tx, mut tail_rx) = mpsc::channel::<TailEvent>(64);
        let tail = match self
            .adapters
            .pod_fs
            .tail_file(pod_name, container, BUILD_TIMING_FILE, tail_tx)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(runtime_id, "failed to tail timing file: {e}");
                return;
            }
        };

        let start = Utc::now();
        let mut timings_text = String::new();
        let mut parsed_entries = 0usize;
        let mut cursor: i64 = 0;
        let mut buffer = String::new();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    flush(&mut buffer, &tx).await;
                    match self.adapters.state.state(runtime_id).await {
                        Ok(None) => break,
                        Ok(Some(state)) if state.initialised == 1 => break,
                        _ => {}
                    }
                }
                event = tail_rx.recv() => match event {
                    None => break,
                    Some(TailEvent::Error(e)) => {
                        warn!(runtime_id, "timing tail errored: {e}");
                        break;
                    }
                    Some(TailEvent::Chunk(chunk)) => {
                        timings_text.push_str(&String::from_utf8_lossy(&chunk));

                        // New timing entries reference log bytes written since
                        // the last read; refresh the log text first.
                        if let Ok(fresh) = self
                            .adapters
                            .pod_fs
                            .read_file(pod_name, container, BUILD_LOG_FILE)
                            .await
                        {
                            logs_bytes = fresh.into_bytes();
                        }

                        let complete = timings_text
                            .rfind('\n')
                            .map(|i| i + 1)
                            .unwrap_or(0);
                        let entries = timing::parse_timing(&timings_text[..complete], start);
                        for entry in entries.iter().skip(parsed_entries) {
                            let content =
                                timing::slice_content(&logs_bytes, intro, cursor, entry.length);
                            buffer.push_str(&entry.timestamp);
                            buffer.push(' ');
                            buffer.push_str(&content.replace('\n', "\\n"));
                            buffer.push('\n');
                            cursor += entry.length;
                        }
                        parsed_entries = entries.len();
                    }
                },
            }
        }

        flush(&mut buffer, &tx).await;
        tail.cancel().await;
        debug!(runtime_id, "log stream closed");
    }
}

async fn flush(buffer: &mut String, tx: &mpsc::Sender<Bytes>) {
    if buffer.is_empty() {
        return;
    }
    let chunk = std::mem::take(buffer);
    let _ = tx.send(Bytes::from(chunk)).await;
}
