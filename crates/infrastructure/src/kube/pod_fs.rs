//! Pod file I/O over streamed remote exec.
//!
//! Reads, existence-tests and tails files inside pod containers. Each call
//! opens its own exec connection; concurrent tails are independent.

use bytes::Bytes;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, ListParams, LogParams};
use kube::Client;
use opr_executor_shared::ExecutorError;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors from in-pod file operations.
#[derive(Debug, thiserror::Error)]
pub enum PodFsError {
    /// The exec transport could not be established or broke mid-stream.
    #[error("pod exec failed: {0}")]
    Transport(String),

    /// The remote command terminated unsuccessfully; carries its stderr.
    #[error("{stderr}")]
    Failed { stderr: String },
}

/// Event delivered by a running tail.
#[derive(Debug)]
pub enum TailEvent {
    Chunk(Bytes),
    Error(String),
}

/// Handle to a running tail. `cancel` tears the exec connection down; no
/// further chunks are delivered after it returns.
pub struct TailHandle {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl TailHandle {
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// File I/O adapter for pod containers in one namespace.
#[derive(Clone)]
pub struct PodFs {
    client: Client,
    namespace: String,
}

impl PodFs {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Run a command in a container and collect its stdout. A non-success
    /// termination fails with the accumulated stderr.
    pub async fn exec_collect(
        &self,
        pod: &str,
        container: &str,
        command: &[&str],
    ) -> Result<String, PodFsError> {
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods()
            .exec(pod, command.iter().copied(), &params)
            .await
            .map_err(|e| PodFsError::Transport(e.to_string()))?;

        let mut stdout = attached
            .stdout()
            .ok_or_else(|| PodFsError::Transport("exec stdout unavailable".to_string()))?;
        let mut stderr = attached
            .stderr()
            .ok_or_else(|| PodFsError::Transport("exec stderr unavailable".to_string()))?;
        let status_future = attached.take_status();

        let mut out = Vec::new();
        let mut err = Vec::new();
        let (stdout_read, stderr_read) =
            tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        stdout_read.map_err(|e| PodFsError::Transport(e.to_string()))?;
        stderr_read.map_err(|e| PodFsError::Transport(e.to_string()))?;

        let status = match status_future {
            Some(future) => future.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| PodFsError::Transport(e.to_string()))?;

        let succeeded = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .map(|s| s == "Success")
            .unwrap_or(false);

        if succeeded {
            Ok(String::from_utf8_lossy(&out).into_owned())
        } else {
            Err(PodFsError::Failed {
                stderr: String::from_utf8_lossy(&err).into_owned(),
            })
        }
    }

    /// `cat` a file inside a container.
    pub async fn read_file(
        &self,
        pod: &str,
        container: &str,
        path: &str,
    ) -> Result<String, PodFsError> {
        self.exec_collect(pod, container, &["cat", path]).await
    }

    /// `test -f` a file inside a container. Any failure maps to `false`.
    pub async fn file_exists(&self, pod: &str, container: &str, path: &str) -> bool {
        self.exec_collect(pod, container, &["test", "-f", path])
            .await
            .is_ok()
    }

    /// `tail -F` a file, delivering chunks to `tx` as they arrive. Stderr is
    /// accumulated and delivered as a single `TailEvent::Error` when the
    /// stream ends abnormally.
    pub async fn tail_file(
        &self,
        pod: &str,
        container: &str,
        path: &str,
        tx: mpsc::Sender<TailEvent>,
    ) -> Result<TailHandle, PodFsError> {
        let params = AttachParams::default()
            .container(container)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods()
            .exec(pod, ["tail", "-F", path], &params)
            .await
            .map_err(|e| PodFsError::Transport(e.to_string()))?;

        let mut stdout = attached
            .stdout()
            .ok_or_else(|| PodFsError::Transport("exec stdout unavailable".to_string()))?;
        let mut stderr = attached
            .stderr()
            .ok_or_else(|| PodFsError::Transport("exec stderr unavailable".to_string()))?;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let pod_name = pod.to_string();

        let task = tokio::spawn(async move {
            // Keep the attached process alive for the lifetime of the tail;
            // dropping it closes the websocket.
            let _attached = attached;
            let mut stderr_buf = Vec::new();
            let mut out_buf = [0u8; 4096];
            let mut err_buf = [0u8; 4096];
            let mut stderr_open = true;
            let mut cancelled = false;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    read = stdout.read(&mut out_buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(TailEvent::Chunk(Bytes::copy_from_slice(&out_buf[..n]))).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            stderr_buf.extend_from_slice(e.to_string().as_bytes());
                            break;
                        }
                    },
                    read = stderr.read(&mut err_buf), if stderr_open => match read {
                        Ok(0) => stderr_open = false,
                        Ok(n) => stderr_buf.extend_from_slice(&err_buf[..n]),
                        Err(_) => stderr_open = false,
                    },
                }
            }

            if !cancelled && !stderr_buf.is_empty() {
                let _ = tx
                    .send(TailEvent::Error(
                        String::from_utf8_lossy(&stderr_buf).into_owned(),
                    ))
                    .await;
            }
            debug!(pod = %pod_name, "tail terminated");
        });

        Ok(TailHandle { token, task })
    }

    /// Pods matching a label selector, as the cluster lists them.
    pub async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ExecutorError> {
        let params = ListParams::default().labels(selector);
        let list = self
            .pods()
            .list(&params)
            .await
            .map_err(|e| ExecutorError::GeneralUnknown(format!("Failed to list pods: {e}")))?;
        Ok(list.items)
    }

    /// First pod matching a label selector.
    pub async fn first_pod(&self, selector: &str) -> Result<Option<Pod>, ExecutorError> {
        Ok(self.list_pods(selector).await?.into_iter().next())
    }

    /// Logs from the cluster's native pod log API; the fallback when in-pod
    /// files cannot be read.
    pub async fn native_logs(&self, pod: &str, container: &str) -> Result<String, PodFsError> {
        let mut params = LogParams::default();
        params.container = Some(container.to_string());
        self.pods()
            .logs(pod, &params)
            .await
            .map_err(|e| PodFsError::Transport(e.to_string()))
    }
}

/// IP assigned to a pod, when it has one.
pub fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status.as_ref().and_then(|s| s.pod_ip.clone())
}

/// Pod name, when set.
pub fn pod_name(pod: &Pod) -> Option<String> {
    pod.metadata.name.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_ip_reads_status() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "dep-r1-abc"},
            "status": {"podIP": "10.0.0.7"}
        }))
        .unwrap();
        assert_eq!(pod_ip(&pod).as_deref(), Some("10.0.0.7"));
        assert_eq!(pod_name(&pod).as_deref(), Some("dep-r1-abc"));
    }

    #[test]
    fn pod_ip_absent_when_no_status() {
        let pod = Pod::default();
        assert!(pod_ip(&pod).is_none());
    }
}
