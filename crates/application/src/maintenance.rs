//! The reaper: a leader-elected background loop that scales idle runtimes
//! back to zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use opr_executor_infrastructure::kube::lease::LeaseManager;
use opr_executor_infrastructure::kube::state::annotation;
use opr_executor_infrastructure::kube::workloads::{replicas, Workloads};
use opr_executor_shared::runtime::{fields, now_millis};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Should this runtime be scaled to zero now?
pub fn should_reap(
    replicas: i32,
    last_execution_ms: i64,
    now_ms: i64,
    inactive_threshold: Duration,
) -> bool {
    replicas == 1 && now_ms - last_execution_ms > inactive_threshold.as_millis() as i64
}

fn last_execution_ms(deployment: &Deployment) -> i64 {
    annotation(deployment, fields::LAST_EXECUTION_TIME)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
}

/// One maintenance loop per process. The lease keeps at most one replica
/// mutating replica counts per cycle across the fleet.
pub struct Maintenance {
    workloads: Workloads,
    lease: LeaseManager,
    interval: Duration,
    inactive_threshold: Duration,
    is_running: AtomicBool,
    shutdown: CancellationToken,
}

impl Maintenance {
    pub fn new(
        workloads: Workloads,
        lease: LeaseManager,
        interval: Duration,
        inactive_threshold: Duration,
    ) -> Self {
        Self {
            workloads,
            lease,
            interval,
            inactive_threshold,
            is_running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the loop. A second call on the same instance is a no-op.
    pub fn start(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("maintenance loop already running");
            return None;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            inactive_threshold_secs = self.inactive_threshold.as_secs(),
            "starting maintenance loop"
        );
        Some(tokio::spawn(async move { self.run().await }))
    }

    /// Request the loop to stop; cancels an in-flight sleep so it exits
    /// promptly.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if !self.lease.try_acquire().await {
                continue;
            }

            if let Err(e) = self.reap_idle_runtimes().await {
                warn!("maintenance cycle failed: {e}");
            }
        }
        info!("maintenance loop stopped");
    }

    async fn reap_idle_runtimes(&self) -> Result<(), opr_executor_shared::ExecutorError> {
        let mut continue_token: Option<String> = None;

        loop {
            let page = self
                .workloads
                .list_runtimes(100, continue_token.as_deref())
                .await?;

            for deployment in &page.items {
                if self.shutdown.is_cancelled() {
                    return Ok(());
                }

                if !should_reap(
                    replicas(deployment),
                    last_execution_ms(deployment),
                    now_millis(),
                    self.inactive_threshold,
                ) {
                    continue;
                }

                let Some(name) = deployment.metadata.name.as_deref() else {
                    continue;
                };
                match self.workloads.scale_deployment(name, 0).await {
                    Ok(()) => info!(deployment = name, "scaled idle runtime to zero"),
                    Err(e) => warn!(deployment = name, "failed to scale down: {e}"),
                }
            }

            match page.continue_token {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        debug!("maintenance cycle complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(300);

    #[test]
    fn idle_warm_runtime_is_reaped() {
        let now = 1_000_000_000;
        assert!(should_reap(1, now - 400_000, now, THRESHOLD));
    }

    #[test]
    fn recently_used_runtime_is_kept() {
        let now = 1_000_000_000;
        assert!(!should_reap(1, now - 200_000, now, THRESHOLD));
    }

    #[test]
    fn cold_runtime_is_never_touched() {
        let now = 1_000_000_000;
        assert!(!should_reap(0, now - 400_000, now, THRESHOLD));
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let now = 1_000_000_000;
        assert!(!should_reap(1, now - 300_000, now, THRESHOLD));
        assert!(should_reap(1, now - 300_001, now, THRESHOLD));
    }

    #[test]
    fn missing_stamp_counts_as_idle_forever() {
        let deployment = Deployment::default();
        assert_eq!(last_execution_ms(&deployment), 0);
    }
}
