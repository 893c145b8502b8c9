//! Use cases of the executor: runtime lifecycle, invocation, in-pod
//! commands, the maintenance reaper and the log streamer.

pub mod commands;
pub mod executions;
pub mod logstream;
pub mod maintenance;
pub mod runtimes;

use std::sync::Arc;

use opr_executor_infrastructure::kube::pod_fs::PodFs;
use opr_executor_infrastructure::kube::state::RuntimeStateAccessor;
use opr_executor_infrastructure::kube::workloads::Workloads;
use opr_executor_infrastructure::storage::ArtifactStore;
use opr_executor_shared::config::ExecutorConfig;

/// Everything a use case needs to talk to the outside world. Cheap to clone;
/// constructed once at startup.
#[derive(Clone)]
pub struct Adapters {
    pub config: ExecutorConfig,
    pub workloads: Workloads,
    pub state: RuntimeStateAccessor,
    pub pod_fs: PodFs,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub http: reqwest::Client,
}
