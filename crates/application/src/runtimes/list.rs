//! Runtime listing and describing.

use opr_executor_shared::ExecutorError;

use super::{clamp_limit, descriptor_of, RuntimeDescriptor};
use crate::Adapters;

/// One page of runtimes plus the cluster's pagination metadata, surfaced via
/// response headers.
pub struct RuntimeListPage {
    pub runtimes: Vec<RuntimeDescriptor>,
    pub limit: u32,
    pub continue_token: Option<String>,
    pub remaining: Option<i64>,
}

#[derive(Clone)]
pub struct ListRuntimesUseCase {
    adapters: Adapters,
}

impl ListRuntimesUseCase {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    pub async fn list(
        &self,
        limit: Option<i64>,
        continue_token: Option<&str>,
    ) -> Result<RuntimeListPage, ExecutorError> {
        let limit = clamp_limit(limit);
        let page = self
            .adapters
            .workloads
            .list_runtimes(limit, continue_token)
            .await?;

        Ok(RuntimeListPage {
            runtimes: page.items.iter().map(descriptor_of).collect(),
            limit,
            continue_token: page.continue_token,
            remaining: page.remaining,
        })
    }

    pub async fn describe(&self, runtime_id: &str) -> Result<RuntimeDescriptor, ExecutorError> {
        match self.adapters.state.get(runtime_id).await? {
            Some(deployment) => Ok(descriptor_of(&deployment)),
            None => Err(ExecutorError::RuntimeNotFound(format!(
                "Runtime not found: {runtime_id}"
            ))),
        }
    }
}
