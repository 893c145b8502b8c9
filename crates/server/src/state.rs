//! Application state shared by the handlers.

use std::sync::Arc;

use opr_executor_application::commands::CommandUseCase;
use opr_executor_application::executions::ExecuteRuntimeUseCase;
use opr_executor_application::logstream::LogStreamUseCase;
use opr_executor_application::runtimes::{
    CreateRuntimeUseCase, DeleteRuntimeUseCase, ListRuntimesUseCase,
};
use opr_executor_application::Adapters;

#[derive(Clone)]
pub struct AppState {
    pub executor_secret: String,
    pub create: Arc<CreateRuntimeUseCase>,
    pub delete: Arc<DeleteRuntimeUseCase>,
    pub list: Arc<ListRuntimesUseCase>,
    pub execute: Arc<ExecuteRuntimeUseCase>,
    pub command: Arc<CommandUseCase>,
    pub logstream: Arc<LogStreamUseCase>,
}

impl AppState {
    pub fn new(adapters: Adapters) -> Self {
        let create = CreateRuntimeUseCase::new(adapters.clone());

        Self {
            executor_secret: adapters.config.server.executor_secret.clone(),
            execute: Arc::new(ExecuteRuntimeUseCase::new(adapters.clone(), create.clone())),
            delete: Arc::new(DeleteRuntimeUseCase::new(adapters.clone())),
            list: Arc::new(ListRuntimesUseCase::new(adapters.clone())),
            command: Arc::new(CommandUseCase::new(adapters.clone())),
            logstream: Arc::new(LogStreamUseCase::new(adapters)),
            create: Arc::new(create),
        }
    }
}
