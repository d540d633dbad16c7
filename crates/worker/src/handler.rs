use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskq_core::TaskQueueResult;
use taskq_domain::{Task, TaskId, TaskPriority};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 交给处理器的任务执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_name: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub parameters: serde_json::Value,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    pub worker_name: String,
}

impl TaskContext {
    pub fn from_task(task: &Task, timeout_seconds: u64, worker_name: impl Into<String>) -> Self {
        Self {
            task_id: task.id,
            task_name: task.name.clone(),
            task_type: task.payload.task_type.clone(),
            priority: task.priority,
            parameters: task.payload.parameters.clone(),
            retry_count: task.retry_count,
            timeout_seconds,
            worker_name: worker_name.into(),
        }
    }
}

/// 处理器的执行结果。`success == false` 的结果视为任务失败
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error_message: Option<String>,
}

impl TaskOutcome {
    pub fn success(output: Option<String>) -> Self {
        Self {
            success: true,
            output,
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// 任务处理器，按 `task_type` 注册
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, context: &TaskContext) -> TaskQueueResult<TaskOutcome>;
}

/// 任务类型到处理器的注册表
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置的 http / noop 处理器，`enable_shell` 为真时再注册 shell 处理器
    pub async fn with_builtin_handlers(enable_shell: bool) -> Self {
        let registry = Self::new();
        if enable_shell {
            warn!("已启用shell任务处理器，任何能访问API的客户端都可以在本机执行命令");
            registry
                .register(Arc::new(crate::executors::ShellHandler::new()))
                .await;
        }
        registry
            .register(Arc::new(crate::executors::HttpHandler::new()))
            .await;
        registry
            .register(Arc::new(crate::executors::NoopHandler))
            .await;
        registry
    }

    /// 以处理器名称注册，同名处理器会被替换
    pub async fn register(&self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name().to_string();
        if self
            .handlers
            .write()
            .await
            .insert(name.clone(), handler)
            .is_some()
        {
            info!("替换任务处理器: {}", name);
        } else {
            info!("注册任务处理器: {}", name);
        }
    }

    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    pub async fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    pub async fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}
