use thiserror::Error;

/// 任务队列错误类型定义
#[derive(Debug, Error)]
pub enum TaskQueueError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("定时任务未找到: {id}")]
    ScheduledTaskNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的任务状态: {0}")]
    InvalidState(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("队列错误: {0}")]
    Queue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaskQueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TaskQueueError::TaskNotFound { .. } | TaskQueueError::ScheduledTaskNotFound { .. }
        )
    }

    /// 由调用方输入引起的错误（未知ID、非法状态、参数错误）
    pub fn is_client_error(&self) -> bool {
        self.is_not_found()
            || matches!(
                self,
                TaskQueueError::InvalidCron { .. }
                    | TaskQueueError::InvalidState(_)
                    | TaskQueueError::Validation(_)
            )
    }
}

impl From<serde_json::Error> for TaskQueueError {
    fn from(err: serde_json::Error) -> Self {
        TaskQueueError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type TaskQueueResult<T> = std::result::Result<T, TaskQueueError>;
