use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use taskq_core::TaskQueueError;
use tracing::{error, warn};

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    TaskQueue(#[from] TaskQueueError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TaskQueue(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::TaskQueue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::TaskQueue(TaskQueueError::TaskNotFound { id }) => {
                format!("任务 ID {id} 不存在")
            }
            ApiError::TaskQueue(TaskQueueError::ScheduledTaskNotFound { id }) => {
                format!("定时任务 ID {id} 不存在")
            }
            ApiError::TaskQueue(TaskQueueError::InvalidCron { expr, message }) => {
                format!("Cron表达式 '{expr}' 无效: {message}")
            }
            other => other.to_string(),
        };

        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        } else {
            warn!("请求被拒绝: {}", message);
        }

        ApiResponse::error(status, message).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
