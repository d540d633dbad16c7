use std::collections::HashMap;

use axum::extract::{Query, State};
use serde::Serialize;
use taskq_infrastructure::{QueueDetails, QueueMetrics, RetryReport};

use crate::{
    error::ApiResult,
    handlers::optional_limit,
    response::{success, success_with_message, ApiResponse},
    routes::AppState,
};

#[derive(Debug, Serialize)]
pub struct ClearFailedResult {
    pub cleared: usize,
}

/// 获取队列指标
pub async fn queue_metrics(State(state): State<AppState>) -> ApiResult<ApiResponse<QueueMetrics>> {
    Ok(success(state.queue.metrics().await))
}

/// 获取各优先级队列详情
pub async fn queue_details(State(state): State<AppState>) -> ApiResult<ApiResponse<QueueDetails>> {
    Ok(success(state.queue.details().await))
}

/// 清空失败队列，任务记录保持 Failed 状态
pub async fn clear_failed(
    State(state): State<AppState>,
) -> ApiResult<ApiResponse<ClearFailedResult>> {
    let cleared = state.queue.clear_failed().await;
    Ok(success_with_message(
        ClearFailedResult { cleared },
        format!("已清空失败队列，共 {cleared} 个任务"),
    ))
}

/// 重试失败队列中的任务，`limit` 缺省为 10，最大 100
pub async fn retry_failed(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ApiResponse<RetryReport>> {
    let limit = optional_limit(&params)?;
    let report = state.queue.retry_failed(limit).await?;
    let message = format!("已重试 {} 个失败任务", report.retried);
    Ok(success_with_message(report, message))
}
