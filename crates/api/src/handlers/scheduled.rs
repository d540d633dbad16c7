use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::Deserialize;
use taskq_dispatcher::{ResetReport, ScheduleRequest};
use taskq_domain::{ScheduledTask, TaskPayload, TaskPriority};

use crate::{
    error::ApiResult,
    handlers::{json_body, required_task_id},
    response::{success_with_message, ApiResponse},
    routes::AppState,
};

/// 定时任务创建请求
#[derive(Debug, Deserialize)]
pub struct CreateScheduledRequest {
    pub name: Option<String>,
    pub cron_expression: String,
    pub task_type: String,
    pub parameters: Option<serde_json::Value>,
    pub priority: Option<String>,
}

/// 注册定时任务
pub async fn create_scheduled(
    State(state): State<AppState>,
    payload: Result<Json<CreateScheduledRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<ScheduledTask>> {
    let request = json_body(payload)?;
    let name = request
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| request.task_type.clone());

    let scheduled = state
        .scheduler
        .register(ScheduleRequest {
            name,
            cron_expression: request.cron_expression,
            priority: request
                .priority
                .as_deref()
                .map(TaskPriority::from_name)
                .unwrap_or_default(),
            payload: TaskPayload::new(
                request.task_type,
                request.parameters.unwrap_or(serde_json::Value::Null),
            ),
        })
        .await?;

    let message = format!("定时任务 {} 已注册", scheduled.id);
    Ok(success_with_message(scheduled, message))
}

/// 暂停定时任务
pub async fn pause_scheduled(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ApiResponse<ScheduledTask>> {
    let task_id = required_task_id(&params)?;
    let scheduled = state.scheduler.pause(task_id).await?;
    Ok(success_with_message(
        scheduled,
        format!("定时任务 {task_id} 已暂停"),
    ))
}

/// 恢复定时任务
pub async fn resume_scheduled(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ApiResponse<ScheduledTask>> {
    let task_id = required_task_id(&params)?;
    let scheduled = state.scheduler.resume(task_id).await?;
    Ok(success_with_message(
        scheduled,
        format!("定时任务 {task_id} 已恢复"),
    ))
}

/// 将定时任务的子任务重置为等待状态
pub async fn reset_scheduled(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ApiResponse<ResetReport>> {
    let task_id = required_task_id(&params)?;
    let report = state.scheduler.reset(task_id).await?;
    let message = format!("已重置 {} 个子任务", report.affected);
    Ok(success_with_message(report, message))
}
