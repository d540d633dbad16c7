use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskq_core::TaskQueueError;
use taskq_domain::{
    NewTask, ScheduledStatus, ScheduledTask, Task, TaskId, TaskPayload, TaskPriority,
};

use crate::{
    error::ApiResult,
    handlers::{json_body, required_task_id},
    response::{success, success_with_message, ApiResponse},
    routes::AppState,
};

/// 一次性任务提交请求
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub name: Option<String>,
    pub task_type: String,
    pub parameters: Option<serde_json::Value>,
    pub priority: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskOperations {
    pub can_retry: bool,
    pub can_reset: bool,
}

#[derive(Debug, Serialize)]
pub struct ScheduledOperations {
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_reset: bool,
}

/// 任务状态查询结果，`task_id` 先按普通任务查找，再按定时任务查找
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskStatusView {
    Task {
        task_id: TaskId,
        name: String,
        task_type: String,
        priority: TaskPriority,
        status: String,
        status_label: String,
        retry_count: u32,
        error_message: Option<String>,
        scheduled_task_id: Option<TaskId>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        /// 是否在优先级队列中等待分发
        queued: bool,
        in_failed_queue: bool,
        executing: bool,
        operations: TaskOperations,
    },
    ScheduledTask {
        task_id: TaskId,
        name: String,
        cron_expression: String,
        status: String,
        status_label: String,
        scheduler_status: String,
        next_run_time: Option<DateTime<Utc>>,
        last_run_time: Option<DateTime<Utc>>,
        execute_count: u64,
        operations: ScheduledOperations,
    },
}

/// 提交一次性任务并放入队列
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Task>> {
    let request = json_body(payload)?;
    if request.task_type.trim().is_empty() {
        return Err(TaskQueueError::Validation("task_type 不能为空".to_string()).into());
    }

    let name = request
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| request.task_type.clone());
    let priority = request
        .priority
        .as_deref()
        .map(TaskPriority::from_name)
        .unwrap_or_default();

    let task = state
        .store
        .create_task(
            NewTask::new(
                name,
                TaskPayload::new(
                    request.task_type,
                    request.parameters.unwrap_or(serde_json::Value::Null),
                ),
            )
            .with_priority(priority),
        )
        .await?;
    state.queue.enqueue(&task).await?;

    let message = format!("任务 {} 已提交", task.id);
    Ok(success_with_message(task, message))
}

/// 查询任务状态以及当前允许的操作
pub async fn task_status(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<ApiResponse<TaskStatusView>> {
    let task_id = required_task_id(&params)?;

    match state.store.get_task(task_id).await {
        Ok(task) => Ok(success(task_view(&state, task).await)),
        Err(e) if e.is_not_found() => {
            let scheduled = state.store.get_scheduled(task_id).await?;
            Ok(success(scheduled_view(scheduled)))
        }
        Err(e) => Err(e.into()),
    }
}

async fn task_view(state: &AppState, task: Task) -> TaskStatusView {
    let queued = state.queue.is_queued(task.id).await;
    let in_failed_queue = state.queue.is_failed_queued(task.id).await;
    let executing = state.queue.in_flight().contains(task.id);
    let can_retry = task.can_retry();
    let can_reset = task.scheduled_task_id.is_some()
        && !executing
        && state.scheduler.reset_options().statuses.contains(&task.status);

    TaskStatusView::Task {
        task_id: task.id,
        name: task.name,
        task_type: task.payload.task_type,
        priority: task.priority,
        status: task.status.as_str().to_string(),
        status_label: task.status.label().to_string(),
        retry_count: task.retry_count,
        scheduled_task_id: task.scheduled_task_id,
        created_at: task.created_at,
        started_at: task.started_at,
        finished_at: task.finished_at,
        queued,
        in_failed_queue,
        executing,
        operations: TaskOperations {
            can_retry,
            can_reset,
        },
        error_message: task.error_message,
    }
}

fn scheduled_view(scheduled: ScheduledTask) -> TaskStatusView {
    let active = scheduled.status == ScheduledStatus::Active;
    TaskStatusView::ScheduledTask {
        task_id: scheduled.id,
        name: scheduled.name,
        cron_expression: scheduled.cron_expression,
        status: scheduled.status.as_str().to_string(),
        status_label: scheduled.status.label().to_string(),
        scheduler_status: if active { "scheduled" } else { "paused" }.to_string(),
        next_run_time: scheduled.next_run_time,
        last_run_time: scheduled.last_run_time,
        execute_count: scheduled.execute_count,
        operations: ScheduledOperations {
            can_pause: active,
            can_resume: !active,
            can_reset: true,
        },
    }
}
