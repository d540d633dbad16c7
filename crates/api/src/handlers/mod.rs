pub mod health;
pub mod metrics;
pub mod queue;
pub mod scheduled;
pub mod system;
pub mod tasks;

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use taskq_domain::TaskId;

use crate::error::{ApiError, ApiResult};

/// 查询参数中必填的 `task_id`
pub(crate) fn required_task_id(params: &HashMap<String, String>) -> ApiResult<TaskId> {
    let raw = params
        .get("task_id")
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest("task_id 不能为空".to_string()))?;

    raw.parse::<TaskId>()
        .map_err(|_| ApiError::BadRequest(format!("task_id 必须是整数: {raw}")))
}

/// 查询参数中可选的 `limit`，范围限制由队列负责
pub(crate) fn optional_limit(params: &HashMap<String, String>) -> ApiResult<Option<i64>> {
    match params.get("limit").map(|value| value.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("limit 必须是整数: {raw}"))),
    }
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}
