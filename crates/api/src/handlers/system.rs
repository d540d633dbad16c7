use std::collections::BTreeMap;

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use taskq_dispatcher::SchedulerStats;
use taskq_domain::TaskStatus;
use taskq_infrastructure::QueueMetrics;
use taskq_worker::WorkerPoolStatus;
use tracing::error;

use crate::{
    error::ApiResult,
    response::{success, ApiResponse},
    routes::AppState,
};

/// 系统状态快照
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub healthy: bool,
    pub store_healthy: bool,
    pub queue: QueueMetrics,
    pub scheduler: SchedulerStats,
    pub workers: WorkerPoolStatus,
    pub task_counts: BTreeMap<String, u64>,
    pub timestamp: DateTime<Utc>,
}

/// 获取调度器统计信息
pub async fn scheduler_stats(
    State(state): State<AppState>,
) -> ApiResult<ApiResponse<SchedulerStats>> {
    Ok(success(state.scheduler.stats().await?))
}

/// 获取队列、调度器与 worker 的整体状态
pub async fn system_status(State(state): State<AppState>) -> ApiResult<ApiResponse<SystemStatus>> {
    let store_healthy = match state.store.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            error!("存储健康检查失败: {}", e);
            false
        }
    };

    let counts = state.store.count_by_status().await?;
    let task_counts = TaskStatus::ALL
        .iter()
        .map(|status| {
            (
                status.as_str().to_string(),
                counts.get(status).copied().unwrap_or(0),
            )
        })
        .collect();

    let queue = state.queue.metrics().await;
    let scheduler = state.scheduler.stats().await?;
    let workers = state.workers.status();

    Ok(success(SystemStatus {
        healthy: store_healthy && queue.running && workers.running,
        store_healthy,
        queue,
        scheduler,
        workers,
        task_counts,
        timestamp: Utc::now(),
    }))
}
