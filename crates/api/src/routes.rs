use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use taskq_dispatcher::TaskScheduler;
use taskq_domain::TaskStore;
use taskq_infrastructure::PriorityQueueManager;
use taskq_worker::WorkerPool;

use crate::handlers::{
    health::health_check,
    metrics::prometheus_metrics,
    queue::{clear_failed, queue_details, queue_metrics, retry_failed},
    scheduled::{create_scheduled, pause_scheduled, reset_scheduled, resume_scheduled},
    system::{scheduler_stats, system_status},
    tasks::{submit_task, task_status},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<PriorityQueueManager>,
    pub scheduler: Arc<TaskScheduler>,
    pub workers: Arc<WorkerPool>,
    pub metrics_handle: Option<PrometheusHandle>,
}

fn monitor_routes() -> Router<AppState> {
    Router::new()
        // 队列
        .route("/queue/clear-failed", post(clear_failed))
        .route("/queue/details", get(queue_details))
        .route("/queue/metrics", get(queue_metrics))
        .route("/queue/retry-failed", post(retry_failed))
        // 定时任务
        .route("/scheduled/create", post(create_scheduled))
        .route("/scheduled/pause", post(pause_scheduled))
        .route("/scheduled/reset", post(reset_scheduled))
        .route("/scheduled/resume", post(resume_scheduled))
        // 调度器与系统
        .route("/scheduler/stats", get(scheduler_stats))
        .route("/system/status", get(system_status))
        // 单个任务
        .route("/task/status", get(task_status))
        .route("/task/submit", post(submit_task))
}

pub fn create_routes(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/task/monitor", monitor_routes());

    if state.metrics_handle.is_some() {
        router = router.route("/metrics", get(prometheus_metrics));
    }

    router.with_state(state)
}
