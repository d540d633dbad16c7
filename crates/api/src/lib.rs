//! # TaskQ API
//!
//! 任务队列的监控与管理接口，所有业务接口挂载在 `/task/monitor` 下，
//! 响应统一为 `{code, message, data}` 格式。
//!
//! ## API 端点
//!
//! ### 队列
//! - `GET /task/monitor/queue/metrics` - 队列与处理指标
//! - `GET /task/monitor/queue/details` - 各优先级队列详情
//! - `POST /task/monitor/queue/retry-failed?limit=N` - 重试失败队列中的任务
//! - `POST /task/monitor/queue/clear-failed` - 清空失败队列
//!
//! ### 定时任务
//! - `POST /task/monitor/scheduled/create` - 注册定时任务
//! - `POST /task/monitor/scheduled/pause?task_id=N` - 暂停
//! - `POST /task/monitor/scheduled/resume?task_id=N` - 恢复
//! - `POST /task/monitor/scheduled/reset?task_id=N` - 重置子任务
//!
//! ### 系统
//! - `GET /task/monitor/scheduler/stats` - 调度器统计
//! - `GET /task/monitor/system/status` - 系统状态
//! - `GET /task/monitor/task/status?task_id=N` - 任务状态与可执行操作
//! - `POST /task/monitor/task/submit` - 提交一次性任务
//! - `GET /health`、`GET /metrics`

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use taskq_core::ApiConfig;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer(api_config))
    } else {
        router
    }
}
