//! 领域仓储抽象
//!
//! 任务与定时任务的持久化接口。每个写操作对单个任务ID是原子的。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskq_core::TaskQueueResult;

use crate::entities::{
    NewScheduledTask, NewTask, ResetOptions, ScheduledStatus, ScheduledTask, Task,
    TaskCompletion, TaskId, TaskStatus,
};

/// 任务记录存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> TaskQueueResult<Task>;

    /// 未知ID返回 `TaskNotFound`
    async fn get_task(&self, id: TaskId) -> TaskQueueResult<Task>;

    /// 按状态机更新任务状态。流转不合法（包括已处于终态）时不做任何修改并返回 `false`
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> TaskQueueResult<bool> {
        let current = self.get_task(id).await?;
        if !current.status.can_transition_to(status) {
            return Ok(false);
        }

        match status {
            TaskStatus::Running => Ok(self.claim_task(id).await?.is_some()),
            TaskStatus::Waiting => Ok(self.mark_for_retry(id).await?.is_some()),
            TaskStatus::Success | TaskStatus::Failed => {
                let duration_ms = current
                    .started_at
                    .map(|started| (Utc::now() - started).num_milliseconds())
                    .unwrap_or(0);
                let completion = if status == TaskStatus::Success {
                    TaskCompletion::success(None, duration_ms)
                } else {
                    TaskCompletion::failure(error_message.unwrap_or_default(), duration_ms)
                };
                self.complete_task(id, completion).await
            }
            TaskStatus::Cancelled | TaskStatus::Paused => Ok(false),
        }
    }

    /// Waiting -> Running 的原子抢占，任务已不是 Waiting 时返回 `None`
    async fn claim_task(&self, id: TaskId) -> TaskQueueResult<Option<Task>>;

    /// Running -> Success/Failed，同时写入输出、错误信息与耗时
    async fn complete_task(&self, id: TaskId, completion: TaskCompletion)
        -> TaskQueueResult<bool>;

    /// Failed -> Waiting，retry_count 加一并清空错误信息
    async fn mark_for_retry(&self, id: TaskId) -> TaskQueueResult<Option<Task>>;

    async fn list_by_status(&self, status: TaskStatus) -> TaskQueueResult<Vec<Task>>;

    async fn list_children(&self, scheduled_task_id: TaskId) -> TaskQueueResult<Vec<Task>>;

    async fn count_by_status(&self) -> TaskQueueResult<HashMap<TaskStatus, u64>>;

    /// 将定时任务下处于不一致状态的子任务重置为 Waiting，返回被重置的任务ID
    async fn bulk_reset_children(
        &self,
        scheduled_task_id: TaskId,
        options: &ResetOptions,
    ) -> TaskQueueResult<Vec<TaskId>>;

    async fn create_scheduled(&self, task: NewScheduledTask) -> TaskQueueResult<ScheduledTask>;

    /// 未知ID返回 `ScheduledTaskNotFound`
    async fn get_scheduled(&self, id: TaskId) -> TaskQueueResult<ScheduledTask>;

    async fn list_scheduled(&self) -> TaskQueueResult<Vec<ScheduledTask>>;

    /// 记录一次触发：更新 last_run_time、next_run_time 并累加 execute_count
    async fn record_firing(
        &self,
        id: TaskId,
        fired_at: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> TaskQueueResult<ScheduledTask>;

    async fn set_scheduled_status(
        &self,
        id: TaskId,
        status: ScheduledStatus,
        next_run_time: Option<DateTime<Utc>>,
    ) -> TaskQueueResult<ScheduledTask>;

    async fn health_check(&self) -> TaskQueueResult<bool>;

    /// 关闭底层连接，之后的调用都会失败
    async fn close(&self) {}
}
