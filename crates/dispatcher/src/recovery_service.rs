use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskq_core::TaskQueueResult;
use taskq_domain::{ScheduledStatus, TaskCompletion, TaskId, TaskStatus, TaskStore};
use taskq_infrastructure::PriorityQueueManager;
use tracing::{error, info, warn};

use crate::cron_utils::CronScheduler;

pub const INTERRUPTED_ERROR_MESSAGE: &str = "interrupted by restart";

/// 恢复报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// 重新放入优先级队列的 Waiting 任务
    pub requeued: Vec<TaskId>,
    /// 上次进程退出时仍处于 Running、被标记为失败的任务
    pub interrupted: Vec<TaskId>,
    /// 重新计算了下次触发时间的定时任务
    pub rescheduled: Vec<TaskId>,
    pub recovery_duration_ms: u64,
    pub errors: Vec<String>,
}

/// 启动时的状态恢复
///
/// 队列只存在于内存中，进程重启后需要根据存储中的任务状态重建。
/// 必须在 worker 启动之前执行一次。
pub struct RecoveryService {
    store: Arc<dyn TaskStore>,
    queue: Arc<PriorityQueueManager>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<PriorityQueueManager>) -> Self {
        Self { store, queue }
    }

    pub async fn recover(&self, now: DateTime<Utc>) -> TaskQueueResult<RecoveryReport> {
        let started = Instant::now();
        info!("开始系统状态恢复");

        let mut report = RecoveryReport::default();
        self.requeue_waiting(&mut report).await?;
        self.fail_interrupted(&mut report).await?;
        self.reschedule_active(now, &mut report).await?;

        report.recovery_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "系统状态恢复完成，重新入队: {}，中断任务: {}，重新计算触发时间: {}，错误: {}，耗时: {}ms",
            report.requeued.len(),
            report.interrupted.len(),
            report.rescheduled.len(),
            report.errors.len(),
            report.recovery_duration_ms
        );
        Ok(report)
    }

    async fn requeue_waiting(&self, report: &mut RecoveryReport) -> TaskQueueResult<()> {
        for task in self.store.list_by_status(TaskStatus::Waiting).await? {
            match self.queue.enqueue(&task).await {
                Ok(true) => report.requeued.push(task.id),
                Ok(false) => {}
                Err(e) => {
                    error!("恢复等待任务 {} 失败: {}", task.id, e);
                    report.errors.push(format!("task {}: {}", task.id, e));
                }
            }
        }
        Ok(())
    }

    async fn fail_interrupted(&self, report: &mut RecoveryReport) -> TaskQueueResult<()> {
        for task in self.store.list_by_status(TaskStatus::Running).await? {
            warn!("任务 {} 在上次运行中被中断，标记为失败", task.id);
            let duration_ms = task
                .started_at
                .map(|started| (Utc::now() - started).num_milliseconds())
                .unwrap_or(0);

            let result: TaskQueueResult<bool> = async {
                if self
                    .store
                    .complete_task(
                        task.id,
                        TaskCompletion::failure(INTERRUPTED_ERROR_MESSAGE, duration_ms),
                    )
                    .await?
                {
                    self.queue.enqueue_failed(task.id).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            .await;

            match result {
                Ok(true) => report.interrupted.push(task.id),
                Ok(false) => {}
                Err(e) => {
                    error!("处理中断任务 {} 失败: {}", task.id, e);
                    report.errors.push(format!("task {}: {}", task.id, e));
                }
            }
        }
        Ok(())
    }

    async fn reschedule_active(
        &self,
        now: DateTime<Utc>,
        report: &mut RecoveryReport,
    ) -> TaskQueueResult<()> {
        for scheduled in self.store.list_scheduled().await? {
            if scheduled.status != ScheduledStatus::Active {
                continue;
            }

            let result = match CronScheduler::new(&scheduled.cron_expression) {
                Ok(cron) => {
                    self.store
                        .set_scheduled_status(
                            scheduled.id,
                            ScheduledStatus::Active,
                            cron.next_execution_time(now),
                        )
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(_) => report.rescheduled.push(scheduled.id),
                Err(e) => {
                    error!("重新计算定时任务 {} 的触发时间失败: {}", scheduled.id, e);
                    report.errors.push(format!("scheduled task {}: {}", scheduled.id, e));
                }
            }
        }
        Ok(())
    }
}
