use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskq_core::{SchedulerConfig, TaskQueueError, TaskQueueResult};
use taskq_domain::{
    NewScheduledTask, ResetOptions, ScheduledStatus, ScheduledTask, Task, TaskId, TaskPayload,
    TaskPriority, TaskStatus, TaskStore,
};
use taskq_infrastructure::{MetricsCollector, PriorityQueueManager, StructuredLogger};
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cron_utils::CronScheduler;

/// 注册定时任务的请求
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub name: String,
    pub cron_expression: String,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
}

/// reset 操作结果
#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub task_id: TaskId,
    pub affected: usize,
    pub task_ids: Vec<TaskId>,
    pub skipped_in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextRun {
    pub task_id: TaskId,
    pub name: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
}

/// 调度器统计信息
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub total_tasks: usize,
    pub active_count: usize,
    pub paused_count: usize,
    /// 所有活跃定时任务中最近的一次触发时间
    pub next_run_time: Option<DateTime<Utc>>,
    pub fired_total: u64,
    pub fire_failures_total: u64,
    pub registered_task_ids: Vec<TaskId>,
    pub next_runs: Vec<NextRun>,
}

/// 定时任务调度器
///
/// 周期性检查到期的定时任务，为每次触发创建一个子任务并放入队列。
/// 触发、暂停、恢复、重置共用一把操作锁，避免暂停与触发交错。
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    queue: Arc<PriorityQueueManager>,
    config: SchedulerConfig,
    reset_options: ResetOptions,
    op_lock: Mutex<()>,
    running: AtomicBool,
    fired_total: AtomicU64,
    fire_failures_total: AtomicU64,
    metrics: MetricsCollector,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<PriorityQueueManager>,
        config: SchedulerConfig,
    ) -> TaskQueueResult<Self> {
        let reset_options = ResetOptions::from_names(
            &config.reset_statuses,
            config.reset_clears_error,
            config.reset_clears_retry_count,
        )?;

        Ok(Self {
            store,
            queue,
            config,
            reset_options,
            op_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            fired_total: AtomicU64::new(0),
            fire_failures_total: AtomicU64::new(0),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn reset_options(&self) -> &ResetOptions {
        &self.reset_options
    }

    /// 注册新的定时任务，状态为 Active，下次触发时间从当前时间计算
    pub async fn register(&self, request: ScheduleRequest) -> TaskQueueResult<ScheduledTask> {
        if request.payload.task_type.trim().is_empty() {
            return Err(TaskQueueError::Validation("task_type 不能为空".to_string()));
        }

        let cron = CronScheduler::new(&request.cron_expression)?;
        let next_run_time = cron.next_execution_time(Utc::now());

        let scheduled = self
            .store
            .create_scheduled(NewScheduledTask {
                name: request.name,
                cron_expression: request.cron_expression,
                priority: request.priority,
                payload: request.payload,
                next_run_time,
            })
            .await?;

        info!(
            "注册定时任务: {} (ID: {}), CRON: {}, 下次执行: {:?}",
            scheduled.name, scheduled.id, scheduled.cron_expression, scheduled.next_run_time
        );
        Ok(scheduled)
    }

    /// 运行调度循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!("定时调度器已启动，检查间隔: {}ms", self.config.tick_interval_ms);

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("定时调度器收到关闭信号");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        error!("定时调度检查失败: {}", e);
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("定时调度器已停止");
    }

    /// 触发所有在 `now` 之前到期的活跃定时任务，每个任务最多触发一次。
    /// 错过的多次触发合并为一次，下次触发时间从 `now` 重新计算
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TaskQueueResult<Vec<Task>> {
        let _guard = self.op_lock.lock().await;
        let due: Vec<ScheduledTask> = self
            .store
            .list_scheduled()
            .await?
            .into_iter()
            .filter(|scheduled| scheduled.is_due(now))
            .collect();

        if due.is_empty() {
            return Ok(Vec::new());
        }
        debug!("本轮到期的定时任务数量: {}", due.len());

        let mut fired = Vec::with_capacity(due.len());
        for scheduled in due {
            match self.fire(&scheduled, now).await {
                Ok(task) => {
                    self.fired_total.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_scheduled_firing(true);
                    fired.push(task);
                }
                Err(e) => {
                    self.fire_failures_total.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_scheduled_firing(false);
                    error!(
                        scheduled_task.id = scheduled.id,
                        "定时任务触发失败: {} - {}", scheduled.name, e
                    );
                }
            }
        }

        Ok(fired)
    }

    async fn fire(&self, scheduled: &ScheduledTask, now: DateTime<Utc>) -> TaskQueueResult<Task> {
        let cron = CronScheduler::new(&scheduled.cron_expression)?;
        if let Some(previous) = scheduled.next_run_time {
            let missed = cron.occurrences_between(previous, now, 1000);
            if missed > 0 {
                debug!(
                    scheduled_task.id = scheduled.id,
                    "合并 {} 次错过的触发", missed
                );
            }
        }
        let next_run_time = cron.next_execution_time(now);

        let child = self.store.create_task(scheduled.spawn_child()).await?;
        self.store
            .record_firing(scheduled.id, now, next_run_time)
            .await?;
        self.queue.enqueue(&child).await?;

        StructuredLogger::log_scheduled_task_fired(scheduled.id, child.id, next_run_time);
        Ok(child)
    }

    /// 暂停定时任务：停止后续触发，已派发的子任务不受影响
    pub async fn pause(&self, id: TaskId) -> TaskQueueResult<ScheduledTask> {
        let _guard = self.op_lock.lock().await;
        let scheduled = self.store.get_scheduled(id).await?;
        if scheduled.status == ScheduledStatus::Paused {
            return Err(TaskQueueError::InvalidState(format!(
                "定时任务 {id} 已处于暂停状态"
            )));
        }

        let paused = self
            .store
            .set_scheduled_status(id, ScheduledStatus::Paused, None)
            .await?;
        StructuredLogger::log_scheduled_task_paused(id);
        Ok(paused)
    }

    /// 恢复定时任务：从当前时间重新计算下次触发时间，不补触发暂停期间错过的执行
    pub async fn resume(&self, id: TaskId) -> TaskQueueResult<ScheduledTask> {
        let _guard = self.op_lock.lock().await;
        let scheduled = self.store.get_scheduled(id).await?;
        if scheduled.status != ScheduledStatus::Paused {
            return Err(TaskQueueError::InvalidState(format!(
                "定时任务 {id} 未处于暂停状态"
            )));
        }

        let now = Utc::now();
        let cron = CronScheduler::new(&scheduled.cron_expression)?;
        if let Some(last) = scheduled.last_run_time {
            let skipped = cron.occurrences_between(last, now, 1000);
            if skipped > 0 {
                info!("定时任务 {} 暂停期间跳过了 {} 次触发", id, skipped);
            }
        }

        let resumed = self
            .store
            .set_scheduled_status(id, ScheduledStatus::Active, cron.next_execution_time(now))
            .await?;
        StructuredLogger::log_scheduled_task_resumed(id, resumed.next_run_time);
        Ok(resumed)
    }

    /// 将定时任务下处于不一致状态的子任务重置为 Waiting 并重新入队。
    /// 正在 worker 上执行的子任务不会被重置
    pub async fn reset(&self, id: TaskId) -> TaskQueueResult<ResetReport> {
        let _guard = self.op_lock.lock().await;
        self.store.get_scheduled(id).await?;

        let in_flight: HashSet<TaskId> = self.queue.in_flight().snapshot();
        let skipped_in_flight = self
            .store
            .list_children(id)
            .await?
            .iter()
            .filter(|task| {
                self.reset_options.statuses.contains(&task.status) && in_flight.contains(&task.id)
            })
            .count();

        let options = self.reset_options.clone().with_excluded(in_flight);
        let task_ids = self.store.bulk_reset_children(id, &options).await?;

        for task_id in &task_ids {
            self.queue.remove_failed(*task_id).await;
            let task = self.store.get_task(*task_id).await?;
            if task.status == TaskStatus::Waiting {
                self.queue.enqueue(&task).await?;
            } else {
                warn!(task.id = task.id, "重置后的任务状态已变化: {}", task.status);
            }
        }

        StructuredLogger::log_scheduled_task_reset(id, task_ids.len(), skipped_in_flight);
        Ok(ResetReport {
            task_id: id,
            affected: task_ids.len(),
            task_ids,
            skipped_in_flight,
        })
    }

    pub async fn get(&self, id: TaskId) -> TaskQueueResult<ScheduledTask> {
        self.store.get_scheduled(id).await
    }

    pub async fn stats(&self) -> TaskQueueResult<SchedulerStats> {
        let scheduled = self.store.list_scheduled().await?;
        let active: Vec<&ScheduledTask> = scheduled.iter().filter(|s| s.is_active()).collect();

        Ok(SchedulerStats {
            running: self.is_running(),
            total_tasks: scheduled.len(),
            active_count: active.len(),
            paused_count: scheduled.len() - active.len(),
            next_run_time: active.iter().filter_map(|s| s.next_run_time).min(),
            fired_total: self.fired_total.load(Ordering::Relaxed),
            fire_failures_total: self.fire_failures_total.load(Ordering::Relaxed),
            registered_task_ids: active.iter().map(|s| s.id).collect(),
            next_runs: active
                .iter()
                .map(|s| NextRun {
                    task_id: s.id,
                    name: s.name.clone(),
                    next_run_time: s.next_run_time,
                    last_run_time: s.last_run_time,
                })
                .collect(),
        })
    }
}
