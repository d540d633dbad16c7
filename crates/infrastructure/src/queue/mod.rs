//! 多优先级任务队列
//!
//! 三个优先级队列（high / normal / low）加一个独立的失败队列。队列里只保存任务ID，
//! 任务状态以任务存储为准。同一优先级内按入队顺序 FIFO，不同优先级之间严格按优先级出队。

mod in_flight;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskq_core::{QueueConfig, TaskQueueError, TaskQueueResult};
use taskq_domain::{Task, TaskId, TaskPriority, TaskStatus, TaskStore};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, warn};

use crate::observability::{MetricsCollector, StructuredLogger};

pub use in_flight::{InFlightGuard, InFlightTracker};

/// 队列详情中最多列出的任务ID数量
const DETAIL_SAMPLE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    task_id: TaskId,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    high: VecDeque<QueueEntry>,
    normal: VecDeque<QueueEntry>,
    low: VecDeque<QueueEntry>,
    /// 优先级队列中的任务ID，防止同一任务被重复入队
    queued: HashSet<TaskId>,
    failed: VecDeque<QueueEntry>,
    failed_ids: HashSet<TaskId>,
}

impl QueueState {
    fn level(&self, priority: TaskPriority) -> &VecDeque<QueueEntry> {
        match priority {
            TaskPriority::High => &self.high,
            TaskPriority::Normal => &self.normal,
            TaskPriority::Low => &self.low,
        }
    }

    fn level_mut(&mut self, priority: TaskPriority) -> &mut VecDeque<QueueEntry> {
        match priority {
            TaskPriority::High => &mut self.high,
            TaskPriority::Normal => &mut self.normal,
            TaskPriority::Low => &mut self.low,
        }
    }

    fn pending_len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued_total: AtomicU64,
    processed_total: AtomicU64,
    failed_total: AtomicU64,
    retried_total: AtomicU64,
}

/// 队列聚合指标
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub high_queue_length: usize,
    pub normal_queue_length: usize,
    pub low_queue_length: usize,
    pub failed_queue_length: usize,
    /// 三个优先级队列的总长度
    pub queue_length: usize,
    pub enqueued_total: u64,
    pub processed_total: u64,
    pub failed_total: u64,
    pub retried_total: u64,
    pub active_workers: usize,
    pub last_process_time: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDetail {
    pub name: String,
    pub length: usize,
    pub head_enqueued_at: Option<DateTime<Utc>>,
    pub head_age_seconds: Option<i64>,
    pub tail_age_seconds: Option<i64>,
    /// 队首起的部分任务ID
    pub task_ids: Vec<TaskId>,
}

impl QueueDetail {
    fn from_entries(name: &str, entries: &VecDeque<QueueEntry>, now: DateTime<Utc>) -> Self {
        let age = |entry: &QueueEntry| (now - entry.enqueued_at).num_seconds().max(0);
        Self {
            name: name.to_string(),
            length: entries.len(),
            head_enqueued_at: entries.front().map(|entry| entry.enqueued_at),
            head_age_seconds: entries.front().map(age),
            tail_age_seconds: entries.back().map(age),
            task_ids: entries
                .iter()
                .take(DETAIL_SAMPLE_SIZE)
                .map(|entry| entry.task_id)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDetails {
    pub queues: Vec<QueueDetail>,
    pub failed_queue: QueueDetail,
    pub failed_queue_capacity: Option<usize>,
    pub generated_at: DateTime<Utc>,
}

/// 失败队列重试结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    pub limit: usize,
    pub retried: usize,
    pub task_ids: Vec<TaskId>,
    pub errors: Vec<String>,
}

/// 将请求的重试数量约束到 `[1, max]`，缺省或非正数使用默认值
pub fn clamp_retry_limit(limit: Option<i64>, default_limit: usize, max_limit: usize) -> usize {
    match limit {
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(max_limit).min(max_limit),
        _ => default_limit.min(max_limit),
    }
}

/// 优先级队列管理器
pub struct PriorityQueueManager {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    counters: QueueCounters,
    last_process_time: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
    in_flight: InFlightTracker,
    metrics: MetricsCollector,
}

impl PriorityQueueManager {
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            counters: QueueCounters::default(),
            last_process_time: Mutex::new(None),
            running: AtomicBool::new(false),
            in_flight: InFlightTracker::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn clamp_retry_limit(&self, limit: Option<i64>) -> usize {
        clamp_retry_limit(
            limit,
            self.config.default_retry_limit,
            self.config.max_retry_limit,
        )
    }

    /// 将 Waiting 状态的任务追加到对应优先级队列的末尾。
    /// 任务已在队列中时不重复入队，返回 `false`
    pub async fn enqueue(&self, task: &Task) -> TaskQueueResult<bool> {
        if task.status != TaskStatus::Waiting {
            return Err(TaskQueueError::InvalidState(format!(
                "只有等待中的任务可以入队，任务 {} 当前状态: {}",
                task.id, task.status
            )));
        }

        let queue_length = {
            let mut state = self.state.lock().await;
            if !state.queued.insert(task.id) {
                debug!(task.id = task.id, "任务已在队列中，忽略重复入队");
                return Ok(false);
            }

            let level = state.level_mut(task.priority);
            level.push_back(QueueEntry {
                task_id: task.id,
                enqueued_at: Utc::now(),
            });
            let level_len = level.len();
            self.metrics.update_queue_depth(task.priority, level_len);
            level_len
        };

        self.counters.enqueued_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_enqueued(task.priority);
        StructuredLogger::log_task_enqueued(task.id, task.priority, queue_length);

        self.notify.notify_one();
        Ok(true)
    }

    /// 取出优先级最高、入队最早的任务，队列为空时立即返回 `None`
    pub async fn dequeue(&self) -> Option<TaskId> {
        let mut state = self.state.lock().await;
        for priority in TaskPriority::DISPATCH_ORDER {
            let level = state.level_mut(priority);
            if let Some(entry) = level.pop_front() {
                let level_len = level.len();
                state.queued.remove(&entry.task_id);
                self.metrics.update_queue_depth(priority, level_len);
                return Some(entry.task_id);
            }
        }
        None
    }

    /// worker 使用的阻塞出队：没有任务时等待入队通知，最长等待一个空闲轮询间隔。
    /// 收到关闭信号后不再取出新任务，返回 `None`，剩余任务留在队列中
    pub async fn dequeue_wait(&self, shutdown: &mut broadcast::Receiver<()>) -> Option<TaskId> {
        let poll_interval = Duration::from_millis(self.config.idle_poll_interval_ms);
        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                // 已收到信号、通道关闭或消息积压都视为关闭
                _ => return None,
            }

            if let Some(task_id) = self.dequeue().await {
                return Some(task_id);
            }

            tokio::select! {
                _ = shutdown.recv() => return None,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// 将失败任务放入失败队列，不会自动重试
    pub async fn enqueue_failed(&self, task_id: TaskId) -> TaskQueueResult<()> {
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Failed {
            return Err(TaskQueueError::InvalidState(format!(
                "只有失败的任务可以进入失败队列，任务 {} 当前状态: {}",
                task_id, task.status
            )));
        }

        let failed_len = {
            let mut state = self.state.lock().await;
            if !state.failed_ids.insert(task_id) {
                return Ok(());
            }

            let capacity = self.config.failed_queue_capacity;
            if capacity > 0 && state.failed.len() >= capacity {
                if let Some(evicted) = state.failed.pop_front() {
                    state.failed_ids.remove(&evicted.task_id);
                    warn!(
                        task.id = evicted.task_id,
                        capacity = capacity,
                        "失败队列已满，丢弃最早的失败任务"
                    );
                }
            }

            state.failed.push_back(QueueEntry {
                task_id,
                enqueued_at: Utc::now(),
            });
            state.failed.len()
        };

        self.metrics.update_failed_queue_depth(failed_len);
        StructuredLogger::log_task_moved_to_failed_queue(task_id, failed_len);
        Ok(())
    }

    /// 从失败队列取出最多 `limit` 个任务，重置为 Waiting 后按原优先级重新入队
    pub async fn retry_failed(&self, limit: Option<i64>) -> TaskQueueResult<RetryReport> {
        let limit = self.clamp_retry_limit(limit);
        let entries: Vec<QueueEntry> = {
            let mut state = self.state.lock().await;
            let count = limit.min(state.failed.len());
            let drained: Vec<QueueEntry> = state.failed.drain(..count).collect();
            for entry in &drained {
                state.failed_ids.remove(&entry.task_id);
            }
            self.metrics.update_failed_queue_depth(state.failed.len());
            drained
        };

        let mut report = RetryReport {
            limit,
            ..RetryReport::default()
        };

        for entry in entries {
            match self.store.mark_for_retry(entry.task_id).await {
                Ok(Some(task)) => match self.enqueue(&task).await {
                    Ok(_) => {
                        report.retried += 1;
                        report.task_ids.push(task.id);
                    }
                    Err(e) => report
                        .errors
                        .push(format!("任务 {} 重新入队失败: {}", task.id, e)),
                },
                Ok(None) => {
                    report
                        .errors
                        .push(format!("任务 {} 已不是失败状态，跳过重试", entry.task_id));
                }
                Err(e) => {
                    warn!(task.id = entry.task_id, error = %e, "重试失败任务时出错，放回失败队列");
                    self.restore_failed(entry).await;
                    report
                        .errors
                        .push(format!("任务 {} 重试失败: {}", entry.task_id, e));
                }
            }
        }

        self.counters
            .retried_total
            .fetch_add(report.retried as u64, Ordering::Relaxed);
        self.metrics.record_retried(report.retried);
        StructuredLogger::log_failed_queue_retried(limit, report.retried, report.errors.len());
        Ok(report)
    }

    /// 存储出错时把取出的条目放回失败队列，保留原入队时间
    async fn restore_failed(&self, entry: QueueEntry) {
        let mut state = self.state.lock().await;
        if state.failed_ids.insert(entry.task_id) {
            state.failed.push_back(entry);
            self.metrics.update_failed_queue_depth(state.failed.len());
        }
    }

    /// 清空失败队列，任务记录保持 Failed 状态
    pub async fn clear_failed(&self) -> usize {
        let cleared = {
            let mut state = self.state.lock().await;
            let cleared = state.failed.len();
            state.failed.clear();
            state.failed_ids.clear();
            cleared
        };

        self.metrics.update_failed_queue_depth(0);
        StructuredLogger::log_failed_queue_cleared(cleared);
        cleared
    }

    pub async fn remove_failed(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        if !state.failed_ids.remove(&task_id) {
            return false;
        }
        state.failed.retain(|entry| entry.task_id != task_id);
        self.metrics.update_failed_queue_depth(state.failed.len());
        true
    }

    pub async fn is_failed_queued(&self, task_id: TaskId) -> bool {
        self.state.lock().await.failed_ids.contains(&task_id)
    }

    pub async fn is_queued(&self, task_id: TaskId) -> bool {
        self.state.lock().await.queued.contains(&task_id)
    }

    /// worker 完成一次执行后调用
    pub async fn record_completion(&self, success: bool) {
        self.counters.processed_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.counters.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_process_time.lock().await = Some(Utc::now());
    }

    pub async fn metrics(&self) -> QueueMetrics {
        let (high, normal, low, failed, pending) = {
            let state = self.state.lock().await;
            (
                state.high.len(),
                state.normal.len(),
                state.low.len(),
                state.failed.len(),
                state.pending_len(),
            )
        };

        QueueMetrics {
            high_queue_length: high,
            normal_queue_length: normal,
            low_queue_length: low,
            failed_queue_length: failed,
            queue_length: pending,
            enqueued_total: self.counters.enqueued_total.load(Ordering::Relaxed),
            processed_total: self.counters.processed_total.load(Ordering::Relaxed),
            failed_total: self.counters.failed_total.load(Ordering::Relaxed),
            retried_total: self.counters.retried_total.load(Ordering::Relaxed),
            active_workers: self.in_flight.len(),
            last_process_time: *self.last_process_time.lock().await,
            running: self.is_running(),
        }
    }

    pub async fn details(&self) -> QueueDetails {
        let now = Utc::now();
        let state = self.state.lock().await;
        let queues = TaskPriority::DISPATCH_ORDER
            .iter()
            .map(|priority| QueueDetail::from_entries(priority.as_str(), state.level(*priority), now))
            .collect();

        QueueDetails {
            queues,
            failed_queue: QueueDetail::from_entries("failed", &state.failed, now),
            failed_queue_capacity: match self.config.failed_queue_capacity {
                0 => None,
                capacity => Some(capacity),
            },
            generated_at: now,
        }
    }
}
