use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use taskq_core::WorkerConfig;
use taskq_domain::{Task, TaskCompletion, TaskId, TaskStatus, TaskStore};
use taskq_infrastructure::{MetricsCollector, PriorityQueueManager, StructuredLogger};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::handler::{HandlerRegistry, TaskContext, TaskOutcome};

pub const NO_HANDLER_ERROR: &str = "no handler registered for task type";

/// Worker池状态
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStatus {
    pub running: bool,
    pub size: usize,
    pub active: usize,
    pub in_flight: Vec<TaskId>,
    pub execution_timeout_seconds: u64,
}

/// 所有 worker 共享的执行环境
struct WorkerContext {
    store: Arc<dyn TaskStore>,
    queue: Arc<PriorityQueueManager>,
    registry: Arc<HandlerRegistry>,
    execution_timeout: Option<Duration>,
    name_prefix: String,
    metrics: MetricsCollector,
}

/// 固定大小的 worker 池
///
/// 每个 worker 循环执行：出队 -> 标记 Running -> 调用处理器 -> 写回 Success/Failed。
/// 失败的任务进入失败队列，不会自动重试。
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    config: WorkerConfig,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<PriorityQueueManager>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let name_prefix = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let execution_timeout = (config.execution_timeout_seconds > 0)
            .then_some(Duration::from_secs(config.execution_timeout_seconds));

        Self {
            context: Arc::new(WorkerContext {
                store: queue.store().clone(),
                queue,
                registry,
                execution_timeout,
                name_prefix,
                metrics: MetricsCollector::new(),
            }),
            config,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 启动 `max_workers` 个 worker，收到关闭信号后各自退出
    pub async fn start(&self, shutdown: &broadcast::Sender<()>) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("Worker池已经启动");
            return;
        }

        for worker_id in 0..self.config.max_workers {
            let context = self.context.clone();
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                context.run_worker(worker_id, rx).await;
            }));
        }

        self.running.store(true, Ordering::SeqCst);
        self.context.queue.set_running(true);
        info!(
            "Worker池已启动: {} 个worker, 执行超时: {}s",
            self.config.max_workers, self.config.execution_timeout_seconds
        );
    }

    /// 等待所有 worker 退出，最长等待 `shutdown_timeout_seconds`。
    /// 调用前需先发送关闭信号
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        if handles.is_empty() {
            return;
        }

        let timeout = Duration::from_secs(self.config.shutdown_timeout_seconds);
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Worker退出异常: {}", e);
                    }
                }
                info!("所有worker已停止");
            }
            Err(_) => {
                warn!(
                    "等待worker退出超时({}s)，强制终止剩余的 {} 个执行",
                    self.config.shutdown_timeout_seconds,
                    self.context.queue.in_flight().len()
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.context.queue.set_running(false);
    }

    pub fn status(&self) -> WorkerPoolStatus {
        let mut in_flight: Vec<TaskId> = self
            .context
            .queue
            .in_flight()
            .snapshot()
            .into_iter()
            .collect();
        in_flight.sort_unstable();

        WorkerPoolStatus {
            running: self.is_running(),
            size: self.config.max_workers,
            active: in_flight.len(),
            in_flight,
            execution_timeout_seconds: self.config.execution_timeout_seconds,
        }
    }

    /// 执行单个任务，不经过队列。返回 `false` 表示任务未被执行
    pub async fn process(&self, worker_id: usize, task_id: TaskId) -> bool {
        self.context.process(worker_id, task_id).await
    }
}

impl WorkerContext {
    fn worker_name(&self, worker_id: usize) -> String {
        format!("{}-worker-{}", self.name_prefix, worker_id)
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        debug!("{} 已启动", self.worker_name(worker_id));
        while let Some(task_id) = self.queue.dequeue_wait(&mut shutdown).await {
            self.process(worker_id, task_id).await;
        }
        debug!("{} 已退出", self.worker_name(worker_id));
    }

    async fn process(&self, worker_id: usize, task_id: TaskId) -> bool {
        let Some(guard) = self.queue.in_flight().try_begin(task_id) else {
            // 上一次执行尚未收尾时任务已被重试入队，放回队列等待下一轮
            debug!(task.id = task_id, "任务正在其他worker上执行，放回队列");
            tokio::task::yield_now().await;
            self.requeue(task_id).await;
            return false;
        };

        let task = match self.store.claim_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task.id = task_id, "任务入队后状态已变化，丢弃");
                return false;
            }
            Err(e) => {
                error!(task.id = task_id, "标记任务为执行中失败: {}", e);
                drop(guard);
                self.requeue(task_id).await;
                return false;
            }
        };

        let task_type = task.payload.task_type.clone();
        self.metrics.update_active_workers(self.queue.in_flight().len());
        StructuredLogger::log_task_execution_start(task.id, &task_type, worker_id);

        let started = Instant::now();
        let outcome = self.execute(&task, worker_id).await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as i64;

        let completion = if outcome.success {
            TaskCompletion {
                output: outcome.output.clone(),
                ..TaskCompletion::success(None, duration_ms)
            }
        } else {
            TaskCompletion {
                output: outcome.output.clone(),
                ..TaskCompletion::failure(
                    outcome.error_message.clone().unwrap_or_default(),
                    duration_ms,
                )
            }
        };

        match self.store.complete_task(task.id, completion).await {
            Ok(true) => {
                if !outcome.success {
                    if let Err(e) = self.queue.enqueue_failed(task.id).await {
                        error!(task.id = task.id, "放入失败队列失败: {}", e);
                    }
                }
                self.queue.record_completion(outcome.success).await;
            }
            Ok(false) => {
                warn!(task.id = task.id, "任务执行期间状态被修改，丢弃执行结果");
            }
            Err(e) => {
                error!(task.id = task.id, "写回任务执行结果失败: {}", e);
            }
        }

        self.metrics
            .record_task_execution(&task_type, outcome.success, elapsed.as_secs_f64());
        StructuredLogger::log_task_execution_complete(
            task.id,
            &task_type,
            worker_id,
            outcome.success,
            duration_ms,
            outcome.error_message.as_deref(),
        );

        drop(guard);
        self.metrics.update_active_workers(self.queue.in_flight().len());
        true
    }

    /// 出队后未能执行的任务，若仍是 Waiting 则重新入队
    async fn requeue(&self, task_id: TaskId) {
        let task = match self.store.get_task(task_id).await {
            Ok(task) if task.status == TaskStatus::Waiting => task,
            Ok(_) => return,
            Err(e) => {
                warn!(task.id = task_id, "任务未能执行且无法读取记录，需重启后恢复: {}", e);
                return;
            }
        };

        if let Err(e) = self.queue.enqueue(&task).await {
            warn!(task.id = task_id, "任务未能执行且重新入队失败，需重启后恢复: {}", e);
        }
    }

    /// 在独立的 tokio 任务中运行处理器，超时与 panic 都转换为失败结果
    async fn execute(&self, task: &Task, worker_id: usize) -> TaskOutcome {
        let task_type = &task.payload.task_type;
        let Some(handler) = self.registry.get(task_type).await else {
            return TaskOutcome::failure(format!("{NO_HANDLER_ERROR}: {task_type}"));
        };

        let context = TaskContext::from_task(
            task,
            self.execution_timeout.map(|t| t.as_secs()).unwrap_or(0),
            self.worker_name(worker_id),
        );
        let handle = tokio::spawn(async move { handler.handle(&context).await });
        let abort = handle.abort_handle();

        let joined = match self.execution_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return TaskOutcome::failure(format!(
                        "execution timed out after {}s",
                        limit.as_secs()
                    ));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(outcome)) if outcome.success => outcome,
            Ok(Ok(outcome)) => TaskOutcome {
                success: false,
                error_message: Some(format!(
                    "handler reported failure: {}",
                    outcome
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string())
                )),
                output: outcome.output,
            },
            Ok(Err(e)) => TaskOutcome::failure(format!("handler error: {e}")),
            Err(e) if e.is_panic() => {
                TaskOutcome::failure(format!("handler panicked: {}", panic_message(e.into_panic())))
            }
            Err(e) => TaskOutcome::failure(format!("handler error: {e}")),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
