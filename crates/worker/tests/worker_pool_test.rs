use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use taskq_core::{QueueConfig, TaskQueueError, TaskQueueResult, WorkerConfig};
use taskq_domain::{NewTask, Task, TaskId, TaskPayload, TaskPriority, TaskStatus, TaskStore};
use taskq_infrastructure::{InMemoryTaskStore, PriorityQueueManager};
use taskq_worker::{
    HandlerRegistry, NoopHandler, TaskContext, TaskHandler, TaskOutcome, WorkerPool,
    NO_HANDLER_ERROR,
};
use tokio::sync::{broadcast, Mutex};

/// 按配置返回不同结果的测试处理器
struct ScriptedHandler {
    name: &'static str,
    behavior: Behavior,
    seen: Arc<Mutex<Vec<TaskId>>>,
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    ReportFailure,
    ReturnError,
    Sleep(u64),
    Panic,
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, context: &TaskContext) -> TaskQueueResult<TaskOutcome> {
        self.seen.lock().await.push(context.task_id);
        match self.behavior {
            Behavior::Succeed => Ok(TaskOutcome::success(Some("done".to_string()))),
            Behavior::ReportFailure => Ok(TaskOutcome::failure("exit code 2")),
            Behavior::ReturnError => Err(TaskQueueError::TaskExecution("connection refused".into())),
            Behavior::Sleep(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(TaskOutcome::success(None))
            }
            Behavior::Panic => panic!("boom"),
        }
    }
}

struct Harness {
    store: Arc<dyn TaskStore>,
    queue: Arc<PriorityQueueManager>,
    pool: WorkerPool,
    seen: Arc<Mutex<Vec<TaskId>>>,
}

async fn harness(max_workers: usize, execution_timeout_seconds: u64) -> Harness {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let queue = Arc::new(PriorityQueueManager::new(
        store.clone(),
        QueueConfig {
            idle_poll_interval_ms: 20,
            ..QueueConfig::default()
        },
    ));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(NoopHandler)).await;
    for (name, behavior) in [
        ("ok", Behavior::Succeed),
        ("fails", Behavior::ReportFailure),
        ("errors", Behavior::ReturnError),
        ("slow", Behavior::Sleep(5_000)),
        ("short", Behavior::Sleep(100)),
        ("panics", Behavior::Panic),
    ] {
        registry
            .register(Arc::new(ScriptedHandler {
                name,
                behavior,
                seen: seen.clone(),
            }))
            .await;
    }

    let pool = WorkerPool::new(
        queue.clone(),
        registry,
        WorkerConfig {
            max_workers,
            execution_timeout_seconds,
            shutdown_timeout_seconds: 5,
            ..WorkerConfig::default()
        },
    );

    Harness {
        store,
        queue,
        pool,
        seen,
    }
}

async fn submit(h: &Harness, task_type: &str, priority: TaskPriority) -> Task {
    let task = h
        .store
        .create_task(
            NewTask::new(task_type, TaskPayload::new(task_type, json!({}))).with_priority(priority),
        )
        .await
        .unwrap();
    h.queue.enqueue(&task).await.unwrap();
    task
}

async fn wait_for_terminal(store: &Arc<dyn TaskStore>, id: TaskId) -> Task {
    for _ in 0..200 {
        let task = store.get_task(id).await.unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {id} did not finish in time");
}

#[tokio::test]
async fn test_success_path() {
    let h = harness(1, 10).await;
    let task = submit(&h, "ok", TaskPriority::Normal).await;

    assert!(h.pool.process(0, task.id).await);

    let done = h.store.get_task(task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Success);
    assert_eq!(done.output.as_deref(), Some("done"));
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());
    assert!(!h.queue.is_failed_queued(task.id).await);
    assert_eq!(h.queue.metrics().await.processed_total, 1);
}

#[tokio::test]
async fn test_reported_failure_goes_to_failed_queue() {
    let h = harness(1, 10).await;
    let task = submit(&h, "fails", TaskPriority::Normal).await;
    h.pool.process(0, task.id).await;

    let failed = h.store.get_task(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("handler reported failure: exit code 2")
    );
    assert_eq!(failed.retry_count, 0);
    assert!(h.queue.is_failed_queued(task.id).await);
    assert_eq!(h.queue.metrics().await.failed_total, 1);
}

#[tokio::test]
async fn test_error_timeout_and_panic_have_distinct_messages() {
    let h = harness(1, 1).await;
    let errors = submit(&h, "errors", TaskPriority::Normal).await;
    let slow = submit(&h, "slow", TaskPriority::Normal).await;
    let panics = submit(&h, "panics", TaskPriority::Normal).await;
    let unknown = submit(&h, "unregistered", TaskPriority::Normal).await;

    for task in [&errors, &slow, &panics, &unknown] {
        h.pool.process(0, task.id).await;
    }

    let message = |task: Task| task.error_message.unwrap_or_default();
    let errors = h.store.get_task(errors.id).await.unwrap();
    let slow = h.store.get_task(slow.id).await.unwrap();
    let panics = h.store.get_task(panics.id).await.unwrap();
    let unknown = h.store.get_task(unknown.id).await.unwrap();

    for task in [&errors, &slow, &panics, &unknown] {
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(h.queue.is_failed_queued(task.id).await);
    }

    assert!(message(errors).starts_with("handler error: "));
    assert_eq!(message(slow), "execution timed out after 1s");
    assert_eq!(message(panics), "handler panicked: boom");
    assert!(message(unknown).starts_with(NO_HANDLER_ERROR));
}

#[tokio::test]
async fn test_task_is_not_executed_twice() {
    let h = harness(1, 10).await;
    let task = submit(&h, "ok", TaskPriority::Normal).await;

    let guard = h.queue.in_flight().try_begin(task.id).unwrap();
    assert!(!h.pool.process(0, task.id).await);
    assert!(h.queue.is_queued(task.id).await);
    drop(guard);

    assert!(h.pool.process(0, task.id).await);
    // 已经不是 Waiting，第二次抢占失败
    assert!(!h.pool.process(0, task.id).await);
    assert_eq!(h.seen.lock().await.as_slice(), &[task.id]);
}

#[tokio::test]
async fn test_pool_drains_queue_in_priority_order() {
    let h = harness(1, 10).await;
    let low = submit(&h, "ok", TaskPriority::Low).await;
    let normal = submit(&h, "ok", TaskPriority::Normal).await;
    let high = submit(&h, "ok", TaskPriority::High).await;

    let (tx, _rx) = broadcast::channel(1);
    h.pool.start(&tx).await;
    assert!(h.pool.is_running());

    wait_for_terminal(&h.store, low.id).await;
    assert_eq!(
        h.seen.lock().await.as_slice(),
        &[high.id, normal.id, low.id]
    );

    tx.send(()).unwrap();
    h.pool.stop().await;
    assert!(!h.pool.is_running());
    assert!(h.pool.status().in_flight.is_empty());
}

#[tokio::test]
async fn test_pool_picks_up_tasks_submitted_after_start() {
    let h = harness(2, 10).await;
    let (tx, _rx) = broadcast::channel(1);
    h.pool.start(&tx).await;
    assert_eq!(h.pool.status().size, 2);

    let tasks = [
        submit(&h, "noop", TaskPriority::Normal).await,
        submit(&h, "noop", TaskPriority::High).await,
        submit(&h, "fails", TaskPriority::Low).await,
    ];
    for task in &tasks {
        wait_for_terminal(&h.store, task.id).await;
    }

    let metrics = h.queue.metrics().await;
    assert_eq!(metrics.processed_total, 3);
    assert_eq!(metrics.failed_total, 1);
    assert_eq!(metrics.failed_queue_length, 1);

    tx.send(()).unwrap();
    h.pool.stop().await;
}

#[tokio::test]
async fn test_dequeued_task_blocked_by_in_flight_is_requeued() {
    let h = harness(1, 10).await;
    let task = submit(&h, "ok", TaskPriority::High).await;

    // 上一次执行还未释放时，重试后的任务被另一个 worker 取出
    let guard = h.queue.in_flight().try_begin(task.id).unwrap();
    assert_eq!(h.queue.dequeue().await, Some(task.id));
    assert!(!h.pool.process(1, task.id).await);
    drop(guard);

    assert!(h.queue.is_queued(task.id).await);
    assert_eq!(
        h.store.get_task(task.id).await.unwrap().status,
        TaskStatus::Waiting
    );
    assert_eq!(h.queue.dequeue().await, Some(task.id));
    assert!(h.pool.process(0, task.id).await);
}

#[tokio::test]
async fn test_shutdown_leaves_backlog_queued() {
    let h = harness(1, 10).await;
    let mut tasks = Vec::new();
    for _ in 0..10 {
        tasks.push(submit(&h, "short", TaskPriority::Normal).await);
    }

    let (tx, _rx) = broadcast::channel(1);
    h.pool.start(&tx).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();
    h.pool.stop().await;

    let mut completed = 0;
    let mut waiting = 0;
    for task in &tasks {
        match h.store.get_task(task.id).await.unwrap().status {
            TaskStatus::Success => completed += 1,
            TaskStatus::Waiting => waiting += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    // 只有关闭时正在执行的任务会完成，其余留在队列中
    assert!(completed <= 1);
    assert_eq!(completed + waiting, 10);
    assert_eq!(h.queue.metrics().await.queue_length, waiting);
    assert!(h.seen.lock().await.len() <= 1);
}
