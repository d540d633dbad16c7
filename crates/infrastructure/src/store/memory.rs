use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskq_core::{TaskQueueError, TaskQueueResult};
use taskq_domain::{
    NewScheduledTask, NewTask, ResetOptions, ScheduledStatus, ScheduledTask, Task,
    TaskCompletion, TaskId, TaskStatus, TaskStore,
};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存任务存储
///
/// 任务与定时任务共用一个自增ID序列。进程退出后数据丢失，适用于单机部署与测试。
#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    scheduled: RwLock<HashMap<TaskId, ScheduledTask>>,
    next_id: AtomicI64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            scheduled: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn collect_tasks<F>(&self, filter: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks.values().filter(|task| filter(task)).cloned().collect();
        matched.sort_by_key(|task| task.id);
        matched
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: NewTask) -> TaskQueueResult<Task> {
        let task = task.into_task(self.allocate_id(), Utc::now());
        self.tasks.write().await.insert(task.id, task.clone());
        debug!(task.id = task.id, "任务记录已创建");
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> TaskQueueResult<Task> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskQueueError::TaskNotFound { id })
    }

    async fn claim_task(&self, id: TaskId) -> TaskQueueResult<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskQueueError::TaskNotFound { id })?;

        if task.status != TaskStatus::Waiting {
            return Ok(None);
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.finished_at = None;
        Ok(Some(task.clone()))
    }

    async fn complete_task(
        &self,
        id: TaskId,
        completion: TaskCompletion,
    ) -> TaskQueueResult<bool> {
        if !matches!(completion.status, TaskStatus::Success | TaskStatus::Failed) {
            return Err(TaskQueueError::Validation(format!(
                "任务只能以 success 或 failed 结束，收到: {}",
                completion.status
            )));
        }

        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskQueueError::TaskNotFound { id })?;

        if task.status != TaskStatus::Running {
            return Ok(false);
        }

        task.status = completion.status;
        task.output = completion.output;
        task.error_message = completion.error_message;
        task.duration_ms = Some(completion.duration_ms);
        task.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_for_retry(&self, id: TaskId) -> TaskQueueResult<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskQueueError::TaskNotFound { id })?;

        if task.status != TaskStatus::Failed {
            return Ok(None);
        }

        task.status = TaskStatus::Waiting;
        task.retry_count += 1;
        task.error_message = None;
        task.started_at = None;
        task.finished_at = None;
        Ok(Some(task.clone()))
    }

    async fn list_by_status(&self, status: TaskStatus) -> TaskQueueResult<Vec<Task>> {
        Ok(self.collect_tasks(|task| task.status == status).await)
    }

    async fn list_children(&self, scheduled_task_id: TaskId) -> TaskQueueResult<Vec<Task>> {
        Ok(self
            .collect_tasks(|task| task.scheduled_task_id == Some(scheduled_task_id))
            .await)
    }

    async fn count_by_status(&self) -> TaskQueueResult<HashMap<TaskStatus, u64>> {
        let tasks = self.tasks.read().await;
        let mut counts = HashMap::new();
        for task in tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn bulk_reset_children(
        &self,
        scheduled_task_id: TaskId,
        options: &ResetOptions,
    ) -> TaskQueueResult<Vec<TaskId>> {
        let mut tasks = self.tasks.write().await;
        let mut reset_ids = Vec::new();

        for task in tasks.values_mut() {
            if task.scheduled_task_id != Some(scheduled_task_id) || !options.applies_to(task) {
                continue;
            }

            task.status = TaskStatus::Waiting;
            task.started_at = None;
            task.finished_at = None;
            if options.clear_error {
                task.error_message = None;
            }
            if options.clear_retry_count {
                task.retry_count = 0;
            }
            reset_ids.push(task.id);
        }

        reset_ids.sort_unstable();
        Ok(reset_ids)
    }

    async fn create_scheduled(&self, task: NewScheduledTask) -> TaskQueueResult<ScheduledTask> {
        let scheduled = task.into_scheduled(self.allocate_id(), Utc::now());
        self.scheduled
            .write()
            .await
            .insert(scheduled.id, scheduled.clone());
        debug!(scheduled_task.id = scheduled.id, "定时任务记录已创建");
        Ok(scheduled)
    }

    async fn get_scheduled(&self, id: TaskId) -> TaskQueueResult<ScheduledTask> {
        self.scheduled
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskQueueError::ScheduledTaskNotFound { id })
    }

    async fn list_scheduled(&self) -> TaskQueueResult<Vec<ScheduledTask>> {
        let scheduled = self.scheduled.read().await;
        let mut all: Vec<ScheduledTask> = scheduled.values().cloned().collect();
        all.sort_by_key(|task| task.id);
        Ok(all)
    }

    async fn record_firing(
        &self,
        id: TaskId,
        fired_at: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> TaskQueueResult<ScheduledTask> {
        let mut scheduled = self.scheduled.write().await;
        let task = scheduled
            .get_mut(&id)
            .ok_or(TaskQueueError::ScheduledTaskNotFound { id })?;

        task.last_run_time = Some(fired_at);
        task.next_run_time = next_run_time;
        task.execute_count += 1;
        Ok(task.clone())
    }

    async fn set_scheduled_status(
        &self,
        id: TaskId,
        status: ScheduledStatus,
        next_run_time: Option<DateTime<Utc>>,
    ) -> TaskQueueResult<ScheduledTask> {
        let mut scheduled = self.scheduled.write().await;
        let task = scheduled
            .get_mut(&id)
            .ok_or(TaskQueueError::ScheduledTaskNotFound { id })?;

        task.status = status;
        task.next_run_time = next_run_time;
        Ok(task.clone())
    }

    async fn health_check(&self) -> TaskQueueResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use taskq_domain::{TaskPayload, TaskPriority};

    fn new_task(name: &str) -> NewTask {
        NewTask::new(name, TaskPayload::new("noop", json!({})))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryTaskStore::new();
        let task = store
            .create_task(new_task("a").with_priority(TaskPriority::High))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Waiting);
        let fetched = store.get_task(task.id).await.unwrap();
        assert_eq!(fetched.name, "a");
        assert_eq!(fetched.priority, TaskPriority::High);

        let err = store.get_task(999).await.unwrap_err();
        assert!(matches!(err, TaskQueueError::TaskNotFound { id: 999 }));
    }

    #[tokio::test]
    async fn test_tasks_and_scheduled_share_id_space() {
        let store = InMemoryTaskStore::new();
        let task = store.create_task(new_task("a")).await.unwrap();
        let scheduled = store
            .create_scheduled(NewScheduledTask {
                name: "s".to_string(),
                cron_expression: "* * * * *".to_string(),
                priority: TaskPriority::Normal,
                payload: TaskPayload::new("noop", json!({})),
                next_run_time: None,
            })
            .await
            .unwrap();

        assert_ne!(task.id, scheduled.id);
        assert!(store.get_scheduled(task.id).await.is_err());
        assert!(store.get_task(scheduled.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_status_follows_state_machine() {
        let store = InMemoryTaskStore::new();
        let task = store.create_task(new_task("a")).await.unwrap();

        // Waiting 不能直接成功
        assert!(!store
            .update_status(task.id, TaskStatus::Success, None)
            .await
            .unwrap());

        assert!(store
            .update_status(task.id, TaskStatus::Running, None)
            .await
            .unwrap());
        assert!(store
            .update_status(task.id, TaskStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap());

        let failed = store.get_task(task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(failed.finished_at.is_some());

        // 终态写入是幂等的空操作
        assert!(!store
            .update_status(task.id, TaskStatus::Success, None)
            .await
            .unwrap());
        assert_eq!(
            store.get_task(task.id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_retry_count_accumulates() {
        let store = InMemoryTaskStore::new();
        let task = store.create_task(new_task("a")).await.unwrap();

        for _ in 0..2 {
            store.claim_task(task.id).await.unwrap().unwrap();
            store
                .complete_task(task.id, TaskCompletion::failure("boom", 1))
                .await
                .unwrap();
            let retried = store.mark_for_retry(task.id).await.unwrap().unwrap();
            assert_eq!(retried.status, TaskStatus::Waiting);
            assert!(retried.error_message.is_none());
        }

        assert_eq!(store.get_task(task.id).await.unwrap().retry_count, 2);
        // 非失败状态不能重试
        assert!(store.mark_for_retry(task.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claim_single_winner() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store.create_task(new_task("a")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_task(task.id).await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_bulk_reset_children_scoped_to_parent() {
        let store = InMemoryTaskStore::new();
        let running = store.create_task(new_task("c1").for_scheduled(100)).await.unwrap();
        let failed = store.create_task(new_task("c2").for_scheduled(100)).await.unwrap();
        let done = store.create_task(new_task("c3").for_scheduled(100)).await.unwrap();
        let in_flight = store.create_task(new_task("c4").for_scheduled(100)).await.unwrap();
        let other = store.create_task(new_task("o1").for_scheduled(200)).await.unwrap();

        for id in [running.id, failed.id, done.id, in_flight.id, other.id] {
            store.claim_task(id).await.unwrap();
        }
        store
            .complete_task(failed.id, TaskCompletion::failure("boom", 1))
            .await
            .unwrap();
        store
            .complete_task(done.id, TaskCompletion::success(None, 1))
            .await
            .unwrap();
        store
            .complete_task(other.id, TaskCompletion::failure("boom", 1))
            .await
            .unwrap();

        let options = ResetOptions::default().with_excluded(HashSet::from([in_flight.id]));
        let reset = store.bulk_reset_children(100, &options).await.unwrap();
        assert_eq!(reset, vec![running.id, failed.id]);

        let failed_after = store.get_task(failed.id).await.unwrap();
        assert_eq!(failed_after.status, TaskStatus::Waiting);
        assert!(failed_after.error_message.is_none());
        assert_eq!(
            store.get_task(done.id).await.unwrap().status,
            TaskStatus::Success
        );
        assert_eq!(
            store.get_task(in_flight.id).await.unwrap().status,
            TaskStatus::Running
        );
        assert_eq!(
            store.get_task(other.id).await.unwrap().status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_record_firing_updates_schedule() {
        let store = InMemoryTaskStore::new();
        let scheduled = store
            .create_scheduled(NewScheduledTask {
                name: "s".to_string(),
                cron_expression: "* * * * *".to_string(),
                priority: TaskPriority::Low,
                payload: TaskPayload::new("noop", json!({})),
                next_run_time: Some(Utc::now()),
            })
            .await
            .unwrap();

        let fired_at = Utc::now();
        let next = fired_at + chrono::Duration::minutes(1);
        let updated = store
            .record_firing(scheduled.id, fired_at, Some(next))
            .await
            .unwrap();
        assert_eq!(updated.execute_count, 1);
        assert_eq!(updated.last_run_time, Some(fired_at));
        assert_eq!(updated.next_run_time, Some(next));

        let paused = store
            .set_scheduled_status(scheduled.id, ScheduledStatus::Paused, None)
            .await
            .unwrap();
        assert_eq!(paused.status, ScheduledStatus::Paused);
        assert!(paused.next_run_time.is_none());
    }
}
