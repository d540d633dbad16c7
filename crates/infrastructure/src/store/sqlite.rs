use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use taskq_core::{TaskQueueError, TaskQueueResult};
use taskq_domain::{
    NewScheduledTask, NewTask, ResetOptions, ScheduledStatus, ScheduledTask, Task,
    TaskCompletion, TaskId, TaskPayload, TaskPriority, TaskStatus, TaskStore,
};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, name, priority, status, task_type, parameters, scheduled_task_id, \
     retry_count, error_message, output, duration_ms, created_at, started_at, finished_at";

const SCHEDULED_COLUMNS: &str = "id, name, cron_expression, status, priority, task_type, \
     parameters, next_run_time, last_run_time, execute_count, created_at";

/// SQLite 任务存储
///
/// 状态更新使用 `WHERE id = ? AND status = ?` 条件语句，保证单个任务的写入原子性。
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 打开（必要时创建）数据库并运行迁移
    pub async fn connect(database_url: &str, max_connections: u32) -> TaskQueueResult<Self> {
        debug!("Opening SQLite task store at: {}", database_url);

        let in_memory = database_url.contains(":memory:");
        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // 内存库每个连接都是独立的数据库，只能使用单连接且不能回收
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .min_connections(1)
        };

        let pool = pool_options.connect_with(connect_options).await?;
        Self::run_migrations(&pool).await?;

        debug!("SQLite task store ready");
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> TaskQueueResult<()> {
        debug!("Running SQLite database migrations");

        // 任务与定时任务共用的ID序列
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS id_sequence (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                priority TEXT NOT NULL DEFAULT 'normal',
                task_type TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT 'null',
                next_run_time DATETIME,
                last_run_time DATETIME,
                execute_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                status TEXT NOT NULL DEFAULT 'waiting',
                task_type TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT 'null',
                scheduled_task_id INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                output TEXT,
                duration_ms INTEGER,
                created_at DATETIME NOT NULL,
                started_at DATETIME,
                finished_at DATETIME
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_scheduled_task_id ON tasks(scheduled_task_id)",
            "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status ON scheduled_tasks(status)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        debug!("Successfully completed SQLite database migrations");
        Ok(())
    }

    fn row_to_task(row: &SqliteRow) -> TaskQueueResult<Task> {
        let status: String = row.try_get("status")?;
        let priority: String = row.try_get("priority")?;
        let parameters: String = row.try_get("parameters")?;
        let retry_count: i64 = row.try_get("retry_count")?;

        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            priority: TaskPriority::from_name(&priority),
            status: status.parse()?,
            payload: TaskPayload {
                task_type: row.try_get("task_type")?,
                parameters: serde_json::from_str(&parameters)?,
            },
            scheduled_task_id: row.try_get("scheduled_task_id")?,
            retry_count: u32::try_from(retry_count).unwrap_or_default(),
            error_message: row.try_get("error_message")?,
            output: row.try_get("output")?,
            duration_ms: row.try_get("duration_ms")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn row_to_scheduled(row: &SqliteRow) -> TaskQueueResult<ScheduledTask> {
        let status: String = row.try_get("status")?;
        let priority: String = row.try_get("priority")?;
        let parameters: String = row.try_get("parameters")?;
        let execute_count: i64 = row.try_get("execute_count")?;

        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            cron_expression: row.try_get("cron_expression")?,
            status: status.parse()?,
            priority: TaskPriority::from_name(&priority),
            payload: TaskPayload {
                task_type: row.try_get("task_type")?,
                parameters: serde_json::from_str(&parameters)?,
            },
            next_run_time: row.try_get("next_run_time")?,
            last_run_time: row.try_get("last_run_time")?,
            execute_count: u64::try_from(execute_count).unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn allocate_id(
        conn: &mut sqlx::SqliteConnection,
        kind: &str,
    ) -> TaskQueueResult<TaskId> {
        let row = sqlx::query("INSERT INTO id_sequence (kind) VALUES (?) RETURNING id")
            .bind(kind)
            .fetch_one(conn)
            .await?;
        Ok(row.try_get("id")?)
    }

    async fn fetch_tasks(&self, sql: &str, bind: i64) -> TaskQueueResult<Vec<Task>> {
        let rows = sqlx::query(sql).bind(bind).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn task_exists(&self, id: TaskId) -> TaskQueueResult<()> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Ok(()),
            None => Err(TaskQueueError::TaskNotFound { id }),
        }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task_name = %task.name))]
    async fn create_task(&self, task: NewTask) -> TaskQueueResult<Task> {
        let mut tx = self.pool.begin().await?;
        let id = Self::allocate_id(&mut tx, "task").await?;
        let task = task.into_task(id, Utc::now());
        let parameters = serde_json::to_string(&task.payload.parameters)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, priority, status, task_type, parameters, scheduled_task_id, retry_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(&task.payload.task_type)
        .bind(parameters)
        .bind(task.scheduled_task_id)
        .bind(i64::from(task.retry_count))
        .bind(task.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(task.id = task.id, "任务记录已创建");
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> TaskQueueResult<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_task(&row),
            None => Err(TaskQueueError::TaskNotFound { id }),
        }
    }

    async fn claim_task(&self, id: TaskId) -> TaskQueueResult<Option<Task>> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'running', started_at = ?, finished_at = NULL \
             WHERE id = ? AND status = 'waiting'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.task_exists(id).await?;
            return Ok(None);
        }

        self.get_task(id).await.map(Some)
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

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, output = ?, error_message = ?, duration_ms = ?, finished_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(completion.status.as_str())
        .bind(completion.output)
        .bind(completion.error_message)
        .bind(completion.duration_ms)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.task_exists(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn mark_for_retry(&self, id: TaskId) -> TaskQueueResult<Option<Task>> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'waiting', retry_count = retry_count + 1, error_message = NULL, \
             started_at = NULL, finished_at = NULL WHERE id = ? AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.task_exists(id).await?;
            return Ok(None);
        }

        self.get_task(id).await.map(Some)
    }

    async fn list_by_status(&self, status: TaskStatus) -> TaskQueueResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_children(&self, scheduled_task_id: TaskId) -> TaskQueueResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE scheduled_task_id = ? ORDER BY id");
        self.fetch_tasks(&sql, scheduled_task_id).await
    }

    async fn count_by_status(&self) -> TaskQueueResult<HashMap<TaskStatus, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status.parse()?, u64::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }

    #[instrument(skip(self, options))]
    async fn bulk_reset_children(
        &self,
        scheduled_task_id: TaskId,
        options: &ResetOptions,
    ) -> TaskQueueResult<Vec<TaskId>> {
        let children = self.list_children(scheduled_task_id).await?;
        let mut tx = self.pool.begin().await?;
        let mut reset_ids = Vec::new();

        for child in children.iter().filter(|task| options.applies_to(task)) {
            let result = sqlx::query(
                r#"
                UPDATE tasks SET
                    status = 'waiting',
                    started_at = NULL,
                    finished_at = NULL,
                    error_message = CASE WHEN ? THEN NULL ELSE error_message END,
                    retry_count = CASE WHEN ? THEN 0 ELSE retry_count END
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(options.clear_error)
            .bind(options.clear_retry_count)
            .bind(child.id)
            .bind(child.status.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                reset_ids.push(child.id);
            }
        }

        tx.commit().await?;
        Ok(reset_ids)
    }

    async fn create_scheduled(&self, task: NewScheduledTask) -> TaskQueueResult<ScheduledTask> {
        let mut tx = self.pool.begin().await?;
        let id = Self::allocate_id(&mut tx, "scheduled").await?;
        let scheduled = task.into_scheduled(id, Utc::now());
        let parameters = serde_json::to_string(&scheduled.payload.parameters)?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (id, name, cron_expression, status, priority, task_type, parameters, next_run_time, execute_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(scheduled.id)
        .bind(&scheduled.name)
        .bind(&scheduled.cron_expression)
        .bind(scheduled.status.as_str())
        .bind(scheduled.priority.as_str())
        .bind(&scheduled.payload.task_type)
        .bind(parameters)
        .bind(scheduled.next_run_time)
        .bind(scheduled.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(scheduled_task.id = scheduled.id, "定时任务记录已创建");
        Ok(scheduled)
    }

    async fn get_scheduled(&self, id: TaskId) -> TaskQueueResult<ScheduledTask> {
        let sql = format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_tasks WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_scheduled(&row),
            None => Err(TaskQueueError::ScheduledTaskNotFound { id }),
        }
    }

    async fn list_scheduled(&self) -> TaskQueueResult<Vec<ScheduledTask>> {
        let sql = format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_tasks ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_scheduled).collect()
    }

    async fn record_firing(
        &self,
        id: TaskId,
        fired_at: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> TaskQueueResult<ScheduledTask> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET last_run_time = ?, next_run_time = ?, \
             execute_count = execute_count + 1 WHERE id = ?",
        )
        .bind(fired_at)
        .bind(next_run_time)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskQueueError::ScheduledTaskNotFound { id });
        }
        self.get_scheduled(id).await
    }

    async fn set_scheduled_status(
        &self,
        id: TaskId,
        status: ScheduledStatus,
        next_run_time: Option<DateTime<Utc>>,
    ) -> TaskQueueResult<ScheduledTask> {
        let result =
            sqlx::query("UPDATE scheduled_tasks SET status = ?, next_run_time = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(next_run_time)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(TaskQueueError::ScheduledTaskNotFound { id });
        }
        self.get_scheduled(id).await
    }

    async fn health_check(&self) -> TaskQueueResult<bool> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(true)
    }

    async fn close(&self) {
        debug!("Closing SQLite task store");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    async fn memory_store() -> SqliteTaskStore {
        SqliteTaskStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn new_task(name: &str) -> NewTask {
        NewTask::new(name, TaskPayload::new("shell", json!({"command": "echo hi"})))
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let store = memory_store().await;
        let created = store
            .create_task(new_task("a").with_priority(TaskPriority::High).for_scheduled(9))
            .await
            .unwrap();

        let fetched = store.get_task(created.id).await.unwrap();
        assert_eq!(fetched.name, "a");
        assert_eq!(fetched.priority, TaskPriority::High);
        assert_eq!(fetched.status, TaskStatus::Waiting);
        assert_eq!(fetched.scheduled_task_id, Some(9));
        assert_eq!(fetched.payload.parameters["command"], "echo hi");

        assert!(matches!(
            store.get_task(12345).await,
            Err(TaskQueueError::TaskNotFound { id: 12345 })
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_and_retry() {
        let store = memory_store().await;
        let task = store.create_task(new_task("a")).await.unwrap();

        let claimed = store.claim_task(task.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());
        assert!(store.claim_task(task.id).await.unwrap().is_none());

        assert!(store
            .complete_task(task.id, TaskCompletion::failure("exit 1", 15))
            .await
            .unwrap());
        let failed = store.get_task(task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("exit 1"));
        assert_eq!(failed.duration_ms, Some(15));

        // 终态下再次完成不生效
        assert!(!store
            .complete_task(task.id, TaskCompletion::success(None, 1))
            .await
            .unwrap());

        let retried = store.mark_for_retry(task.id).await.unwrap().unwrap();
        assert_eq!(retried.status, TaskStatus::Waiting);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.error_message.is_none());
    }

    #[tokio::test]
    async fn test_shared_id_space_and_scheduled() {
        let store = memory_store().await;
        let task = store.create_task(new_task("a")).await.unwrap();
        let scheduled = store
            .create_scheduled(NewScheduledTask {
                name: "s".to_string(),
                cron_expression: "*/5 * * * *".to_string(),
                priority: TaskPriority::Low,
                payload: TaskPayload::new("noop", json!(null)),
                next_run_time: Some(Utc::now()),
            })
            .await
            .unwrap();
        assert!(scheduled.id > task.id);

        let fired_at = Utc::now();
        let updated = store
            .record_firing(scheduled.id, fired_at, Some(fired_at + chrono::Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(updated.execute_count, 1);
        assert!(updated.last_run_time.is_some());

        let paused = store
            .set_scheduled_status(scheduled.id, ScheduledStatus::Paused, None)
            .await
            .unwrap();
        assert_eq!(paused.status, ScheduledStatus::Paused);
        assert_eq!(store.list_scheduled().await.unwrap().len(), 1);

        assert!(matches!(
            store.get_scheduled(task.id).await,
            Err(TaskQueueError::ScheduledTaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_bulk_reset_children() {
        let store = memory_store().await;
        let stuck = store.create_task(new_task("c1").for_scheduled(50)).await.unwrap();
        let failed = store.create_task(new_task("c2").for_scheduled(50)).await.unwrap();
        let waiting = store.create_task(new_task("c3").for_scheduled(50)).await.unwrap();
        let busy = store.create_task(new_task("c4").for_scheduled(50)).await.unwrap();

        store.claim_task(stuck.id).await.unwrap();
        store.claim_task(busy.id).await.unwrap();
        store.claim_task(failed.id).await.unwrap();
        store
            .complete_task(failed.id, TaskCompletion::failure("boom", 1))
            .await
            .unwrap();

        let options = ResetOptions {
            clear_retry_count: true,
            ..ResetOptions::default()
        }
        .with_excluded(HashSet::from([busy.id]));

        let reset = store.bulk_reset_children(50, &options).await.unwrap();
        assert_eq!(reset, vec![stuck.id, failed.id]);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.get(&TaskStatus::Waiting), Some(&3));
        assert_eq!(counts.get(&TaskStatus::Running), Some(&1));
        assert_eq!(
            store.get_task(waiting.id).await.unwrap().status,
            TaskStatus::Waiting
        );
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("taskq.db").display());

        let id = {
            let store = SqliteTaskStore::connect(&url, 2).await.unwrap();
            store.create_task(new_task("persisted")).await.unwrap().id
        };

        let reopened = SqliteTaskStore::connect(&url, 2).await.unwrap();
        let task = reopened.get_task(id).await.unwrap();
        assert_eq!(task.name, "persisted");
        assert!(reopened.health_check().await.unwrap());
    }
}
