use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskq_core::{TaskQueueError, RESETTABLE_STATUS_NAMES};

/// 任务与定时任务共享同一个ID空间
pub type TaskId = i64;

/// 任务优先级，High > Normal > Low
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TaskPriority {
    /// 按出队顺序排列
    pub const DISPATCH_ORDER: [TaskPriority; 3] =
        [TaskPriority::High, TaskPriority::Normal, TaskPriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
        }
    }

    /// 宽松解析，未知的优先级名称按 normal 处理
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "high" => TaskPriority::High,
            "low" => TaskPriority::Low,
            _ => TaskPriority::Normal,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Running,
    Success,
    Failed,
    Cancelled,
    Paused,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Waiting,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Paused => "paused",
        }
    }

    /// 状态的展示名称
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "等待执行",
            TaskStatus::Running => "执行中",
            TaskStatus::Success => "执行成功",
            TaskStatus::Failed => "执行失败",
            TaskStatus::Cancelled => "已取消",
            TaskStatus::Paused => "已暂停",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 正常路径上唯一合法的状态流转；reset 走单独的修复路径，不受此表约束
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Waiting, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Waiting)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TaskQueueError::Validation(format!("未知的任务状态: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledStatus {
    Active,
    Paused,
}

impl ScheduledStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledStatus::Active => "active",
            ScheduledStatus::Paused => "paused",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScheduledStatus::Active => "调度中",
            ScheduledStatus::Paused => "已暂停",
        }
    }
}

impl fmt::Display for ScheduledStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduledStatus {
    type Err = TaskQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ScheduledStatus::Active),
            "paused" => Ok(ScheduledStatus::Paused),
            _ => Err(TaskQueueError::Validation(format!(
                "未知的定时任务状态: {s}"
            ))),
        }
    }
}

/// 任务执行参数，`task_type` 决定由哪个处理器执行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl TaskPayload {
    pub fn new(task_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    pub scheduled_task_id: Option<TaskId>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub output: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// 仅失败任务可以被重试
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// 新建任务的参数，由存储层分配ID并置为 Waiting
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub scheduled_task_id: Option<TaskId>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            name: name.into(),
            priority: TaskPriority::Normal,
            payload,
            scheduled_task_id: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_scheduled(mut self, scheduled_task_id: TaskId) -> Self {
        self.scheduled_task_id = Some(scheduled_task_id);
        self
    }

    pub fn into_task(self, id: TaskId, created_at: DateTime<Utc>) -> Task {
        Task {
            id,
            name: self.name,
            priority: self.priority,
            status: TaskStatus::Waiting,
            payload: self.payload,
            scheduled_task_id: self.scheduled_task_id,
            retry_count: 0,
            error_message: None,
            output: None,
            duration_ms: None,
            created_at,
            started_at: None,
            finished_at: None,
        }
    }
}

/// 任务执行结束时写回的结果
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
}

impl TaskCompletion {
    pub fn success(output: Option<String>, duration_ms: i64) -> Self {
        Self {
            status: TaskStatus::Success,
            output,
            error_message: None,
            duration_ms,
        }
    }

    pub fn failure(error_message: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            status: TaskStatus::Failed,
            output: None,
            error_message: Some(error_message.into()),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub cron_expression: String,
    pub status: ScheduledStatus,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub execute_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn is_active(&self) -> bool {
        self.status == ScheduledStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_run_time.is_some_and(|next| next <= now)
    }

    /// 每次触发生成的子任务
    pub fn spawn_child(&self) -> NewTask {
        NewTask::new(self.name.clone(), self.payload.clone())
            .with_priority(self.priority)
            .for_scheduled(self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewScheduledTask {
    pub name: String,
    pub cron_expression: String,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub next_run_time: Option<DateTime<Utc>>,
}

impl NewScheduledTask {
    pub fn into_scheduled(self, id: TaskId, created_at: DateTime<Utc>) -> ScheduledTask {
        ScheduledTask {
            id,
            name: self.name,
            cron_expression: self.cron_expression,
            status: ScheduledStatus::Active,
            priority: self.priority,
            payload: self.payload,
            next_run_time: self.next_run_time,
            last_run_time: None,
            execute_count: 0,
            created_at,
        }
    }
}

/// 子任务批量重置选项
#[derive(Debug, Clone)]
pub struct ResetOptions {
    /// 需要回退到 Waiting 的状态集合
    pub statuses: Vec<TaskStatus>,
    /// 正在 worker 上执行的任务，不参与重置
    pub exclude: HashSet<TaskId>,
    pub clear_error: bool,
    pub clear_retry_count: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            statuses: vec![
                TaskStatus::Running,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
                TaskStatus::Paused,
            ],
            exclude: HashSet::new(),
            clear_error: true,
            clear_retry_count: false,
        }
    }
}

impl ResetOptions {
    /// 从配置中的状态名称构建
    pub fn from_names(
        names: &[String],
        clear_error: bool,
        clear_retry_count: bool,
    ) -> Result<Self, TaskQueueError> {
        let statuses = names
            .iter()
            .map(|name| {
                if !RESETTABLE_STATUS_NAMES.contains(&name.as_str()) {
                    return Err(TaskQueueError::Configuration(format!(
                        "状态 {name} 不允许被重置"
                    )));
                }
                name.parse::<TaskStatus>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            statuses,
            exclude: HashSet::new(),
            clear_error,
            clear_retry_count,
        })
    }

    pub fn with_excluded(mut self, exclude: HashSet<TaskId>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn applies_to(&self, task: &Task) -> bool {
        self.statuses.contains(&task.status) && !self.exclude.contains(&task.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::DISPATCH_ORDER[0], TaskPriority::High);
    }

    #[test]
    fn test_priority_from_name_is_lenient() {
        assert_eq!(TaskPriority::from_name("HIGH"), TaskPriority::High);
        assert_eq!(TaskPriority::from_name("low"), TaskPriority::Low);
        assert_eq!(TaskPriority::from_name("urgent"), TaskPriority::Normal);
        assert_eq!(TaskPriority::from_name(""), TaskPriority::Normal);
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Waiting.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Success));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Waiting));

        assert!(!TaskStatus::Waiting.can_transition_to(TaskStatus::Success));
        assert!(!TaskStatus::Success.can_transition_to(TaskStatus::Waiting));
        assert!(!TaskStatus::Success.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Waiting));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_status_parse_and_serde() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<TaskStatus>().is_err());
        assert_eq!(
            serde_json::to_value(TaskStatus::Cancelled).unwrap(),
            json!("cancelled")
        );
    }

    #[test]
    fn test_scheduled_task_due_and_spawn() {
        let now = Utc::now();
        let scheduled = NewScheduledTask {
            name: "nightly".to_string(),
            cron_expression: "0 0 * * *".to_string(),
            priority: TaskPriority::High,
            payload: TaskPayload::new("noop", json!({"k": 1})),
            next_run_time: Some(now),
        }
        .into_scheduled(7, now);

        assert!(scheduled.is_due(now));
        assert!(!scheduled.is_due(now - chrono::Duration::seconds(1)));

        let child = scheduled.spawn_child();
        assert_eq!(child.scheduled_task_id, Some(7));
        assert_eq!(child.priority, TaskPriority::High);
        assert_eq!(child.payload.task_type, "noop");

        let mut paused = scheduled.clone();
        paused.status = ScheduledStatus::Paused;
        assert!(!paused.is_due(now));
    }

    #[test]
    fn test_reset_options_from_names() {
        let options = ResetOptions::from_names(
            &["failed".to_string(), "running".to_string()],
            true,
            false,
        )
        .unwrap();
        assert_eq!(options.statuses, vec![TaskStatus::Failed, TaskStatus::Running]);

        assert!(ResetOptions::from_names(&["success".to_string()], true, false).is_err());
        assert!(ResetOptions::from_names(&["bogus".to_string()], true, false).is_err());
    }

    #[test]
    fn test_reset_options_excludes_in_flight() {
        let now = Utc::now();
        let mut task = NewTask::new("t", TaskPayload::new("noop", json!(null))).into_task(3, now);
        task.status = TaskStatus::Running;

        let options = ResetOptions::default();
        assert!(options.applies_to(&task));

        let options = options.with_excluded(HashSet::from([3]));
        assert!(!options.applies_to(&task));
    }
}
