//! 定时调度
//!
//! cron 表达式解析、定时任务的触发 / 暂停 / 恢复 / 重置，以及启动时的状态恢复。

pub mod cron_utils;
pub mod recovery_service;
pub mod scheduler;

pub use cron_utils::CronScheduler;
pub use recovery_service::{RecoveryReport, RecoveryService};
pub use scheduler::{NextRun, ResetReport, ScheduleRequest, SchedulerStats, TaskScheduler};
