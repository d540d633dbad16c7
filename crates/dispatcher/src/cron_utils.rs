use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use taskq_core::{TaskQueueError, TaskQueueResult};

/// CRON表达式解析和调度工具
///
/// 支持标准 5 段 crontab（分 时 日 月 周），会自动补齐秒字段；
/// 6/7 段表达式以及 `@daily` 这类描述符直接交给 `cron` crate 解析。
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> TaskQueueResult<Self> {
        let normalized = Self::normalize(cron_expr);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| TaskQueueError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { schedule })
    }

    /// 将 5 段 crontab 转换为带秒字段的形式
    pub fn normalize(cron_expr: &str) -> String {
        let trimmed = cron_expr.trim();
        if trimmed.starts_with('@') {
            return trimmed.to_string();
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() == 5 {
            format!("0 {}", fields.join(" "))
        } else {
            fields.join(" ")
        }
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.schedule.after(&from).next();
        if next.is_none() {
            debug!("CRON表达式没有后续执行时间: from={}", from);
        }
        next
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// `(from, to]` 区间内的触发次数，最多统计 `cap` 次
    pub fn occurrences_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cap: usize,
    ) -> usize {
        self.schedule
            .after(&from)
            .take_while(|time| *time <= to)
            .take(cap)
            .count()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> TaskQueueResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}
