//! Structured logging utilities
//!
//! Every queue, worker and scheduler event is logged through these helpers so
//! the `event` field vocabulary stays in one place.

use chrono::{DateTime, Utc};
use taskq_domain::{TaskId, TaskPriority};
use tracing::{info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_enqueued(task_id: TaskId, priority: TaskPriority, queue_length: usize) {
        info!(
            event = "task_enqueued",
            task.id = task_id,
            task.priority = priority.as_str(),
            queue.length = queue_length,
            "Task enqueued"
        );
    }

    /// Log task execution start
    pub fn log_task_execution_start(task_id: TaskId, task_type: &str, worker_id: usize) {
        info!(
            event = "task_execution_start",
            task.id = task_id,
            task.type = task_type,
            worker.id = worker_id,
            "Task execution started"
        );
    }

    /// Log task execution completion
    pub fn log_task_execution_complete(
        task_id: TaskId,
        task_type: &str,
        worker_id: usize,
        success: bool,
        duration_ms: i64,
        error_message: Option<&str>,
    ) {
        if success {
            info!(
                event = "task_execution_complete",
                task.id = task_id,
                task.type = task_type,
                worker.id = worker_id,
                task.status = "success",
                task.duration_ms = duration_ms,
                "Task execution completed"
            );
        } else {
            warn!(
                event = "task_execution_complete",
                task.id = task_id,
                task.type = task_type,
                worker.id = worker_id,
                task.status = "failed",
                task.duration_ms = duration_ms,
                task.error = error_message.unwrap_or_default(),
                "Task execution failed"
            );
        }
    }

    pub fn log_task_moved_to_failed_queue(task_id: TaskId, failed_queue_length: usize) {
        warn!(
            event = "task_moved_to_failed_queue",
            task.id = task_id,
            queue.failed_length = failed_queue_length,
            "Task moved to failed queue"
        );
    }

    pub fn log_failed_queue_retried(requested: usize, retried: usize, errors: usize) {
        info!(
            event = "failed_queue_retried",
            retry.limit = requested,
            retry.count = retried,
            retry.errors = errors,
            "Failed queue retried"
        );
    }

    pub fn log_failed_queue_cleared(cleared: usize) {
        info!(
            event = "failed_queue_cleared",
            cleared_count = cleared,
            "Failed queue cleared"
        );
    }

    pub fn log_scheduled_task_fired(
        scheduled_task_id: TaskId,
        child_task_id: TaskId,
        next_run_time: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "scheduled_task_fired",
            scheduled_task.id = scheduled_task_id,
            task.id = child_task_id,
            scheduled_task.next_run_time = ?next_run_time,
            "Scheduled task fired"
        );
    }

    pub fn log_scheduled_task_paused(scheduled_task_id: TaskId) {
        info!(
            event = "scheduled_task_paused",
            scheduled_task.id = scheduled_task_id,
            "Scheduled task paused"
        );
    }

    pub fn log_scheduled_task_resumed(
        scheduled_task_id: TaskId,
        next_run_time: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "scheduled_task_resumed",
            scheduled_task.id = scheduled_task_id,
            scheduled_task.next_run_time = ?next_run_time,
            "Scheduled task resumed"
        );
    }

    pub fn log_scheduled_task_reset(scheduled_task_id: TaskId, affected: usize, skipped: usize) {
        warn!(
            event = "scheduled_task_reset",
            scheduled_task.id = scheduled_task_id,
            reset.affected = affected,
            reset.skipped_in_flight = skipped,
            "Scheduled task children reset to waiting"
        );
    }
}
