//! Metrics collector for the task queue engine
//!
//! All metrics go through the `metrics` facade. Without an installed recorder
//! every call is a no-op, so components record unconditionally.

use metrics::{counter, gauge, histogram, Counter, Gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskq_core::{TaskQueueError, TaskQueueResult};
use taskq_domain::TaskPriority;
use tracing::info;

/// Install the global Prometheus recorder and return a handle for rendering `/metrics`
pub fn install_prometheus_recorder() -> TaskQueueResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TaskQueueError::Configuration(format!("安装Prometheus指标记录器失败: {e}")))?;

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Metrics collector for the task queue engine
#[derive(Clone)]
pub struct MetricsCollector {
    tasks_processed_total: Counter,
    tasks_failed_total: Counter,
    tasks_retried_total: Counter,
    failed_queue_depth: Gauge,
    active_workers: Gauge,
    scheduled_firings_total: Counter,
    scheduled_firing_failures_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_processed_total: counter!("taskq_tasks_processed_total"),
            tasks_failed_total: counter!("taskq_tasks_failed_total"),
            tasks_retried_total: counter!("taskq_tasks_retried_total"),
            failed_queue_depth: gauge!("taskq_failed_queue_depth"),
            active_workers: gauge!("taskq_active_workers"),
            scheduled_firings_total: counter!("taskq_scheduled_firings_total"),
            scheduled_firing_failures_total: counter!("taskq_scheduled_firing_failures_total"),
        }
    }

    // Queue metrics

    pub fn record_enqueued(&self, priority: TaskPriority) {
        counter!("taskq_tasks_enqueued_total", "priority" => priority.as_str()).increment(1);
    }

    pub fn update_queue_depth(&self, priority: TaskPriority, depth: usize) {
        gauge!("taskq_queue_depth", "priority" => priority.as_str()).set(depth as f64);
    }

    pub fn update_failed_queue_depth(&self, depth: usize) {
        self.failed_queue_depth.set(depth as f64);
    }

    pub fn record_retried(&self, count: usize) {
        self.tasks_retried_total.increment(count as u64);
    }

    // Execution metrics

    /// Record a task execution completion
    pub fn record_task_execution(&self, task_type: &str, success: bool, duration_seconds: f64) {
        self.tasks_processed_total.increment(1);
        if !success {
            self.tasks_failed_total.increment(1);
        }
        histogram!("taskq_task_execution_duration_seconds", "task_type" => task_type.to_string())
            .record(duration_seconds);
    }

    pub fn update_active_workers(&self, count: usize) {
        self.active_workers.set(count as f64);
    }

    // Scheduler metrics

    pub fn record_scheduled_firing(&self, success: bool) {
        if success {
            self.scheduled_firings_total.increment(1);
        } else {
            self.scheduled_firing_failures_total.increment(1);
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let collector = MetricsCollector::new();
        collector.record_enqueued(TaskPriority::High);
        collector.update_queue_depth(TaskPriority::Low, 3);
        collector.record_task_execution("shell", false, 0.25);
        collector.record_retried(2);
        collector.record_scheduled_firing(true);
        collector.update_active_workers(4);
    }
}
