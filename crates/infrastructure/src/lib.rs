pub mod observability;
pub mod queue;
pub mod store;

pub use observability::{install_prometheus_recorder, MetricsCollector, StructuredLogger};
pub use queue::{
    InFlightGuard, InFlightTracker, PriorityQueueManager, QueueDetail, QueueDetails,
    QueueMetrics, RetryReport,
};
pub use store::{create_task_store, InMemoryTaskStore, SqliteTaskStore};
