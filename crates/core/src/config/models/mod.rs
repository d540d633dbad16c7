pub mod api_observability;
pub mod app_config;
pub mod storage_queue;
pub mod worker_scheduler;

pub use api_observability::{ApiConfig, LogFormat, ObservabilityConfig};
pub use app_config::AppConfig;
pub use storage_queue::{QueueConfig, StorageBackend, StorageConfig};
pub use worker_scheduler::{SchedulerConfig, WorkerConfig, RESETTABLE_STATUS_NAMES};
