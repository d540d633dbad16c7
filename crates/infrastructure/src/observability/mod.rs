//! Observability module
//!
//! Metrics collection (the `metrics` facade with an optional Prometheus
//! recorder) and structured event logging.

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::{install_prometheus_recorder, MetricsCollector};
pub use structured_logger::StructuredLogger;
