use crate::config::models::{AppConfig, LogFormat, StorageBackend};

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.queue.default_retry_limit, 10);
    assert_eq!(config.queue.max_retry_limit, 100);
    assert_eq!(config.queue.failed_queue_capacity, 0);
    assert!(config.worker.max_workers > 0);
    assert!(config.scheduler.enabled);
    assert!(config.scheduler.reset_clears_error);
    assert!(!config.scheduler.reset_clears_retry_count);
    assert_eq!(config.scheduler.reset_statuses.len(), 4);
    assert_eq!(config.observability.log_format, LogFormat::Pretty);

    // API 无鉴权，默认只监听本机、不放行跨域、不注册 shell 处理器
    assert_eq!(config.api.bind_address, "127.0.0.1:8080");
    assert!(config.api.cors_origins.is_empty());
    assert!(!config.worker.enable_shell_handler);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[storage]
backend = "sqlite"
database_url = "sqlite::memory:"

[queue]
failed_queue_capacity = 500

[worker]
max_workers = 8
execution_timeout_seconds = 60

[scheduler]
tick_interval_ms = 250
reset_statuses = ["failed", "running"]
reset_clears_retry_count = true

[api]
bind_address = "127.0.0.1:9090"

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    assert_eq!(config.storage.database_url, "sqlite::memory:");
    assert_eq!(config.queue.failed_queue_capacity, 500);
    // 未配置的字段使用默认值
    assert_eq!(config.queue.idle_poll_interval_ms, 1000);
    assert_eq!(config.worker.max_workers, 8);
    assert_eq!(config.worker.execution_timeout_seconds, 60);
    assert_eq!(config.scheduler.tick_interval_ms, 250);
    assert_eq!(config.scheduler.reset_statuses, vec!["failed", "running"]);
    assert!(config.scheduler.reset_clears_retry_count);
    assert_eq!(config.api.bind_address, "127.0.0.1:9090");
    assert_eq!(config.observability.log_format, LogFormat::Json);
}

#[test]
fn test_config_toml_roundtrip_keeps_values() {
    let mut config = AppConfig::default();
    config.worker.max_workers = 3;
    config.queue.failed_queue_capacity = 7;

    let toml_str = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.worker.max_workers, 3);
    assert_eq!(parsed.queue.failed_queue_capacity, 7);
}

#[test]
fn test_invalid_configs_rejected() {
    let mut config = AppConfig::default();
    config.worker.max_workers = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.scheduler.reset_statuses = vec!["success".to_string()];
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.queue.default_retry_limit = 200;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.database_url = "postgres://localhost/taskq".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.api.bind_address = "not-an-address".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());
}
