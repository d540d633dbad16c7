use serde::{Deserialize, Serialize};

/// reset 操作允许回退到 waiting 的任务状态
pub const RESETTABLE_STATUS_NAMES: [&str; 4] = ["running", "failed", "cancelled", "paused"];

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_workers: usize,
    /// 单个任务执行超时，0 表示不限制
    pub execution_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    /// 是否注册 `shell` 处理器。API 无鉴权，开启后任何能访问 API 的人都能在本机执行命令
    pub enable_shell_handler: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            execution_timeout_seconds: 300,
            shutdown_timeout_seconds: 30,
            enable_shell_handler: false,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            return Err(anyhow::anyhow!("Worker数量必须大于0"));
        }

        if self.max_workers > 1024 {
            return Err(anyhow::anyhow!("Worker数量不能超过1024"));
        }

        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("关闭超时时间必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_ms: u64,
    pub reset_statuses: Vec<String>,
    pub reset_clears_error: bool,
    pub reset_clears_retry_count: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 1000,
            reset_statuses: RESETTABLE_STATUS_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reset_clears_error: true,
            reset_clears_retry_count: false,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.reset_statuses.is_empty() {
            return Err(anyhow::anyhow!("reset_statuses 不能为空"));
        }

        for status in &self.reset_statuses {
            if !RESETTABLE_STATUS_NAMES.contains(&status.as_str()) {
                return Err(anyhow::anyhow!(
                    "无效的重置状态: {}，支持的状态: {:?}",
                    status,
                    RESETTABLE_STATUS_NAMES
                ));
            }
        }

        Ok(())
    }
}
