use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// 仅在 sqlite 后端下使用，支持 `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: "sqlite://taskq.db".to_string(),
            max_connections: 5,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == StorageBackend::Sqlite {
            if self.database_url.is_empty() {
                return Err(anyhow::anyhow!("数据库URL不能为空"));
            }
            if !self.database_url.starts_with("sqlite:") {
                return Err(anyhow::anyhow!(
                    "数据库URL必须以 sqlite: 开头: {}",
                    self.database_url
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 失败队列容量，0 表示不限制
    pub failed_queue_capacity: usize,
    /// 空闲时 worker 的最长等待间隔
    pub idle_poll_interval_ms: u64,
    pub default_retry_limit: usize,
    pub max_retry_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            failed_queue_capacity: 0,
            idle_poll_interval_ms: 1000,
            default_retry_limit: 10,
            max_retry_limit: 100,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idle_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("空闲轮询间隔必须大于0"));
        }

        if self.default_retry_limit == 0 || self.max_retry_limit == 0 {
            return Err(anyhow::anyhow!("重试数量上限必须大于0"));
        }

        if self.default_retry_limit > self.max_retry_limit {
            return Err(anyhow::anyhow!(
                "默认重试数量({})不能超过最大重试数量({})",
                self.default_retry_limit,
                self.max_retry_limit
            ));
        }

        Ok(())
    }
}
