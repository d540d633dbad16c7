mod memory;
mod sqlite;

use std::sync::Arc;

use taskq_core::{StorageBackend, StorageConfig, TaskQueueResult};
use taskq_domain::TaskStore;
use tracing::info;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// 根据配置创建任务存储
pub async fn create_task_store(config: &StorageConfig) -> TaskQueueResult<Arc<dyn TaskStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("使用内存任务存储");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StorageBackend::Sqlite => {
            info!("使用SQLite任务存储: {}", config.database_url);
            let store =
                SqliteTaskStore::connect(&config.database_url, config.max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
