use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use taskq_api::{create_app, AppState};
use taskq_core::AppConfig;
use taskq_dispatcher::{RecoveryService, TaskScheduler};
use taskq_domain::TaskStore;
use taskq_infrastructure::{create_task_store, install_prometheus_recorder, PriorityQueueManager};
use taskq_worker::{HandlerRegistry, WorkerPool};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::shutdown::ShutdownManager;

/// 主应用程序，负责组装存储、队列、调度器、worker 池与 HTTP 服务
pub struct Application {
    config: AppConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<PriorityQueueManager>,
    scheduler: Arc<TaskScheduler>,
    registry: Arc<HandlerRegistry>,
    workers: Arc<WorkerPool>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序，存储后端: {:?}", config.storage.backend);

        let metrics_handle = if config.observability.metrics_enabled {
            Some(install_prometheus_recorder().context("安装Prometheus指标导出器失败")?)
        } else {
            None
        };

        let store = create_task_store(&config.storage)
            .await
            .context("创建任务存储失败")?;
        let queue = Arc::new(PriorityQueueManager::new(
            store.clone(),
            config.queue.clone(),
        ));
        let scheduler = Arc::new(
            TaskScheduler::new(store.clone(), queue.clone(), config.scheduler.clone())
                .context("创建定时调度器失败")?,
        );
        let registry = Arc::new(
            HandlerRegistry::with_builtin_handlers(config.worker.enable_shell_handler).await,
        );
        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            registry.clone(),
            config.worker.clone(),
        ));

        Ok(Self {
            config,
            store,
            queue,
            scheduler,
            registry,
            workers,
            metrics_handle,
        })
    }

    /// 自定义处理器在 `run` 之前注册
    pub fn handler_registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            queue: self.queue.clone(),
            scheduler: self.scheduler.clone(),
            workers: self.workers.clone(),
            metrics_handle: self.metrics_handle.clone(),
        }
    }

    /// 绑定配置中的地址并运行，直到收到关闭信号
    pub async fn run(&self, shutdown: &ShutdownManager) -> Result<()> {
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        self.run_with_listener(listener, shutdown).await
    }

    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        shutdown: &ShutdownManager,
    ) -> Result<()> {
        let report = RecoveryService::new(self.store.clone(), self.queue.clone())
            .recover(Utc::now())
            .await
            .context("启动时状态恢复失败")?;
        for e in &report.errors {
            error!("状态恢复错误: {}", e);
        }

        let sender = shutdown
            .sender()
            .await
            .context("应用启动前已经触发关闭")?;
        self.workers.start(&sender).await;

        let scheduler_handle = if self.config.scheduler.enabled {
            let scheduler = self.scheduler.clone();
            let rx = sender.subscribe();
            Some(tokio::spawn(async move { scheduler.run(rx).await }))
        } else {
            info!("定时调度器已禁用");
            None
        };

        let local_addr = listener.local_addr().context("获取监听地址失败")?;
        info!("API服务器启动在 {}", local_addr);

        let app = create_app(self.state(), &self.config.api);
        let mut server_rx = sender.subscribe();
        drop(sender);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败");

        self.workers.stop().await;
        if let Some(handle) = scheduler_handle {
            if let Err(e) = handle.await {
                error!("定时调度器退出异常: {}", e);
            }
        }
        self.store.close().await;

        info!("应用已停止");
        served
    }
}
