use std::sync::Arc;

use anyhow::{Context, Result};
use scheduler_core::config::AppConfig;
use scheduler_core::models::generate_node_id;
use scheduler_core::traits::{Clock, ClusterTransport, SystemClock};
use scheduler_dispatcher::{ClusterCoordinator, SchedulerOrchestrator};
use scheduler_infrastructure::{
    InMemoryExecutionStore, InMemoryJobRepository, InMemoryTransport, MetricsCollector,
};
use scheduler_worker::{register_builtin_plugins, PluginRegistry};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 单个调度节点
///
/// 组装插件注册表、存储、集群协调器（启用集群时）和调度编排器。
pub struct Application {
    config: AppConfig,
    node_id: String,
    registry: Arc<PluginRegistry>,
    coordinator: Option<Arc<ClusterCoordinator>>,
    scheduler: Arc<SchedulerOrchestrator>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(InMemoryTransport::new())).await
    }

    /// 使用指定的集群传输层创建应用实例，同一进程内的多个节点可以共享一个传输层
    pub async fn with_transport(
        config: AppConfig,
        transport: Arc<dyn ClusterTransport>,
    ) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        let node_id = resolve_node_id(&config);
        info!(node.id = %node_id, cluster = config.cluster.enabled, "初始化调度节点");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Arc::new(MetricsCollector::new());

        let registry = Arc::new(PluginRegistry::new());
        register_builtin_plugins(&registry)
            .await
            .context("注册内置插件失败")?;

        let coordinator = config.cluster.enabled.then(|| {
            Arc::new(ClusterCoordinator::new(
                config.cluster.clone(),
                node_id.clone(),
                transport,
                Arc::clone(&clock),
                Arc::clone(&metrics),
            ))
        });

        let mut builder = SchedulerOrchestrator::builder(node_id.clone(), Arc::clone(&registry))
            .config(config.scheduler.clone())
            .repository(Arc::new(InMemoryJobRepository::new()))
            .execution_store(Arc::new(InMemoryExecutionStore::new(
                config.scheduler.execution_history_limit,
            )))
            .clock(clock)
            .metrics(metrics);
        if let Some(coordinator) = &coordinator {
            builder = builder.coordinator(Arc::clone(coordinator));
        }

        Ok(Self {
            config,
            node_id,
            registry,
            coordinator,
            scheduler: builder.build(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<SchedulerOrchestrator> {
        &self.scheduler
    }

    pub fn coordinator(&self) -> Option<&Arc<ClusterCoordinator>> {
        self.coordinator.as_ref()
    }

    /// 先加入集群再启动调度器，调度器启动时即可知道本节点是否为 leader
    pub async fn start(&self) -> Result<()> {
        if let Some(coordinator) = &self.coordinator {
            coordinator.start().await.context("加入集群失败")?;
        }
        self.scheduler.start().await.context("启动调度器失败")?;
        info!(node.id = %self.node_id, "调度节点已启动");
        Ok(())
    }

    /// 先停止调度器（宽限期内等待执行中的任务），再离开集群
    pub async fn stop(&self) -> Result<()> {
        self.scheduler.stop().await.context("停止调度器失败")?;
        if let Some(coordinator) = &self.coordinator {
            coordinator.stop().await.context("离开集群失败")?;
        }
        info!(node.id = %self.node_id, "调度节点已停止");
        Ok(())
    }

    /// 启动后一直运行到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;

        if let Err(e) = shutdown_rx.recv().await {
            warn!("关闭信号通道异常: {e}");
        }
        info!("调度节点收到关闭信号");

        self.stop().await
    }
}

/// 节点 id 优先取配置，否则由主机名生成
fn resolve_node_id(config: &AppConfig) -> String {
    if let Some(id) = config
        .cluster
        .node_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return id.to_string();
    }
    let host = hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| config.cluster.host.clone());
    generate_node_id(&host)
}
