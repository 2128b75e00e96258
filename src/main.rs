use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use scheduler::app::Application;
use scheduler::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use scheduler_core::config::{AppConfig, LogFormat};
use scheduler_infrastructure::init_logging;
use tracing::{error, info, warn};

/// 分布式定时任务调度节点
#[derive(Debug, Parser)]
#[command(name = "scheduler", version, about = "分布式定时任务调度系统")]
struct Cli {
    /// 配置文件路径，不指定时按默认位置查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 覆盖配置中的节点 id
    #[arg(long, value_name = "ID")]
    node_id: Option<String>,

    /// 日志级别
    #[arg(short, long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_enum, value_name = "FORMAT")]
    log_format: Option<CliLogFormat>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Json => LogFormat::Json,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置，命令行参数优先
    let mut config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            cli.config.as_deref().unwrap_or("<默认位置>")
        )
    })?;
    if let Some(node_id) = cli.node_id {
        config.cluster.node_id = Some(node_id);
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format.into();
    }

    init_logging(&config.observability).context("初始化日志系统失败")?;
    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    info!("启动分布式任务调度系统");
    let grace = config.scheduler.shutdown_grace_period();
    let app = Arc::new(Application::new(config).await?);
    let plugins = app.registry().available_plugins().await;
    info!(node.id = app.node_id(), plugins = ?plugins, "节点已创建");

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    // 宽限期之外再留一些时间给集群离开流程
    match tokio::time::timeout(grace + Duration::from_secs(5), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式任务调度系统已退出");
    Ok(())
}

/// 安装 Prometheus 导出器
fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus导出器失败")?;
    info!(metrics.address = %addr, "Prometheus metrics exporter installed");
    Ok(())
}
