use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 关闭信号只发送一次；关闭之后订阅的接收器会立即收到信号。
pub struct ShutdownManager {
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.shutdown_tx.lock().await.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.lock().await.take() else {
            debug!("关闭信号已经发送过");
            return;
        };
        debug!(subscribers = tx.receiver_count(), "发送关闭信号");
        // 没有订阅者时发送失败，可以忽略
        let _ = tx.send(());
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.lock().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_existing_and_late_subscribers() {
        let manager = ShutdownManager::new();
        let mut early = manager.subscribe().await;
        assert!(!manager.is_shutdown().await);

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(early.recv().await.is_ok());
        let mut late = manager.subscribe().await;
        assert!(late.recv().await.is_ok());
        assert!(manager.is_shutdown().await);
    }
}
