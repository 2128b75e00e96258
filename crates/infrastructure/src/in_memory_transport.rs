use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use scheduler_core::models::ClusterEvent;
use scheduler_core::traits::ClusterTransport;
use scheduler_core::SchedulerResult;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

/// In-process event bus.
///
/// Every subscriber, including the publisher's own subscription, receives
/// every event. Several coordinators sharing one instance form a cluster
/// inside a single process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTransport {
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<ClusterEvent>>>>,
    published: Arc<AtomicU64>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[async_trait]
impl ClusterTransport for InMemoryTransport {
    async fn publish(&self, event: ClusterEvent) -> SchedulerResult<()> {
        trace!(event.type = event.event_type(), source = event.source_node(), "publishing cluster event");
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.write().await;
        // 接收端已关闭的订阅者直接移除
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(node: &str) -> ClusterEvent {
        ClusterEvent::Heartbeat {
            node_id: node.to_string(),
            timestamp_ms: 0,
            cpu_load: 0,
            memory_used_mb: 0,
            active_jobs: 0,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let transport = InMemoryTransport::new();
        let mut first = transport.subscribe().await;
        let mut second = transport.subscribe().await;

        transport.publish(heartbeat("node-a")).await.unwrap();

        assert_eq!(first.recv().await, Some(heartbeat("node-a")));
        assert_eq!(second.recv().await, Some(heartbeat("node-a")));
        assert_eq!(transport.published_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_dropped() {
        let transport = InMemoryTransport::new();
        let rx = transport.subscribe().await;
        drop(rx);
        let _kept = transport.subscribe().await;

        transport.publish(heartbeat("node-a")).await.unwrap();
        assert_eq!(transport.subscriber_count().await, 1);
    }
}
