use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use scheduler_core::models::{ClusterEvent, ClusterNode, NodeLoad};
use scheduler_core::traits::{Clock, ClusterTransport};
use scheduler_core::SchedulerResult;

/// Samples the local node's load right before a heartbeat is sent.
pub type LoadProbe = Arc<dyn Fn() -> NodeLoad + Send + Sync>;

/// Publishes the local node's heartbeat.
///
/// Only the local node's own fields are touched here; remote nodes learn about
/// it from the published event.
pub struct HeartbeatManager {
    node: Arc<ClusterNode>,
    transport: Arc<dyn ClusterTransport>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    load_probe: Option<LoadProbe>,
}

impl HeartbeatManager {
    pub fn new(
        node: Arc<ClusterNode>,
        transport: Arc<dyn ClusterTransport>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            node,
            transport,
            clock,
            interval,
            load_probe: None,
        }
    }

    pub fn with_load_probe(mut self, probe: LoadProbe) -> Self {
        self.load_probe = Some(probe);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn send_heartbeat(&self) -> SchedulerResult<()> {
        let now = self.clock.now();
        self.node.record_heartbeat(now);
        if let Some(probe) = &self.load_probe {
            self.node.apply_load(probe());
        }

        let event = ClusterEvent::Heartbeat {
            node_id: self.node.node_id().to_string(),
            timestamp_ms: now.timestamp_millis(),
            cpu_load: i32::from(self.node.cpu_load()),
            memory_used_mb: i64::try_from(self.node.memory_used_mb()).unwrap_or(i64::MAX),
            active_jobs: i64::from(self.node.active_jobs()),
        };
        trace!(node.id = self.node.node_id(), "sending heartbeat");
        self.transport.publish(event).await
    }
}
