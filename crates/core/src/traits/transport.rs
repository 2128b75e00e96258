use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SchedulerResult;
use crate::models::ClusterEvent;

/// Publish/subscribe channel between cluster coordinators.
///
/// Delivery is at-least-once and best effort: a subscriber may also receive
/// the events it published itself and must tolerate duplicates.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    async fn publish(&self, event: ClusterEvent) -> SchedulerResult<()>;

    /// Every call returns an independent stream of all events published after it.
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<ClusterEvent>;
}
