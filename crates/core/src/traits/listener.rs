use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::models::{JobDefinition, JobExecutionResult, NodeSnapshot};

/// Observer of orchestrator lifecycle events.
///
/// Callbacks run synchronously on the thread that produced the event and must
/// not block. Every method has an empty default.
pub trait SchedulerListener: Send + Sync {
    fn on_scheduler_start(&self) {}

    fn on_scheduler_stop(&self) {}

    fn on_job_scheduled(&self, _job: &JobDefinition) {}

    fn on_job_unscheduled(&self, _job: &JobDefinition) {}

    fn on_job_executing(&self, _job: &JobDefinition) {}

    fn on_job_executed(&self, _job: &JobDefinition, _result: &JobExecutionResult) {}

    /// `attempt` is the 1-based number of the retry that will run after `delay`.
    fn on_job_retry_scheduled(&self, _job: &JobDefinition, _attempt: u32, _delay: Duration) {}

    fn on_job_failed_terminally(&self, _job: &JobDefinition, _result: &JobExecutionResult) {}
}

/// Observer of membership and leadership changes.
pub trait ClusterListener: Send + Sync {
    fn on_leader_elected(&self, _leader_id: &str) {}

    fn on_node_joined(&self, _node: &NodeSnapshot) {}

    fn on_node_left(&self, _node: &NodeSnapshot) {}

    fn on_job_distributed(&self, _job_id: &str, _target_node: &str) {}
}

/// Set of listeners keyed by `Arc` identity.
///
/// Adding a listener twice or removing one that is absent is a no-op.
/// Notification iterates over a snapshot, so listeners may be added or removed
/// while an event is being delivered.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Returns `false` when the listener was already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Returns `false` when the listener was not registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: impl Fn(&L)) {
        let snapshot: Vec<Arc<L>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &snapshot {
            event(listener.as_ref());
        }
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}
