use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::job::JobDefinition;

/// Everything a plugin sees about the execution it is running.
///
/// Progress, metrics and log lines are write-only from the plugin's point of
/// view; the executor reads progress back when it has to report a
/// cancellation. The shared-state map is scratch space for the duration of
/// one execution and is never persisted.
#[derive(Debug)]
pub struct ExecutionContext {
    job_id: String,
    job_name: String,
    plugin_name: String,
    scheduled_time: DateTime<Utc>,
    actual_start_time: DateTime<Utc>,
    parameters: Arc<HashMap<String, Value>>,
    node_id: String,
    correlation_id: String,
    attempt: u32,
    leader_node: bool,
    total_cluster_nodes: usize,
    progress: AtomicU8,
    metrics: Mutex<Vec<(String, Value)>>,
    shared_state: Mutex<HashMap<String, Value>>,
    cancel_tx: watch::Sender<bool>,
}

impl ExecutionContext {
    pub fn builder(job: &JobDefinition) -> ExecutionContextBuilder<'_> {
        ExecutionContextBuilder {
            job,
            node_id: "local-node".to_string(),
            scheduled_time: None,
            actual_start_time: None,
            attempt: 0,
            leader_node: true,
            total_cluster_nodes: 1,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.scheduled_time
    }

    pub fn actual_start_time(&self) -> DateTime<Utc> {
        self.actual_start_time
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Zero for the first execution, n for the n-th retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_recovery_execution(&self) -> bool {
        self.attempt > 0
    }

    pub fn is_leader_node(&self) -> bool {
        self.leader_node
    }

    pub fn total_cluster_nodes(&self) -> usize {
        self.total_cluster_nodes
    }

    pub fn update_progress(&self, percentage: u8, status: &str) {
        let percentage = percentage.min(100);
        self.progress.store(percentage, Ordering::Relaxed);
        info!(
            job.id = %self.job_id,
            correlation_id = %self.correlation_id,
            progress = percentage,
            "{status}"
        );
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn add_metric(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        info!(
            job.id = %self.job_id,
            correlation_id = %self.correlation_id,
            metric.name = %name,
            metric.value = %value,
            "job metric"
        );
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, value));
    }

    pub fn metrics(&self) -> Vec<(String, Value)> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn log_info(&self, message: &str) {
        info!(job.id = %self.job_id, correlation_id = %self.correlation_id, "{message}");
    }

    pub fn log_warn(&self, message: &str) {
        warn!(job.id = %self.job_id, correlation_id = %self.correlation_id, "{message}");
    }

    pub fn log_error(&self, message: &str, cause: Option<&dyn std::error::Error>) {
        match cause {
            Some(cause) => error!(
                job.id = %self.job_id,
                correlation_id = %self.correlation_id,
                error = %cause,
                "{message}"
            ),
            None => error!(job.id = %self.job_id, correlation_id = %self.correlation_id, "{message}"),
        }
    }

    pub fn put_shared_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.shared_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn shared_state(&self, key: &str) -> Option<Value> {
        self.shared_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Asks the plugin to stop. Cooperative: plugins observe it through
    /// [`ExecutionContext::is_cancelled`] or [`ExecutionContext::cancelled`].
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolves once [`ExecutionContext::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

pub struct ExecutionContextBuilder<'a> {
    job: &'a JobDefinition,
    node_id: String,
    scheduled_time: Option<DateTime<Utc>>,
    actual_start_time: Option<DateTime<Utc>>,
    attempt: u32,
    leader_node: bool,
    total_cluster_nodes: usize,
}

impl ExecutionContextBuilder<'_> {
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn scheduled_time(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(at);
        self
    }

    pub fn actual_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.actual_start_time = Some(at);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn cluster_view(mut self, leader_node: bool, total_cluster_nodes: usize) -> Self {
        self.leader_node = leader_node;
        self.total_cluster_nodes = total_cluster_nodes;
        self
    }

    pub fn build(self) -> ExecutionContext {
        let actual_start_time = self.actual_start_time.unwrap_or_else(Utc::now);
        let (cancel_tx, _) = watch::channel(false);
        ExecutionContext {
            job_id: self.job.job_id().to_string(),
            job_name: self.job.job_name().to_string(),
            plugin_name: self.job.plugin_name().to_string(),
            scheduled_time: self.scheduled_time.unwrap_or(actual_start_time),
            actual_start_time,
            parameters: Arc::new(self.job.parameters().clone()),
            node_id: self.node_id,
            correlation_id: Uuid::new_v4().to_string(),
            attempt: self.attempt,
            leader_node: self.leader_node,
            total_cluster_nodes: self.total_cluster_nodes,
            progress: AtomicU8::new(0),
            metrics: Mutex::new(Vec::new()),
            shared_state: Mutex::new(HashMap::new()),
            cancel_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> JobDefinition {
        JobDefinition::builder("job-1", "simple-logger")
            .parameter("message", "hi")
            .build()
            .unwrap()
    }

    #[test]
    fn test_context_carries_job_identity() {
        let job = job();
        let ctx = ExecutionContext::builder(&job)
            .node_id("node-a")
            .attempt(2)
            .cluster_view(false, 3)
            .build();

        assert_eq!(ctx.job_id(), "job-1");
        assert_eq!(ctx.plugin_name(), "simple-logger");
        assert_eq!(ctx.parameter("message"), Some(&json!("hi")));
        assert_eq!(ctx.node_id(), "node-a");
        assert!(ctx.is_recovery_execution());
        assert!(!ctx.is_leader_node());
        assert_eq!(ctx.total_cluster_nodes(), 3);
        assert_eq!(ctx.scheduled_time(), ctx.actual_start_time());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let job = job();
        let first = ExecutionContext::builder(&job).build();
        let second = ExecutionContext::builder(&job).build();
        assert_ne!(first.correlation_id(), second.correlation_id());
    }

    #[test]
    fn test_progress_metrics_and_shared_state() {
        let job = job();
        let ctx = ExecutionContext::builder(&job).build();

        ctx.update_progress(150, "almost");
        assert_eq!(ctx.progress(), 100);

        ctx.add_metric("rows", 10);
        assert_eq!(ctx.metrics(), vec![("rows".to_string(), json!(10))]);

        ctx.put_shared_state("cursor", "abc");
        assert_eq!(ctx.shared_state("cursor"), Some(json!("abc")));
        assert_eq!(ctx.shared_state("missing"), None);
    }

    #[tokio::test]
    async fn test_cancellation_is_observable() {
        let job = job();
        let ctx = Arc::new(ExecutionContext::builder(&job).build());
        assert!(!ctx.is_cancelled());

        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.cancelled().await })
        };
        ctx.cancel();
        waiter.await.unwrap();
        assert!(ctx.is_cancelled());
    }
}
