use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::models::{ErrorKind, ExecutionContext, JobDefinition, JobExecutionResult};
use scheduler_core::traits::{Clock, JobPlugin, PluginError};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument, Span};

use crate::plugin_registry::PluginRegistry;

/// Per-execution facts supplied by the orchestrator.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub scheduled_time: DateTime<Utc>,
    /// Zero for the first run, n for the n-th retry.
    pub attempt: u32,
    pub is_leader: bool,
    pub total_cluster_nodes: usize,
}

impl ExecutionRequest {
    pub fn new(scheduled_time: DateTime<Utc>) -> Self {
        Self {
            scheduled_time,
            attempt: 0,
            is_leader: true,
            total_cluster_nodes: 1,
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn cluster_view(mut self, is_leader: bool, total_cluster_nodes: usize) -> Self {
        self.is_leader = is_leader;
        self.total_cluster_nodes = total_cluster_nodes;
        self
    }
}

/// Runs one job attempt on a bounded pool.
///
/// Never returns an error: an unknown plugin, a plugin error, a panic or a
/// timeout all become a [`JobExecutionResult`]. Dropping an `execute` future
/// cancels the context and aborts the plugin task behind it.
pub struct JobExecutor {
    node_id: String,
    registry: Arc<PluginRegistry>,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    plugin_tasks: Arc<watch::Sender<usize>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    span: Span,
}

impl JobExecutor {
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<PluginRegistry>,
        pool_size: usize,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let node_id = node_id.into();
        let span = tracing::info_span!("job_executor", node.id = %node_id);
        Self {
            node_id,
            registry,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            active: AtomicUsize::new(0),
            plugin_tasks: Arc::new(watch::channel(0).0),
            clock,
            metrics,
            span,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Executions currently holding a pool slot.
    pub fn active_executions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stops accepting new executions. Running ones are not interrupted.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Plugin tasks that have not been dropped yet, aborted ones included.
    pub fn plugin_tasks(&self) -> usize {
        *self.plugin_tasks.borrow()
    }

    /// Waits up to `limit` for every plugin task to finish or be torn down.
    /// Returns `false` if some are still alive.
    pub async fn wait_for_plugin_tasks(&self, limit: Duration) -> bool {
        let mut rx = self.plugin_tasks.subscribe();
        tokio::time::timeout(limit, rx.wait_for(|n| *n == 0))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    pub async fn execute(&self, job: &JobDefinition, request: ExecutionRequest) -> JobExecutionResult {
        let span = tracing::info_span!(
            parent: &self.span,
            "execute_job",
            job.id = %job.job_id(),
            attempt = request.attempt
        );
        self.execute_inner(job, request).instrument(span).await
    }

    async fn execute_inner(&self, job: &JobDefinition, request: ExecutionRequest) -> JobExecutionResult {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return JobExecutionResult::cancelled("executor is shut down", "system");
        };
        let _slot = ActiveSlot::acquire(&self.active, &self.metrics);

        let instance = match self
            .registry
            .get_or_create(job.plugin_name(), job.parameters())
            .await
        {
            Ok(instance) => instance,
            Err(err) => {
                warn!(plugin = job.plugin_name(), error = %err, "plugin unavailable");
                return JobExecutionResult::permanent_failure(
                    format!("Plugin unavailable: {err}"),
                    ErrorKind::ConfigurationError,
                )
                .with_cause(err.to_string())
                .with_retry_count(request.attempt);
            }
        };

        let started = Instant::now();
        let context = Arc::new(
            ExecutionContext::builder(job)
                .node_id(self.node_id.clone())
                .scheduled_time(request.scheduled_time)
                .actual_start_time(self.clock.now())
                .attempt(request.attempt)
                .cluster_view(request.is_leader, request.total_cluster_nodes)
                .build(),
        );
        StructuredLogger::log_job_fired(job.job_id(), request.scheduled_time, request.attempt);

        let mut task = PluginTask::spawn(
            Arc::clone(instance.plugin()),
            Arc::clone(&context),
            LiveTask::enter(Arc::clone(&self.plugin_tasks)),
        );

        let result = match tokio::time::timeout(job.timeout(), &mut task.handle).await {
            Ok(Ok(Ok(result))) => {
                if result.duration().is_zero() {
                    result.with_duration(started.elapsed())
                } else {
                    result
                }
            }
            Ok(Ok(Err(err))) => JobExecutionResult::failure(
                format!("Job execution failed: {err}"),
                ErrorKind::PluginError,
            )
            .with_cause(err.to_string())
            .with_duration(started.elapsed()),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                JobExecutionResult::failure(
                    format!("Job execution failed: plugin panicked: {message}"),
                    ErrorKind::PluginError,
                )
                .with_cause(message)
                .with_duration(started.elapsed())
            }
            Ok(Err(_)) => JobExecutionResult::cancelled("execution task was aborted", "system")
                .with_progress(context.progress())
                .with_duration(started.elapsed()),
            Err(_) => {
                task.cancel();
                JobExecutionResult::failure(
                    format!("Job timed out after {}ms", job.timeout().as_millis()),
                    ErrorKind::Timeout,
                )
                .with_duration(started.elapsed())
            }
        }
        .with_retry_count(request.attempt);

        debug!(outcome = result.outcome(), "execution finished");
        StructuredLogger::log_execution_complete(job.job_id(), &self.node_id, &result);
        self.metrics.record_execution(&result);
        result
    }
}

/// Owns the spawned plugin task. Cancels and aborts it unless it already ran
/// to completion.
struct PluginTask {
    handle: JoinHandle<Result<JobExecutionResult, PluginError>>,
    context: Arc<ExecutionContext>,
}

impl PluginTask {
    fn spawn(
        plugin: Arc<dyn JobPlugin>,
        context: Arc<ExecutionContext>,
        live: LiveTask,
    ) -> Self {
        let plugin_context = Arc::clone(&context);
        let handle = tokio::spawn(
            async move {
                let _live = live;
                plugin.execute(&plugin_context).await
            }
            .in_current_span(),
        );
        Self { handle, context }
    }

    fn cancel(&self) {
        self.context.cancel();
        self.handle.abort();
    }
}

impl Drop for PluginTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!("execution abandoned, aborting plugin task");
            self.cancel();
        }
    }
}

/// Counts a plugin task until its future is dropped.
struct LiveTask(Arc<watch::Sender<usize>>);

impl LiveTask {
    fn enter(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct ActiveSlot<'a> {
    active: &'a AtomicUsize,
    metrics: &'a MetricsCollector,
}

impl<'a> ActiveSlot<'a> {
    fn acquire(active: &'a AtomicUsize, metrics: &'a MetricsCollector) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        metrics.execution_started();
        Self { active, metrics }
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.metrics.execution_finished();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
