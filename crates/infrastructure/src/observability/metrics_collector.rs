//! Metrics collector for the scheduler
//!
//! Thin wrapper over the `metrics` facade. Without an installed recorder
//! every call is a no-op; the binary installs the Prometheus exporter.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use scheduler_core::models::JobExecutionResult;

pub struct MetricsCollector {
    job_executions_total: Counter,
    job_execution_duration: Histogram,
    job_failures_total: Counter,
    job_timeouts_total: Counter,
    job_retries_total: Counter,
    job_terminal_failures_total: Counter,
    skipped_fires_total: Counter,

    scheduled_jobs: Gauge,
    in_flight_executions: Gauge,
    cluster_active_nodes: Gauge,
    cluster_is_leader: Gauge,
    leadership_changes_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            job_executions_total: counter!("scheduler_job_executions_total"),
            job_execution_duration: histogram!("scheduler_job_execution_duration_seconds"),
            job_failures_total: counter!("scheduler_job_failures_total"),
            job_timeouts_total: counter!("scheduler_job_timeouts_total"),
            job_retries_total: counter!("scheduler_job_retries_total"),
            job_terminal_failures_total: counter!("scheduler_job_terminal_failures_total"),
            skipped_fires_total: counter!("scheduler_skipped_fires_total"),
            scheduled_jobs: gauge!("scheduler_scheduled_jobs"),
            in_flight_executions: gauge!("scheduler_in_flight_executions"),
            cluster_active_nodes: gauge!("scheduler_cluster_active_nodes"),
            cluster_is_leader: gauge!("scheduler_cluster_is_leader"),
            leadership_changes_total: counter!("scheduler_cluster_leadership_changes_total"),
        }
    }

    /// Record a finished execution
    pub fn record_execution(&self, result: &JobExecutionResult) {
        self.job_executions_total.increment(1);
        self.job_execution_duration
            .record(result.duration().as_secs_f64());
        if result.is_failure() {
            self.job_failures_total.increment(1);
        }
        if result.error_kind() == Some(scheduler_core::models::ErrorKind::Timeout) {
            self.job_timeouts_total.increment(1);
        }
    }

    pub fn record_retry(&self) {
        self.job_retries_total.increment(1);
    }

    pub fn record_terminal_failure(&self) {
        self.job_terminal_failures_total.increment(1);
    }

    pub fn record_skipped_fire(&self) {
        self.skipped_fires_total.increment(1);
    }

    pub fn update_scheduled_jobs(&self, count: usize) {
        self.scheduled_jobs.set(count as f64);
    }

    pub fn execution_started(&self) {
        self.in_flight_executions.increment(1.0);
    }

    pub fn execution_finished(&self) {
        self.in_flight_executions.decrement(1.0);
    }

    pub fn update_cluster_view(&self, active_nodes: usize, is_leader: bool) {
        self.cluster_active_nodes.set(active_nodes as f64);
        self.cluster_is_leader.set(if is_leader { 1.0 } else { 0.0 });
    }

    pub fn record_leadership_change(&self) {
        self.leadership_changes_total.increment(1);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::ErrorKind;
    use std::collections::HashMap;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_execution(&JobExecutionResult::success("ok", HashMap::new()));
        metrics.record_execution(&JobExecutionResult::failure("late", ErrorKind::Timeout));
        metrics.record_retry();
        metrics.update_scheduled_jobs(3);
        metrics.execution_started();
        metrics.execution_finished();
        metrics.update_cluster_view(2, true);
        metrics.record_leadership_change();
    }
}
