//! Structured logging utilities
//!
//! Named lifecycle events for jobs and cluster membership. Every event carries
//! an `event` field so log pipelines can filter on it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::models::{JobDefinition, JobExecutionResult, NodeStatus};
use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log job registration with the orchestrator
    pub fn log_job_scheduled(job: &JobDefinition, next_fire: Option<DateTime<Utc>>) {
        info!(
            event = "job_scheduled",
            job.id = job.job_id(),
            job.name = job.job_name(),
            job.plugin = job.plugin_name(),
            job.cron = job.cron_expression().unwrap_or("-"),
            job.next_fire = ?next_fire,
            "Job scheduled"
        );
    }

    pub fn log_job_unscheduled(job_id: &str) {
        info!(event = "job_unscheduled", job.id = job_id, "Job unscheduled");
    }

    /// Log a timer firing
    pub fn log_job_fired(job_id: &str, scheduled_for: DateTime<Utc>, attempt: u32) {
        debug!(
            event = "job_fired",
            job.id = job_id,
            job.scheduled_for = %scheduled_for,
            job.attempt = attempt,
            "Job timer fired"
        );
    }

    /// Log the outcome of one execution
    pub fn log_execution_complete(job_id: &str, node_id: &str, result: &JobExecutionResult) {
        let duration_ms = result.duration().as_millis() as u64;
        match result {
            JobExecutionResult::Failure {
                message,
                error_kind,
                should_retry,
                retry_count,
                ..
            } => error!(
                event = "job_execution_failed",
                job.id = job_id,
                node.id = node_id,
                job.duration_ms = duration_ms,
                job.error_kind = %error_kind,
                job.should_retry = should_retry,
                job.retry_count = retry_count,
                job.error = %message,
                "Job execution failed"
            ),
            JobExecutionResult::Cancelled { reason, .. } => warn!(
                event = "job_execution_cancelled",
                job.id = job_id,
                node.id = node_id,
                job.duration_ms = duration_ms,
                job.reason = %reason,
                "Job execution cancelled"
            ),
            _ => info!(
                event = "job_execution_complete",
                job.id = job_id,
                node.id = node_id,
                job.outcome = result.outcome(),
                job.duration_ms = duration_ms,
                "Job execution completed"
            ),
        }
    }

    /// Log a retry being queued
    pub fn log_retry_scheduled(job_id: &str, attempt: u32, max_retries: u32, delay: Duration) {
        warn!(
            event = "job_retry_scheduled",
            job.id = job_id,
            job.retry_attempt = attempt,
            job.max_retries = max_retries,
            job.retry_delay_ms = delay.as_millis() as u64,
            "Job retry scheduled"
        );
    }

    pub fn log_retries_exhausted(job_id: &str, attempts: u32) {
        error!(
            event = "job_retries_exhausted",
            job.id = job_id,
            job.attempts = attempts,
            "Job failed after exhausting retries"
        );
    }

    pub fn log_leader_changed(node_id: &str, previous: Option<&str>, leader: Option<&str>, epoch: u64) {
        info!(
            event = "leader_changed",
            node.id = node_id,
            cluster.previous_leader = previous.unwrap_or("none"),
            cluster.leader = leader.unwrap_or("none"),
            cluster.epoch = epoch,
            "Cluster leadership changed"
        );
    }

    pub fn log_node_status_changed(node_id: &str, member_id: &str, from: NodeStatus, to: NodeStatus) {
        if to == NodeStatus::Active {
            info!(
                event = "node_status_changed",
                node.id = node_id,
                member.id = member_id,
                member.from = %from,
                member.to = %to,
                "Cluster member status changed"
            );
        } else {
            warn!(
                event = "node_status_changed",
                node.id = node_id,
                member.id = member_id,
                member.from = %from,
                member.to = %to,
                "Cluster member status changed"
            );
        }
    }
}
