use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerResult;
use crate::models::{JobDefinition, JobExecutionResult};

/// Durable catalog of job definitions.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts or replaces the definition with the same job id.
    async fn save_job(&self, job: &JobDefinition) -> SchedulerResult<()>;
    async fn get_job(&self, job_id: &str) -> SchedulerResult<Option<JobDefinition>>;
    async fn get_all_jobs(&self) -> SchedulerResult<Vec<JobDefinition>>;
    /// Returns the removed definition, if any.
    async fn delete_job(&self, job_id: &str) -> SchedulerResult<Option<JobDefinition>>;
    async fn job_exists(&self, job_id: &str) -> SchedulerResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_id: String,
    pub executed_at: DateTime<Utc>,
    pub result: JobExecutionResult,
}

/// History of finished executions.
#[async_trait]
pub trait JobExecutionStore: Send + Sync {
    async fn save_execution(
        &self,
        job_id: &str,
        result: &JobExecutionResult,
        executed_at: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// Newest first, at most `limit` records.
    async fn execution_history(
        &self,
        job_id: &str,
        limit: usize,
    ) -> SchedulerResult<Vec<ExecutionRecord>>;
}
