use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{JobDefinition, JobExecutionResult};
use scheduler_core::traits::{ExecutionRecord, JobExecutionStore, JobRepository};
use scheduler_core::SchedulerResult;
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// 内存任务仓库
///
/// 进程内的任务目录，重启后丢失。适用于单机部署与测试。
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobRepository {
    jobs: Arc<RwLock<HashMap<String, JobDefinition>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save_job(&self, job: &JobDefinition) -> SchedulerResult<()> {
        self.jobs
            .write()
            .await
            .insert(job.job_id().to_string(), job.clone());
        debug!(job.id = job.job_id(), "job saved");
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> SchedulerResult<Option<JobDefinition>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn get_all_jobs(&self) -> SchedulerResult<Vec<JobDefinition>> {
        let mut jobs: Vec<JobDefinition> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.job_id().cmp(b.job_id()));
        Ok(jobs)
    }

    async fn delete_job(&self, job_id: &str) -> SchedulerResult<Option<JobDefinition>> {
        let removed = self.jobs.write().await.remove(job_id);
        if removed.is_some() {
            debug!(job.id = job_id, "job deleted");
        }
        Ok(removed)
    }

    async fn job_exists(&self, job_id: &str) -> SchedulerResult<bool> {
        Ok(self.jobs.read().await.contains_key(job_id))
    }
}

/// 内存执行历史
///
/// 每个任务最多保留 `limit` 条记录，超出时丢弃最旧的记录。
#[derive(Debug, Clone)]
pub struct InMemoryExecutionStore {
    history: Arc<RwLock<HashMap<String, VecDeque<ExecutionRecord>>>>,
    limit: usize,
}

impl InMemoryExecutionStore {
    pub fn new(limit: usize) -> Self {
        Self {
            history: Arc::new(RwLock::new(HashMap::new())),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[async_trait]
impl JobExecutionStore for InMemoryExecutionStore {
    async fn save_execution(
        &self,
        job_id: &str,
        result: &JobExecutionResult,
        executed_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut history = self.history.write().await;
        let records = history.entry(job_id.to_string()).or_default();
        records.push_front(ExecutionRecord {
            job_id: job_id.to_string(),
            executed_at,
            result: result.clone(),
        });
        records.truncate(self.limit);
        Ok(())
    }

    async fn execution_history(
        &self,
        job_id: &str,
        limit: usize,
    ) -> SchedulerResult<Vec<ExecutionRecord>> {
        let history = self.history.read().await;
        Ok(history
            .get(job_id)
            .map(|records| records.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap as Map;

    fn job(id: &str) -> JobDefinition {
        JobDefinition::builder(id, "simple-logger").build().unwrap()
    }

    #[tokio::test]
    async fn test_save_replace_and_delete() {
        let repo = InMemoryJobRepository::new();
        repo.save_job(&job("b")).await.unwrap();
        repo.save_job(&job("a")).await.unwrap();

        let replacement = job("a").to_builder().name("renamed").build().unwrap();
        repo.save_job(&replacement).await.unwrap();

        let all = repo.get_all_jobs().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].job_name(), "renamed");
        assert!(repo.job_exists("b").await.unwrap());

        let removed = repo.delete_job("b").await.unwrap();
        assert_eq!(removed.map(|j| j.job_id().to_string()), Some("b".to_string()));
        assert!(repo.delete_job("b").await.unwrap().is_none());
        assert!(repo.get_job("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_bounded() {
        let store = InMemoryExecutionStore::new(3);
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        for i in 0..5 {
            let result = JobExecutionResult::success(format!("run {i}"), Map::new());
            store
                .save_execution("job-1", &result, base + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }

        let history = store.execution_history("job-1", 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].result.message(), "run 4");
        assert_eq!(history[2].result.message(), "run 2");

        let latest = store.execution_history("job-1", 1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert!(store.execution_history("other", 5).await.unwrap().is_empty());
    }
}
