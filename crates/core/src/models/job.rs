use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_ms;
use crate::errors::{SchedulerError, SchedulerResult};

/// 默认首次重试延迟
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(30);
/// 默认最大重试延迟
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10 * 60);
/// 默认任务执行超时
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const FALLBACK_BACKOFF_MULTIPLIER: f64 = 2.0;

/// 重试策略
///
/// 描述失败后第 n 次重试之前的等待时间：
///
/// - 指数退避：`min(initial_delay * multiplier^(n-1), max_delay)`，
///   倍数不大于 1 时按 2.0 处理
/// - 固定延迟：每次均为 `min(initial_delay, max_delay)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "duration_ms", default = "default_initial_delay")]
    initial_delay: Duration,
    #[serde(with = "duration_ms", default = "default_max_delay")]
    max_delay: Duration,
    #[serde(default = "default_multiplier")]
    backoff_multiplier: f64,
    #[serde(default = "default_exponential")]
    exponential_backoff: bool,
}

fn default_initial_delay() -> Duration {
    DEFAULT_RETRY_INITIAL_DELAY
}

fn default_max_delay() -> Duration {
    DEFAULT_RETRY_MAX_DELAY
}

fn default_multiplier() -> f64 {
    FALLBACK_BACKOFF_MULTIPLIER
}

fn default_exponential() -> bool {
    true
}

impl RetryPolicy {
    /// 缺省的延迟取默认值（30秒 / 10分钟）
    pub fn new(
        initial_delay: Option<Duration>,
        max_delay: Option<Duration>,
        backoff_multiplier: f64,
        exponential_backoff: bool,
    ) -> Self {
        Self {
            initial_delay: initial_delay.unwrap_or(DEFAULT_RETRY_INITIAL_DELAY),
            max_delay: max_delay.unwrap_or(DEFAULT_RETRY_MAX_DELAY),
            backoff_multiplier,
            exponential_backoff,
        }
    }

    pub fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self::new(Some(initial_delay), Some(max_delay), multiplier, true)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(Some(delay), Some(delay), 1.0, false)
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn is_exponential(&self) -> bool {
        self.exponential_backoff
    }

    /// 第 `attempt` 次重试（从1开始计数）之前的等待时间
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        if !self.exponential_backoff {
            return self.initial_delay.min(self.max_delay);
        }

        let multiplier = if self.backoff_multiplier > 1.0 {
            self.backoff_multiplier
        } else {
            FALLBACK_BACKOFF_MULTIPLIER
        };
        // 指数上限避免溢出为无穷大
        let exponent = (attempt - 1).min(64) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(None, None, FALLBACK_BACKOFF_MULTIPLIER, true)
    }
}

/// 任务定义
///
/// 创建后不可变：修改任务需要通过 [`JobDefinition::to_builder`] 构建新的定义并重新调度。
/// 构建和反序列化都会执行校验，`job_id`、`plugin_name` 不能为空，超时必须大于零。
///
/// # 使用示例
///
/// ```rust
/// use scheduler_core::models::{JobDefinition, RetryPolicy};
/// use std::time::Duration;
///
/// let job = JobDefinition::builder("nightly-report", "simple-logger")
///     .name("Nightly report")
///     .cron("0 0 2 * * *")
///     .parameter("message", "generating report")
///     .retry_policy(RetryPolicy::exponential(
///         Duration::from_secs(5),
///         Duration::from_secs(60),
///         2.0,
///     ))
///     .max_retries(3)
///     .build()
///     .unwrap();
///
/// assert!(job.is_recurring());
/// assert_eq!(job.job_name(), "Nightly report");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JobDefinitionRecord")]
pub struct JobDefinition {
    job_id: String,
    job_name: String,
    plugin_name: String,
    cron_expression: Option<String>,
    parameters: HashMap<String, serde_json::Value>,
    retry_policy: RetryPolicy,
    #[serde(with = "duration_ms")]
    timeout: Duration,
    max_retries: u32,
    enabled: bool,
}

impl JobDefinition {
    pub fn builder(
        job_id: impl Into<String>,
        plugin_name: impl Into<String>,
    ) -> JobDefinitionBuilder {
        JobDefinitionBuilder::new(job_id.into(), plugin_name.into())
    }

    /// 以当前定义为基础构建新的定义
    pub fn to_builder(&self) -> JobDefinitionBuilder {
        JobDefinitionBuilder {
            job_id: self.job_id.clone(),
            job_name: Some(self.job_name.clone()),
            plugin_name: self.plugin_name.clone(),
            cron_expression: self.cron_expression.clone(),
            parameters: self.parameters.clone(),
            retry_policy: self.retry_policy.clone(),
            timeout: self.timeout,
            max_retries: self.max_retries,
            enabled: self.enabled,
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

    pub fn cron_expression(&self) -> Option<&str> {
        self.cron_expression.as_deref()
    }

    pub fn parameters(&self) -> &HashMap<String, serde_json::Value> {
        &self.parameters
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 是否带有周期性的CRON表达式
    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    /// 启用且带有CRON表达式的任务才会被定时器驱动
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.is_recurring()
    }
}

/// [`JobDefinition`] 构建器
#[derive(Debug, Clone)]
pub struct JobDefinitionBuilder {
    job_id: String,
    job_name: Option<String>,
    plugin_name: String,
    cron_expression: Option<String>,
    parameters: HashMap<String, serde_json::Value>,
    retry_policy: RetryPolicy,
    timeout: Duration,
    max_retries: u32,
    enabled: bool,
}

impl JobDefinitionBuilder {
    fn new(job_id: String, plugin_name: String) -> Self {
        Self {
            job_id,
            job_name: None,
            plugin_name,
            cron_expression: None,
            parameters: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            timeout: DEFAULT_JOB_TIMEOUT,
            max_retries: 0, // 默认不重试
            enabled: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    /// 移除CRON表达式，任务只能手动触发
    pub fn without_cron(mut self) -> Self {
        self.cron_expression = None;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> SchedulerResult<JobDefinition> {
        let job_id = self.job_id.trim().to_string();
        if job_id.is_empty() {
            return Err(SchedulerError::InvalidJobDefinition(
                "job_id 不能为空".to_string(),
            ));
        }
        let plugin_name = self.plugin_name.trim().to_string();
        if plugin_name.is_empty() {
            return Err(SchedulerError::InvalidJobDefinition(format!(
                "任务 {job_id} 的 plugin_name 不能为空"
            )));
        }
        if self.timeout.is_zero() {
            return Err(SchedulerError::InvalidJobDefinition(format!(
                "任务 {job_id} 的超时时间必须大于零"
            )));
        }

        // 空白的CRON表达式视为未设置
        let cron_expression = self
            .cron_expression
            .map(|expr| expr.trim().to_string())
            .filter(|expr| !expr.is_empty());
        let job_name = self
            .job_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| job_id.clone());

        Ok(JobDefinition {
            job_id,
            job_name,
            plugin_name,
            cron_expression,
            parameters: self.parameters,
            retry_policy: self.retry_policy,
            timeout: self.timeout,
            max_retries: self.max_retries,
            enabled: self.enabled,
        })
    }
}

/// 反序列化时的中间表示，经过构建器校验后转换为 [`JobDefinition`]
#[derive(Deserialize)]
struct JobDefinitionRecord {
    job_id: String,
    #[serde(default)]
    job_name: Option<String>,
    plugin_name: String,
    #[serde(default)]
    cron_expression: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    retry_policy: RetryPolicy,
    #[serde(with = "duration_ms", default = "default_job_timeout")]
    timeout: Duration,
    #[serde(default)]
    max_retries: u32,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_job_timeout() -> Duration {
    DEFAULT_JOB_TIMEOUT
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<JobDefinitionRecord> for JobDefinition {
    type Error = SchedulerError;

    fn try_from(record: JobDefinitionRecord) -> Result<Self, Self::Error> {
        let mut builder = JobDefinition::builder(record.job_id, record.plugin_name)
            .parameters(record.parameters)
            .retry_policy(record.retry_policy)
            .timeout(record.timeout)
            .max_retries(record.max_retries)
            .enabled(record.enabled);
        if let Some(name) = record.job_name {
            builder = builder.name(name);
        }
        if let Some(expr) = record.cron_expression {
            builder = builder.cron(expr);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_applies_defaults() {
        let job = JobDefinition::builder("job-1", "simple-logger").build().unwrap();

        assert_eq!(job.job_id(), "job-1");
        assert_eq!(job.job_name(), "job-1");
        assert_eq!(job.timeout(), DEFAULT_JOB_TIMEOUT);
        assert_eq!(job.max_retries(), 0);
        assert!(job.is_enabled());
        assert!(!job.is_recurring());
        assert_eq!(job.retry_policy().initial_delay(), Duration::from_secs(30));
        assert_eq!(job.retry_policy().max_delay(), Duration::from_secs(600));
    }

    #[test]
    fn test_builder_rejects_blank_identifiers() {
        let err = JobDefinition::builder("  ", "simple-logger").build().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobDefinition(_)));

        let err = JobDefinition::builder("job-1", "").build().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobDefinition(_)));

        let err = JobDefinition::builder("job-1", "simple-logger")
            .timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobDefinition(_)));
    }

    #[test]
    fn test_blank_cron_is_treated_as_absent() {
        let job = JobDefinition::builder("job-1", "simple-logger")
            .cron("   ")
            .build()
            .unwrap();
        assert_eq!(job.cron_expression(), None);
        assert!(!job.is_schedulable());
    }

    #[test]
    fn test_disabled_job_is_not_schedulable() {
        let job = JobDefinition::builder("job-1", "simple-logger")
            .cron("0 * * * * *")
            .enabled(false)
            .build()
            .unwrap();
        assert!(job.is_recurring());
        assert!(!job.is_schedulable());
    }

    #[test]
    fn test_to_builder_replaces_definition() {
        let original = JobDefinition::builder("job-1", "simple-logger")
            .cron("0 * * * * *")
            .parameter("message", "hello")
            .build()
            .unwrap();
        let updated = original.to_builder().without_cron().build().unwrap();

        assert_eq!(updated.parameters().get("message"), Some(&json!("hello")));
        assert!(original.is_recurring());
        assert!(!updated.is_recurring());
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10), 2.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(10));
    }

    #[test]
    fn test_non_growing_multiplier_falls_back_to_doubling() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60), 0.5);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_fixed_delay_policy() {
        let policy = RetryPolicy::fixed(Duration::from_secs(7));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(7));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(7));
    }

    #[test]
    fn test_deserialize_validates_and_fills_defaults() {
        let job: JobDefinition = serde_json::from_value(json!({
            "job_id": "job-1",
            "plugin_name": "simple-logger",
            "cron_expression": "*/15 * * * * *",
            "timeout": 5000
        }))
        .unwrap();
        assert_eq!(job.timeout(), Duration::from_secs(5));
        assert_eq!(job.retry_policy(), &RetryPolicy::default());
        assert!(job.is_enabled());

        let roundtrip: JobDefinition =
            serde_json::from_str(&serde_json::to_string(&job).unwrap()).unwrap();
        assert_eq!(roundtrip, job);

        let invalid = serde_json::from_value::<JobDefinition>(json!({
            "job_id": "",
            "plugin_name": "simple-logger"
        }));
        assert!(invalid.is_err());
    }
}
