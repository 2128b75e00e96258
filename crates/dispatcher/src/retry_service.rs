use std::time::Duration;

use rand::Rng;
use tracing::debug;

use scheduler_core::models::{JobDefinition, JobExecutionResult, RetryPolicy};

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 重试间隔的随机抖动范围（0.0-1.0），只会延长间隔
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            jitter_factor: 0.0, // 默认不抖动，保证退避间隔严格递增
        }
    }
}

/// 一次执行结束后的重试决定
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 成功、部分成功或被取消，不需要重试
    Completed,
    /// 失败但不可重试
    NotRetryable,
    /// 第 `attempt` 次重试（从1开始），在 `delay` 之后执行
    Retry { attempt: u32, delay: Duration },
    /// 已达到最大重试次数
    Exhausted { attempts: u32 },
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// 重试服务接口
pub trait RetryService: Send + Sync {
    /// 根据执行结果和已完成的重试次数决定下一步
    fn decide(
        &self,
        job: &JobDefinition,
        result: &JobExecutionResult,
        retries_so_far: u32,
    ) -> RetryDecision;

    /// 计算第 `attempt` 次重试的等待时间
    fn retry_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration;
}

/// 按任务的 `RetryPolicy` 做指数或固定间隔退避
#[derive(Debug, Clone, Default)]
pub struct BackoffRetryService {
    config: RetryConfig,
}

impl BackoffRetryService {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryService for BackoffRetryService {
    fn decide(
        &self,
        job: &JobDefinition,
        result: &JobExecutionResult,
        retries_so_far: u32,
    ) -> RetryDecision {
        // 只有 should_retry 的 Failure 才会重试
        if !result.is_failure() {
            return RetryDecision::Completed;
        }
        if !result.should_retry() {
            return RetryDecision::NotRetryable;
        }
        if retries_so_far >= job.max_retries() {
            debug!(
                job.id = job.job_id(),
                retries = retries_so_far,
                max_retries = job.max_retries(),
                "任务已达到最大重试次数"
            );
            return RetryDecision::Exhausted {
                attempts: retries_so_far,
            };
        }

        let attempt = retries_so_far + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.retry_delay(job.retry_policy(), attempt),
        }
    }

    fn retry_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        let base = policy.delay_for_attempt(attempt);
        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(0.0..=jitter);
        base.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::ErrorKind;
    use std::collections::HashMap;

    fn job(max_retries: u32) -> JobDefinition {
        JobDefinition::builder("retrying", "noop")
            .retry_policy(RetryPolicy::exponential(
                Duration::from_secs(1),
                Duration::from_secs(60),
                2.0,
            ))
            .max_retries(max_retries)
            .build()
            .unwrap()
    }

    fn failure() -> JobExecutionResult {
        JobExecutionResult::failure("boom", ErrorKind::NetworkError)
    }

    #[test]
    fn test_success_and_cancellation_are_terminal() {
        let service = BackoffRetryService::default();
        let job = job(3);
        assert_eq!(
            service.decide(&job, &JobExecutionResult::success("ok", HashMap::new()), 0),
            RetryDecision::Completed
        );
        assert_eq!(
            service.decide(&job, &JobExecutionResult::cancelled("stop", "user"), 0),
            RetryDecision::Completed
        );
        assert_eq!(
            service.decide(
                &job,
                &JobExecutionResult::partial_success("half", HashMap::new(), 1, 1),
                0
            ),
            RetryDecision::Completed
        );
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let service = BackoffRetryService::default();
        let result =
            JobExecutionResult::permanent_failure("bad config", ErrorKind::ConfigurationError);
        assert_eq!(service.decide(&job(3), &result, 0), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_exponential_delays_until_exhausted() {
        let service = BackoffRetryService::default();
        let job = job(3);

        let delays: Vec<Duration> = (0..3)
            .map(|n| match service.decide(&job, &failure(), n) {
                RetryDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, n + 1);
                    delay
                }
                other => panic!("unexpected decision {other:?}"),
            })
            .collect();

        assert_eq!(
            delays,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(
            service.decide(&job, &failure(), 3),
            RetryDecision::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn test_jitter_only_lengthens_delay() {
        let service = BackoffRetryService::new(RetryConfig { jitter_factor: 0.5 });
        let policy = RetryPolicy::fixed(Duration::from_secs(10));
        for _ in 0..20 {
            let delay = service.retry_delay(&policy, 1);
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(15));
        }
    }
}
