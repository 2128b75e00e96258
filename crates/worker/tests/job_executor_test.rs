#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use scheduler_core::models::{ErrorKind, ExecutionContext, JobDefinition, JobExecutionResult};
    use scheduler_core::traits::{
        Clock, JobPlugin, MonotonicClock, PluginConfiguration, PluginError,
    };
    use scheduler_infrastructure::MetricsCollector;
    use scheduler_worker::{ExecutionRequest, JobExecutor, PluginRegistry};

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct ScriptedPlugin {
        behaviour: Behaviour,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobPlugin for ScriptedPlugin {
        fn name(&self) -> &str {
            "scripted"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(&self, _config: PluginConfiguration) -> Result<(), PluginError> {
            Ok(())
        }

        async fn execute(
            &self,
            context: &ExecutionContext,
        ) -> Result<JobExecutionResult, PluginError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let outcome = match &self.behaviour {
                Behaviour::Succeed => {
                    let mut output = HashMap::new();
                    output.insert("attempt".to_string(), context.attempt().into());
                    Ok(JobExecutionResult::success("done", output))
                }
                Behaviour::Fail => Err(PluginError::Network("connection refused".into())),
                Behaviour::Panic => panic!("boom"),
                Behaviour::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(JobExecutionResult::success("slept", HashMap::new()))
                }
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    struct Fixture {
        executor: JobExecutor,
        peak: Arc<AtomicUsize>,
    }

    async fn fixture(behaviour: Behaviour, pool_size: usize) -> Fixture {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let behaviour = Arc::new(std::sync::Mutex::new(Some(behaviour)));

        let registry = Arc::new(PluginRegistry::new());
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        registry
            .register("scripted", move || {
                let behaviour = behaviour
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or(Behaviour::Succeed);
                Arc::new(ScriptedPlugin {
                    behaviour,
                    running: Arc::clone(&r),
                    peak: Arc::clone(&p),
                }) as Arc<dyn JobPlugin>
            })
            .await
            .unwrap();

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::starting_at(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        Fixture {
            executor: JobExecutor::new(
                "node-test",
                registry,
                pool_size,
                clock,
                Arc::new(MetricsCollector::new()),
            ),
            peak,
        }
    }

    fn job(plugin: &str) -> JobDefinition {
        JobDefinition::builder("job-1", plugin)
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let fx = fixture(Behaviour::Succeed, 2).await;
        let result = fx.executor.execute(&job("scripted"), request()).await;

        assert!(result.is_success());
        match result {
            JobExecutionResult::Success { output, .. } => {
                assert_eq!(output.get("attempt"), Some(&serde_json::json!(0)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(fx.executor.active_executions(), 0);
    }

    #[tokio::test]
    async fn test_plugin_error_becomes_retryable_failure() {
        let fx = fixture(Behaviour::Fail, 2).await;
        let result = fx.executor.execute(&job("scripted"), request()).await;

        assert!(result.is_failure());
        assert!(result.should_retry());
        assert_eq!(result.error_kind(), Some(ErrorKind::PluginError));
        assert!(result.message().starts_with("Job execution failed:"));
        assert!(result.message().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let fx = fixture(Behaviour::Panic, 2).await;
        let result = fx.executor.execute(&job("scripted"), request()).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::PluginError));
        assert!(result.should_retry());
        assert!(result.message().contains("boom"));
        assert_eq!(fx.executor.active_executions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let fx = fixture(Behaviour::Sleep(Duration::from_secs(60)), 2).await;
        let result = fx.executor.execute(&job("scripted"), request()).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(result.should_retry());
        assert!(result.duration() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_not_retried() {
        let fx = fixture(Behaviour::Succeed, 2).await;
        let result = fx.executor.execute(&job("missing"), request()).await;

        assert_eq!(result.error_kind(), Some(ErrorKind::ConfigurationError));
        assert!(!result.should_retry());
    }

    #[tokio::test]
    async fn test_retry_count_is_carried_on_result() {
        let fx = fixture(Behaviour::Fail, 2).await;
        let result = fx
            .executor
            .execute(&job("scripted"), request().attempt(2))
            .await;

        match result {
            JobExecutionResult::Failure { retry_count, .. } => assert_eq!(retry_count, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_executor_cancels() {
        let fx = fixture(Behaviour::Succeed, 1).await;
        fx.executor.close();
        assert!(fx.executor.is_closed());

        let result = fx.executor.execute(&job("scripted"), request()).await;
        assert!(matches!(result, JobExecutionResult::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_concurrency() {
        let fx = Arc::new(fixture(Behaviour::Sleep(Duration::from_millis(100)), 2).await);
        let job = job("scripted");

        let runs = (0..5).map(|_| {
            let fx = Arc::clone(&fx);
            let job = job.clone();
            tokio::spawn(async move { fx.executor.execute(&job, request()).await })
        });
        for handle in futures::future::join_all(runs).await {
            assert!(handle.unwrap().is_success());
        }

        assert_eq!(fx.peak.load(Ordering::SeqCst), 2);
    }
}
