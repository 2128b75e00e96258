#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use scheduler_core::models::{ErrorKind, JobDefinition, JobExecutionResult};
    use scheduler_core::traits::{Clock, SystemClock};
    use scheduler_infrastructure::MetricsCollector;
    use scheduler_worker::{
        register_builtin_plugins, ExecutionRequest, JobExecutor, PluginRegistry,
        FILE_PROCESSOR_PLUGIN, SHELL_PLUGIN, SIMPLE_LOGGER_PLUGIN,
    };

    async fn executor() -> JobExecutor {
        let registry = Arc::new(PluginRegistry::new());
        register_builtin_plugins(&registry).await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        JobExecutor::new(
            "node-plugins",
            registry,
            4,
            clock,
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn test_builtin_registration_is_idempotent() {
        let registry = PluginRegistry::new();
        register_builtin_plugins(&registry).await.unwrap();
        register_builtin_plugins(&registry).await.unwrap();

        assert_eq!(
            registry.available_plugins().await,
            vec![
                FILE_PROCESSOR_PLUGIN.to_string(),
                SHELL_PLUGIN.to_string(),
                SIMPLE_LOGGER_PLUGIN.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_simple_logger_reports_message() {
        let executor = executor().await;
        let job = JobDefinition::builder("greet", SIMPLE_LOGGER_PLUGIN)
            .parameter("message", "hello cluster")
            .parameter("delay_ms", 0)
            .build()
            .unwrap();

        let result = executor.execute(&job, ExecutionRequest::new(Utc::now())).await;
        match result {
            JobExecutionResult::Success { output, .. } => {
                assert_eq!(output["message"], "hello cluster");
                assert_eq!(output["message_length"], 13);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_logger_is_stopped_by_timeout() {
        let executor = executor().await;
        let job = JobDefinition::builder("slow", SIMPLE_LOGGER_PLUGIN)
            .parameter("delay_ms", 10_000)
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        let result = executor.execute(&job, ExecutionRequest::new(Utc::now())).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_file_processor_counts_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "one two\nthree\n").unwrap();

        let executor = executor().await;
        let job = JobDefinition::builder("count", FILE_PROCESSOR_PLUGIN)
            .parameter("path", file.path().to_string_lossy().to_string())
            .build()
            .unwrap();

        let result = executor.execute(&job, ExecutionRequest::new(Utc::now())).await;
        match result {
            JobExecutionResult::Success { output, .. } => {
                assert_eq!(output["lines"], 2);
                assert_eq!(output["words"], 3);
                assert_eq!(output["bytes"], 14);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_processor_classifies_errors() {
        let executor = executor().await;

        let missing_param = JobDefinition::builder("no-path", FILE_PROCESSOR_PLUGIN)
            .build()
            .unwrap();
        let result = executor
            .execute(&missing_param, ExecutionRequest::new(Utc::now()))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ConfigurationError));
        assert!(!result.should_retry());

        let missing_file = JobDefinition::builder("bad-path", FILE_PROCESSOR_PLUGIN)
            .parameter("path", "/definitely/not/here.txt")
            .build()
            .unwrap();
        let result = executor
            .execute(&missing_file, ExecutionRequest::new(Utc::now()))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceUnavailable));
        assert!(result.should_retry());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_exit_status_maps_to_outcome() {
        let executor = executor().await;

        let ok = JobDefinition::builder("echo", SHELL_PLUGIN)
            .parameter("command", "echo")
            .parameter("args", serde_json::json!(["scheduled"]))
            .build()
            .unwrap();
        let result = executor.execute(&ok, ExecutionRequest::new(Utc::now())).await;
        match result {
            JobExecutionResult::Success { output, .. } => {
                assert_eq!(output["stdout"], "scheduled");
                assert_eq!(output["exit_code"], 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let failing = JobDefinition::builder("false", SHELL_PLUGIN)
            .parameter("command", "false")
            .build()
            .unwrap();
        let result = executor
            .execute(&failing, ExecutionRequest::new(Utc::now()))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::PluginError));
        assert!(result.should_retry());
    }
}
