use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_ms;

/// Classification attached to every failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PluginError,
    ConfigurationError,
    ResourceUnavailable,
    Timeout,
    NetworkError,
    PermissionDenied,
    DataValidationError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PluginError => "plugin_error",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::ResourceUnavailable => "resource_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::DataValidationError => "data_validation_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single job execution.
///
/// Results are plain values: they are stored in the execution history,
/// handed to listeners and inspected by the retry logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobExecutionResult {
    Success {
        message: String,
        output: HashMap<String, serde_json::Value>,
        #[serde(with = "duration_ms")]
        duration: Duration,
        output_size_bytes: u64,
    },
    Failure {
        message: String,
        cause: Option<String>,
        #[serde(with = "duration_ms")]
        duration: Duration,
        should_retry: bool,
        error_kind: ErrorKind,
        retry_count: u32,
    },
    PartialSuccess {
        message: String,
        partial_output: HashMap<String, serde_json::Value>,
        warning: Option<String>,
        #[serde(with = "duration_ms")]
        duration: Duration,
        success_count: u32,
        failure_count: u32,
    },
    Cancelled {
        reason: String,
        cancelled_by: String,
        #[serde(with = "duration_ms")]
        duration: Duration,
        progress_percentage: u8,
    },
}

impl JobExecutionResult {
    pub fn success(message: impl Into<String>, output: HashMap<String, serde_json::Value>) -> Self {
        let output_size_bytes = serde_json::to_vec(&output)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);
        JobExecutionResult::Success {
            message: message.into(),
            output,
            duration: Duration::ZERO,
            output_size_bytes,
        }
    }

    /// A failure that the retry logic is allowed to retry.
    pub fn failure(message: impl Into<String>, error_kind: ErrorKind) -> Self {
        JobExecutionResult::Failure {
            message: message.into(),
            cause: None,
            duration: Duration::ZERO,
            should_retry: true,
            error_kind,
            retry_count: 0,
        }
    }

    pub fn permanent_failure(message: impl Into<String>, error_kind: ErrorKind) -> Self {
        Self::failure(message, error_kind).with_should_retry(false)
    }

    pub fn partial_success(
        message: impl Into<String>,
        partial_output: HashMap<String, serde_json::Value>,
        success_count: u32,
        failure_count: u32,
    ) -> Self {
        JobExecutionResult::PartialSuccess {
            message: message.into(),
            partial_output,
            warning: None,
            duration: Duration::ZERO,
            success_count,
            failure_count,
        }
    }

    pub fn cancelled(reason: impl Into<String>, cancelled_by: impl Into<String>) -> Self {
        JobExecutionResult::Cancelled {
            reason: reason.into(),
            cancelled_by: cancelled_by.into(),
            duration: Duration::ZERO,
            progress_percentage: 0,
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        match &mut self {
            JobExecutionResult::Success { duration, .. }
            | JobExecutionResult::Failure { duration, .. }
            | JobExecutionResult::PartialSuccess { duration, .. }
            | JobExecutionResult::Cancelled { duration, .. } => *duration = elapsed,
        }
        self
    }

    pub fn with_cause(mut self, value: impl Into<String>) -> Self {
        if let JobExecutionResult::Failure { cause, .. } = &mut self {
            *cause = Some(value.into());
        }
        self
    }

    pub fn with_should_retry(mut self, retry: bool) -> Self {
        if let JobExecutionResult::Failure { should_retry, .. } = &mut self {
            *should_retry = retry;
        }
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        if let JobExecutionResult::Failure { retry_count, .. } = &mut self {
            *retry_count = count;
        }
        self
    }

    pub fn with_warning(mut self, value: impl Into<String>) -> Self {
        if let JobExecutionResult::PartialSuccess { warning, .. } = &mut self {
            *warning = Some(value.into());
        }
        self
    }

    pub fn with_progress(mut self, value: u8) -> Self {
        if let JobExecutionResult::Cancelled {
            progress_percentage,
            ..
        } = &mut self
        {
            *progress_percentage = value.min(100);
        }
        self
    }

    pub fn duration(&self) -> Duration {
        match self {
            JobExecutionResult::Success { duration, .. }
            | JobExecutionResult::Failure { duration, .. }
            | JobExecutionResult::PartialSuccess { duration, .. }
            | JobExecutionResult::Cancelled { duration, .. } => *duration,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobExecutionResult::Success { message, .. }
            | JobExecutionResult::Failure { message, .. }
            | JobExecutionResult::PartialSuccess { message, .. } => message,
            JobExecutionResult::Cancelled { reason, .. } => reason,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobExecutionResult::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobExecutionResult::Failure { .. })
    }

    /// Only a `Failure` flagged as retryable is eligible for another attempt.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            JobExecutionResult::Failure {
                should_retry: true,
                ..
            }
        )
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            JobExecutionResult::Failure { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn outcome(&self) -> &'static str {
        match self {
            JobExecutionResult::Success { .. } => "success",
            JobExecutionResult::Failure { .. } => "failure",
            JobExecutionResult::PartialSuccess { .. } => "partial_success",
            JobExecutionResult::Cancelled { .. } => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_measures_output_size() {
        let mut output = HashMap::new();
        output.insert("rows".to_string(), json!(42));
        let result = JobExecutionResult::success("done", output);

        match result {
            JobExecutionResult::Success {
                output_size_bytes, ..
            } => assert!(output_size_bytes > 0),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_failure_modifiers() {
        let result = JobExecutionResult::failure("boom", ErrorKind::NetworkError)
            .with_cause("connection reset")
            .with_retry_count(2)
            .with_duration(Duration::from_millis(150));

        assert!(result.should_retry());
        assert_eq!(result.error_kind(), Some(ErrorKind::NetworkError));
        assert_eq!(result.duration(), Duration::from_millis(150));
        assert_eq!(result.outcome(), "failure");
        match result {
            JobExecutionResult::Failure {
                cause, retry_count, ..
            } => {
                assert_eq!(cause.as_deref(), Some("connection reset"));
                assert_eq!(retry_count, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_only_retryable_failures_should_retry() {
        assert!(!JobExecutionResult::success("ok", HashMap::new()).should_retry());
        assert!(!JobExecutionResult::cancelled("stop", "user").should_retry());
        assert!(
            !JobExecutionResult::permanent_failure("bad config", ErrorKind::ConfigurationError)
                .should_retry()
        );
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let value = serde_json::to_value(
            JobExecutionResult::failure("late", ErrorKind::Timeout)
                .with_duration(Duration::from_secs(2)),
        )
        .unwrap();

        assert_eq!(value["outcome"], json!("failure"));
        assert_eq!(value["error_kind"], json!("TIMEOUT"));
        assert_eq!(value["duration"], json!(2000));
    }
}
