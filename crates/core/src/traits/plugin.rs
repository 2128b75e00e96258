//! 插件接口定义
//!
//! 任务的实际执行逻辑由插件提供。每个插件按名称注册到插件注册表，
//! 同一名称在进程内只会创建并初始化一个实例，由所有使用该插件的任务共享。
//!
//! ```rust
//! use async_trait::async_trait;
//! use scheduler_core::models::{ExecutionContext, JobExecutionResult};
//! use scheduler_core::traits::{JobPlugin, PluginConfiguration, PluginError};
//! use std::collections::HashMap;
//!
//! struct EchoPlugin;
//!
//! #[async_trait]
//! impl JobPlugin for EchoPlugin {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn version(&self) -> &str {
//!         "1.0.0"
//!     }
//!
//!     async fn initialize(&self, _config: PluginConfiguration) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//!
//!     async fn execute(&self, context: &ExecutionContext) -> Result<JobExecutionResult, PluginError> {
//!         context.log_info("echo");
//!         Ok(JobExecutionResult::success("echoed", HashMap::new()))
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{ErrorKind, ExecutionContext, JobExecutionResult};

/// 插件执行过程中可能返回的错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid data: {0}")]
    DataValidation(String),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::Configuration(_) => ErrorKind::ConfigurationError,
            PluginError::Execution(_) => ErrorKind::PluginError,
            PluginError::Timeout(_) => ErrorKind::Timeout,
            PluginError::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            PluginError::Network(_) => ErrorKind::NetworkError,
            PluginError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            PluginError::DataValidation(_) => ErrorKind::DataValidationError,
        }
    }

    /// 配置、权限和数据错误重试也不会成功
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            PluginError::Configuration(_)
                | PluginError::PermissionDenied(_)
                | PluginError::DataValidation(_)
        )
    }

    /// 转换为带分类的失败结果，供插件自行上报
    pub fn into_failure(self, duration: Duration) -> JobExecutionResult {
        JobExecutionResult::failure(self.to_string(), self.kind())
            .with_should_retry(self.is_transient())
            .with_duration(duration)
    }
}

/// 插件初始化参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfiguration {
    values: HashMap<String, Value>,
}

impl PluginConfiguration {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    /// 数值或数字字符串
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn require(&self, key: &str) -> Result<&Value, PluginError> {
        self.values
            .get(key)
            .ok_or_else(|| PluginError::Configuration(format!("missing required parameter '{key}'")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.values.clone()
    }
}

impl From<HashMap<String, Value>> for PluginConfiguration {
    fn from(values: HashMap<String, Value>) -> Self {
        Self::new(values)
    }
}

/// 任务插件接口
///
/// `initialize` 对每个实例只会被调用一次，`execute` 可能被并发调用，
/// 除非 [`JobPlugin::supports_parallel_execution`] 返回 `false`。
#[async_trait]
pub trait JobPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn supports_parallel_execution(&self) -> bool {
        true
    }

    async fn initialize(&self, config: PluginConfiguration) -> Result<(), PluginError>;

    async fn execute(&self, context: &ExecutionContext) -> Result<JobExecutionResult, PluginError>;

    async fn shutdown(&self) {}

    async fn is_healthy(&self) -> bool {
        true
    }
}
