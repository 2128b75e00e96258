use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::models::{ExecutionContext, JobExecutionResult};
use scheduler_core::traits::{JobPlugin, PluginConfiguration, PluginError};
use scheduler_core::SchedulerResult;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::info;

use crate::plugin_registry::{warn_if_registered, PluginRegistry};

pub const SIMPLE_LOGGER_PLUGIN: &str = "simple-logger";
pub const FILE_PROCESSOR_PLUGIN: &str = "file-processor";
pub const SHELL_PLUGIN: &str = "shell";

/// Registers the bundled plugins. Names that are already taken are kept.
pub async fn register_builtin_plugins(registry: &PluginRegistry) -> SchedulerResult<()> {
    warn_if_registered(
        registry
            .register(SIMPLE_LOGGER_PLUGIN, || {
                Arc::new(SimpleLoggerPlugin::new()) as Arc<dyn JobPlugin>
            })
            .await,
    )?;
    warn_if_registered(
        registry
            .register(FILE_PROCESSOR_PLUGIN, || {
                Arc::new(FileProcessorPlugin::new()) as Arc<dyn JobPlugin>
            })
            .await,
    )?;
    warn_if_registered(
        registry
            .register(SHELL_PLUGIN, || Arc::new(ShellPlugin::new()) as Arc<dyn JobPlugin>)
            .await,
    )?;
    Ok(())
}

/// Logs a message after an optional delay.
///
/// Parameters: `message` (string), `delay_ms` (default 1000).
pub struct SimpleLoggerPlugin {
    config: OnceLock<PluginConfiguration>,
}

impl SimpleLoggerPlugin {
    const DEFAULT_MESSAGE: &'static str = "Hello from simple-logger";
    const DEFAULT_DELAY_MS: i64 = 1000;

    pub fn new() -> Self {
        Self {
            config: OnceLock::new(),
        }
    }
}

impl Default for SimpleLoggerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobPlugin for SimpleLoggerPlugin {
    fn name(&self) -> &str {
        SIMPLE_LOGGER_PLUGIN
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Logs a configurable message"
    }

    async fn initialize(&self, config: PluginConfiguration) -> Result<(), PluginError> {
        self.config
            .set(config)
            .map_err(|_| PluginError::Configuration("plugin already initialized".to_string()))
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<JobExecutionResult, PluginError> {
        let job_config = PluginConfiguration::new(context.parameters().clone());
        let fallback = self
            .config
            .get()
            .and_then(|c| c.get_str("message"))
            .unwrap_or(Self::DEFAULT_MESSAGE);
        let message = job_config.get_str_or("message", fallback).to_string();
        let delay_ms = job_config
            .get_i64_or("delay_ms", Self::DEFAULT_DELAY_MS)
            .max(0) as u64;

        context.update_progress(25, "Starting simple-logger");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            _ = context.cancelled() => {
                return Ok(JobExecutionResult::cancelled("cancelled while waiting", "executor")
                    .with_progress(context.progress()));
            }
        }

        context.log_info(&message);
        context.update_progress(100, "simple-logger finished");

        let mut output = HashMap::new();
        output.insert("message".to_string(), json!(message));
        output.insert("message_length".to_string(), json!(message.chars().count()));
        output.insert("logged_at".to_string(), json!(Utc::now().to_rfc3339()));
        Ok(JobExecutionResult::success("Message logged", output))
    }
}

/// Reads a text file and reports line, word and byte counts.
///
/// Parameters: `path` (required).
pub struct FileProcessorPlugin;

impl FileProcessorPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileProcessorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobPlugin for FileProcessorPlugin {
    fn name(&self) -> &str {
        FILE_PROCESSOR_PLUGIN
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Counts lines, words and bytes of a file"
    }

    async fn initialize(&self, _config: PluginConfiguration) -> Result<(), PluginError> {
        Ok(())
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<JobExecutionResult, PluginError> {
        let started = Instant::now();
        let config = PluginConfiguration::new(context.parameters().clone());

        let Some(path) = config.get_str("path").map(str::to_string) else {
            return Ok(PluginError::Configuration("missing required parameter 'path'".into())
                .into_failure(started.elapsed()));
        };

        context.update_progress(10, "reading file");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) => {
                return Ok(PluginError::ResourceUnavailable(format!("cannot read {path}: {err}"))
                    .into_failure(started.elapsed()));
            }
        };

        let lines = content.lines().count();
        let words = content.split_whitespace().count();
        context.add_metric("lines", lines);
        context.update_progress(100, "file processed");

        let mut output = HashMap::new();
        output.insert("path".to_string(), json!(path));
        output.insert("lines".to_string(), json!(lines));
        output.insert("words".to_string(), json!(words));
        output.insert("bytes".to_string(), json!(content.len()));
        Ok(JobExecutionResult::success("File processed", output).with_duration(started.elapsed()))
    }
}

/// Runs an external command.
///
/// Parameters: `command` (required), `args` (array of strings), `working_dir`.
/// A non-zero exit code is a retryable failure. The child process is killed
/// when the execution is cancelled or times out.
pub struct ShellPlugin;

impl ShellPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobPlugin for ShellPlugin {
    fn name(&self) -> &str {
        SHELL_PLUGIN
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Runs a shell command"
    }

    async fn initialize(&self, _config: PluginConfiguration) -> Result<(), PluginError> {
        Ok(())
    }

    async fn execute(&self, context: &ExecutionContext) -> Result<JobExecutionResult, PluginError> {
        let started = Instant::now();
        let config = PluginConfiguration::new(context.parameters().clone());
        let command = config
            .require("command")?
            .as_str()
            .ok_or_else(|| PluginError::DataValidation("'command' must be a string".into()))?
            .to_string();
        let args: Vec<String> = config
            .get("args")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        info!(job.id = context.job_id(), command = %command, args = ?args, "running shell command");

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = config.get_str("working_dir") {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| PluginError::ResourceUnavailable(format!("failed to start {command}: {e}")))?;

        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| PluginError::Execution(format!("failed to wait for {command}: {e}")))?,
            _ = context.cancelled() => {
                return Ok(JobExecutionResult::cancelled("command cancelled", "executor")
                    .with_duration(started.elapsed()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let exit_code = output.status.code();

        if output.status.success() {
            let mut result = HashMap::new();
            result.insert("exit_code".to_string(), json!(exit_code));
            result.insert("stdout".to_string(), json!(stdout));
            Ok(JobExecutionResult::success("Command completed", result)
                .with_duration(started.elapsed()))
        } else {
            Ok(PluginError::Execution(format!(
                "command exited with {exit_code:?}: {stderr}"
            ))
            .into_failure(started.elapsed()))
        }
    }
}
