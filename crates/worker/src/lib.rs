pub mod job_executor;
pub mod plugin_registry;
pub mod plugins;

pub use job_executor::{ExecutionRequest, JobExecutor};
pub use plugin_registry::{PluginFactory, PluginInstance, PluginRegistry};
pub use plugins::{
    register_builtin_plugins, FileProcessorPlugin, ShellPlugin, SimpleLoggerPlugin,
    FILE_PROCESSOR_PLUGIN, SHELL_PLUGIN, SIMPLE_LOGGER_PLUGIN,
};
