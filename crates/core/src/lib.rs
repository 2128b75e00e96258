pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::{AppConfig, ClusterConfig, LogFormat, ObservabilityConfig, SchedulerConfig};
pub use errors::*;
pub use models::{
    ClusterEvent, ClusterNode, ClusterState, DistributionStrategyKind, ErrorKind,
    ExecutionContext, JobDefinition, JobDefinitionBuilder, JobExecutionResult, NodeLoad,
    NodeSnapshot, NodeStatus, RetryPolicy,
};
pub use traits::{
    Clock, ClusterListener, ClusterTransport, ExecutionRecord, JobExecutionStore, JobPlugin,
    JobRepository, ListenerRegistry, MonotonicClock, PluginConfiguration, PluginError,
    SchedulerListener, SystemClock,
};
