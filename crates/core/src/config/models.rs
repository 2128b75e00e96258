use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::{DistributionStrategyKind, DEFAULT_CLUSTER_PORT};

/// Orchestrator and executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub execution_pool_size: usize,
    pub shutdown_grace_period_seconds: u64,
    pub cron_search_horizon_days: u32,
    pub allow_overlapping_executions: bool,
    pub persistence_enabled: bool,
    pub execution_history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_pool_size: 10,
            shutdown_grace_period_seconds: 30,
            cron_search_horizon_days: 1830, // 约5年
            allow_overlapping_executions: true,
            persistence_enabled: true,
            execution_history_limit: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.execution_pool_size == 0 {
            return Err(SchedulerError::Configuration(
                "scheduler.execution_pool_size must be greater than 0".to_string(),
            ));
        }
        if self.cron_search_horizon_days == 0 {
            return Err(SchedulerError::Configuration(
                "scheduler.cron_search_horizon_days must be greater than 0".to_string(),
            ));
        }
        if self.execution_history_limit == 0 {
            return Err(SchedulerError::Configuration(
                "scheduler.execution_history_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Membership, heartbeat and liveness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Generated from the host name when absent.
    pub node_id: Option<String>,
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub suspect_after_missed_beats: u32,
    pub down_after_missed_beats: u32,
    pub purge_down_after_ms: u64,
    pub distribution_strategy: DistributionStrategyKind,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: None,
            host: "localhost".to_string(),
            port: DEFAULT_CLUSTER_PORT,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            suspect_after_missed_beats: 0, // 超时即进入可疑状态
            down_after_missed_beats: 2,
            purge_down_after_ms: 60_000,
            distribution_strategy: DistributionStrategyKind::RoundRobin,
        }
    }
}

impl ClusterConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn purge_down_after(&self) -> Duration {
        Duration::from_millis(self.purge_down_after_ms)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(SchedulerError::Configuration(
                "cluster.heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(SchedulerError::Configuration(
                "cluster.heartbeat_timeout_ms must be greater than cluster.heartbeat_interval_ms"
                    .to_string(),
            ));
        }
        if self.down_after_missed_beats <= self.suspect_after_missed_beats {
            return Err(SchedulerError::Configuration(
                "cluster.down_after_missed_beats must be greater than cluster.suspect_after_missed_beats"
                    .to_string(),
            ));
        }
        if let Some(node_id) = &self.node_id {
            if node_id.trim().is_empty() {
                return Err(SchedulerError::Configuration(
                    "cluster.node_id must not be blank".to_string(),
                ));
            }
        }
        if self.host.trim().is_empty() {
            return Err(SchedulerError::Configuration(
                "cluster.host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

/// Logging and metrics settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.log_level.trim().is_empty() {
            return Err(SchedulerError::Configuration(
                "observability.log_level must not be empty".to_string(),
            ));
        }
        if self.metrics_enabled
            && self
                .metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(SchedulerError::Configuration(format!(
                "observability.metrics_bind_address is not a socket address: {}",
                self.metrics_bind_address
            )));
        }
        Ok(())
    }
}
