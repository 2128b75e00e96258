//! 配置管理
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//!
//! 1. 内置默认值（各配置结构的 `Default`）
//! 2. TOML 配置文件（显式路径，或依次查找 `config/scheduler.toml`、`scheduler.toml`、
//!    `/etc/scheduler/config.toml`）
//! 3. `SCHEDULER_` 前缀的环境变量，嵌套字段用 `__` 分隔，
//!    例如 `SCHEDULER_CLUSTER__HEARTBEAT_INTERVAL_MS=1000`

mod models;

pub use models::*;

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/scheduler.toml",
    "scheduler.toml",
    "/etc/scheduler/config.toml",
];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub cluster: ClusterConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = Config::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(SchedulerError::Configuration(format!(
                        "配置文件不存在: {path}"
                    )));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> SchedulerResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| SchedulerError::Configuration(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> SchedulerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SchedulerError::Serialization(format!("序列化配置为TOML失败: {e}")))
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        self.scheduler.validate()?;
        self.cluster.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}
