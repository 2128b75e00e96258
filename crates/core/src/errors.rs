use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的任务定义: {0}")]
    InvalidJobDefinition(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("CRON表达式在搜索窗口内没有可触发的时间: {expr}")]
    CronSearchExhausted { expr: String },

    #[error("未知的插件: {0}")]
    UnknownPlugin(String),

    #[error("插件已注册: {0}")]
    PluginAlreadyRegistered(String),

    #[error("插件已初始化: {0}")]
    PluginAlreadyInitialized(String),

    #[error("插件初始化失败: {name} - {message}")]
    PluginInitialization { name: String, message: String },

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("调度器已在运行")]
    AlreadyRunning,

    #[error("集群通信错误: {0}")]
    Transport(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
