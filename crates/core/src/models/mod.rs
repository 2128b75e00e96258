//! # 数据模型
//!
//! 调度系统的核心数据结构：任务定义、执行结果、执行上下文以及集群成员视图。
//!
//! - [`JobDefinition`] 不可变的任务定义，只能通过构建器整体替换
//! - [`JobExecutionResult`] 一次执行的四种结局（成功、失败、部分成功、取消）
//! - [`ExecutionContext`] 单次执行期间传递给插件的上下文
//! - [`ClusterNode`] / [`ClusterState`] / [`ClusterEvent`] 集群视图与传输事件
//!
//! 所有时间字段使用 `DateTime<Utc>`，时长在序列化时统一为毫秒整数。

pub mod cluster;
pub mod context;
pub mod job;
pub mod result;

pub use cluster::*;
pub use context::*;
pub use job::*;
pub use result::*;

/// `std::time::Duration` 以毫秒整数形式序列化
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
