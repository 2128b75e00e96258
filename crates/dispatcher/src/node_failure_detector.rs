use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use scheduler_core::config::ClusterConfig;
use scheduler_core::models::{ClusterNode, NodeStatus};

/// 节点存活判定策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// 心跳发送间隔
    pub heartbeat_interval: Duration,
    /// 超过该时长未收到心跳即视为过期
    pub heartbeat_timeout: Duration,
    /// 过期后再错过多少个心跳周期标记为 Suspected
    pub suspect_after_missed_beats: u32,
    /// 过期后再错过多少个心跳周期标记为 Down
    pub down_after_missed_beats: u32,
    /// 标记为 Down 之后多久从成员表中移除
    pub purge_down_after: Duration,
}

impl LivenessPolicy {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            suspect_after_missed_beats: config.suspect_after_missed_beats,
            down_after_missed_beats: config.down_after_missed_beats,
            purge_down_after: config.purge_down_after(),
        }
    }

    /// 根据距上次心跳的时长计算状态
    pub fn status_for(&self, since_last_heartbeat: Duration) -> NodeStatus {
        if since_last_heartbeat <= self.heartbeat_timeout {
            return NodeStatus::Active;
        }
        let missed = self.missed_windows(since_last_heartbeat);
        if missed >= u128::from(self.down_after_missed_beats) {
            NodeStatus::Down
        } else if missed >= u128::from(self.suspect_after_missed_beats) {
            NodeStatus::Suspected
        } else {
            NodeStatus::Active
        }
    }

    /// 从最后一次心跳到被标记为 Down 的时长
    pub fn down_after(&self) -> Duration {
        self.heartbeat_timeout + self.heartbeat_interval * self.down_after_missed_beats
    }

    fn missed_windows(&self, since_last_heartbeat: Duration) -> u128 {
        let overdue = since_last_heartbeat.saturating_sub(self.heartbeat_timeout);
        overdue.as_millis() / self.heartbeat_interval.as_millis().max(1)
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

/// 节点状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

/// 节点失效检测器
///
/// 只依据本地记录的最后心跳时间判断远程节点状态，不做任何网络探测。
#[derive(Debug, Clone, Default)]
pub struct NodeFailureDetector {
    policy: LivenessPolicy,
}

impl NodeFailureDetector {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// 检查节点并更新其状态，状态变化时返回变化记录
    pub fn evaluate(&self, node: &ClusterNode, now: DateTime<Utc>) -> Option<StatusTransition> {
        let current = node.status();
        // 主动下线的节点不参与检测
        if current == NodeStatus::ShuttingDown {
            return None;
        }

        let next = self.policy.status_for(node.time_since_last_heartbeat(now));
        if next == current {
            return None;
        }

        debug!(
            node.id = node.node_id(),
            from = %current,
            to = %next,
            "节点状态变化"
        );
        node.set_status(next);
        Some(StatusTransition {
            node_id: node.node_id().to_string(),
            from: current,
            to: next,
        })
    }

    /// 节点是否已标记为 Down 足够久，可以从成员表移除
    pub fn should_purge(&self, node: &ClusterNode, now: DateTime<Utc>) -> bool {
        if !matches!(node.status(), NodeStatus::Down | NodeStatus::ShuttingDown) {
            return false;
        }
        node.time_since_last_heartbeat(now) >= self.policy.down_after() + self.policy.purge_down_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn secs(s: i64) -> chrono::Duration {
        chrono::Duration::seconds(s)
    }

    #[test]
    fn test_default_policy_transitions() {
        // 间隔5秒，超时15秒，过期即 Suspected，再错过2个周期 Down
        let detector = NodeFailureDetector::default();
        let node = ClusterNode::new("node-b", "localhost", 5701, start());

        assert_eq!(detector.evaluate(&node, start() + secs(15)), None);

        let transition = detector.evaluate(&node, start() + secs(16)).unwrap();
        assert_eq!(transition.from, NodeStatus::Active);
        assert_eq!(transition.to, NodeStatus::Suspected);

        assert_eq!(detector.evaluate(&node, start() + secs(24)), None);
        let transition = detector.evaluate(&node, start() + secs(25)).unwrap();
        assert_eq!(transition.to, NodeStatus::Down);
        assert!(!detector.should_purge(&node, start() + secs(60)));
        assert!(detector.should_purge(&node, start() + secs(85)));
    }

    #[test]
    fn test_heartbeat_revives_node() {
        let detector = NodeFailureDetector::default();
        let node = ClusterNode::new("node-b", "localhost", 5701, start());
        detector.evaluate(&node, start() + secs(40));
        assert_eq!(node.status(), NodeStatus::Down);

        node.record_heartbeat(start() + secs(41));
        let transition = detector.evaluate(&node, start() + secs(42)).unwrap();
        assert_eq!(transition.to, NodeStatus::Active);
    }

    #[test]
    fn test_shutting_down_is_left_alone() {
        let detector = NodeFailureDetector::default();
        let node = ClusterNode::new("node-b", "localhost", 5701, start());
        node.set_status(NodeStatus::ShuttingDown);
        assert_eq!(detector.evaluate(&node, start() + secs(100)), None);
        assert!(detector.should_purge(&node, start() + secs(100)));
    }
}
