use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

pub const DEFAULT_CLUSTER_PORT: u16 = 5701;

/// Liveness of a cluster member as seen by the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum NodeStatus {
    Active = 0,
    Suspected = 1,
    Down = 2,
    ShuttingDown = 3,
}

impl NodeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeStatus::Active,
            1 => NodeStatus::Suspected,
            2 => NodeStatus::Down,
            _ => NodeStatus::ShuttingDown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Suspected => "suspected",
            NodeStatus::Down => "down",
            NodeStatus::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load figures a node reports about itself with every heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeLoad {
    pub cpu_load: i32,
    pub memory_used_mb: i64,
    pub active_jobs: i64,
}

/// Generates a node id of the form `host-<epoch millis>-<random>`.
pub fn generate_node_id(host: &str) -> String {
    let suffix: u32 = rand::rng().random_range(0..10_000);
    format!("{}-{}-{}", host, Utc::now().timestamp_millis(), suffix)
}

/// A member of the cluster.
///
/// Identity (`node_id`, `host`, `port`, `startup_time`) is fixed; liveness and
/// load are atomics so the coordinator and the heartbeat task can update them
/// concurrently. Equality and hashing use the node id only.
#[derive(Debug)]
pub struct ClusterNode {
    node_id: String,
    host: String,
    port: u16,
    startup_time: DateTime<Utc>,
    last_heartbeat_ms: AtomicI64,
    status: AtomicU8,
    cpu_load: AtomicU8,
    memory_used_mb: AtomicU64,
    active_jobs: AtomicU32,
}

impl ClusterNode {
    pub fn new(
        node_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            startup_time: now,
            last_heartbeat_ms: AtomicI64::new(now.timestamp_millis()),
            status: AtomicU8::new(NodeStatus::Active as u8),
            cpu_load: AtomicU8::new(0),
            memory_used_mb: AtomicU64::new(0),
            active_jobs: AtomicU32::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn startup_time(&self) -> DateTime<Utc> {
        self.startup_time
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_heartbeat_ms.load(Ordering::Acquire))
    }

    pub fn record_heartbeat(&self, at: DateTime<Utc>) {
        self.last_heartbeat_ms
            .store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.status() == NodeStatus::Active
    }

    pub fn cpu_load(&self) -> u8 {
        self.cpu_load.load(Ordering::Relaxed)
    }

    /// Clamped to `0..=100`.
    pub fn set_cpu_load(&self, load: i32) {
        self.cpu_load
            .store(load.clamp(0, 100) as u8, Ordering::Relaxed);
    }

    pub fn memory_used_mb(&self) -> u64 {
        self.memory_used_mb.load(Ordering::Relaxed)
    }

    pub fn set_memory_used_mb(&self, memory_mb: i64) {
        self.memory_used_mb
            .store(memory_mb.max(0) as u64, Ordering::Relaxed);
    }

    pub fn active_jobs(&self) -> u32 {
        self.active_jobs.load(Ordering::Relaxed)
    }

    pub fn set_active_jobs(&self, jobs: i64) {
        self.active_jobs
            .store(jobs.clamp(0, u32::MAX as i64) as u32, Ordering::Relaxed);
    }

    pub fn increment_active_jobs(&self) {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Never goes below zero.
    pub fn decrement_active_jobs(&self) {
        let _ = self
            .active_jobs
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |jobs| {
                Some(jobs.saturating_sub(1))
            });
    }

    pub fn apply_load(&self, load: NodeLoad) {
        self.set_cpu_load(load.cpu_load);
        self.set_memory_used_mb(load.memory_used_mb);
        self.set_active_jobs(load.active_jobs);
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.startup_time).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn time_since_last_heartbeat(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_heartbeat_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.time_since_last_heartbeat(now) > timeout
    }

    pub fn load_score(&self) -> f64 {
        compute_load_score(self.cpu_load(), self.active_jobs(), self.memory_used_mb())
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
            startup_time: self.startup_time,
            last_heartbeat: self.last_heartbeat(),
            status: self.status(),
            cpu_load: self.cpu_load(),
            memory_used_mb: self.memory_used_mb(),
            active_jobs: self.active_jobs(),
        }
    }
}

impl PartialEq for ClusterNode {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for ClusterNode {}

impl Hash for ClusterNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClusterNode{{id='{}', host='{}:{}', status={}, cpu={}%, jobs={}}}",
            self.node_id,
            self.host,
            self.port,
            self.status(),
            self.cpu_load(),
            self.active_jobs()
        )
    }
}

fn compute_load_score(cpu_load: u8, active_jobs: u32, memory_used_mb: u64) -> f64 {
    f64::from(cpu_load) * 0.5
        + f64::from(active_jobs) * 0.3
        + (memory_used_mb as f64 / 1024.0) * 0.2
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Read-only copy of a [`ClusterNode`] handed out to callers and listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub startup_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: NodeStatus,
    pub cpu_load: u8,
    pub memory_used_mb: u64,
    pub active_jobs: u32,
}

impl NodeSnapshot {
    pub fn load_score(&self) -> f64 {
        compute_load_score(self.cpu_load, self.active_jobs, self.memory_used_mb)
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Quorum-aware summary of the cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    leader_id: Option<String>,
    total_nodes: usize,
    active_nodes: usize,
    healthy: bool,
}

impl ClusterState {
    pub fn new(
        leader_id: Option<String>,
        total_nodes: usize,
        active_nodes: usize,
        healthy: bool,
    ) -> SchedulerResult<Self> {
        if active_nodes > total_nodes {
            return Err(SchedulerError::Internal(format!(
                "active nodes ({active_nodes}) cannot exceed total nodes ({total_nodes})"
            )));
        }
        Ok(Self {
            leader_id,
            total_nodes,
            active_nodes,
            healthy,
        })
    }

    /// State reported before any membership is known.
    pub fn empty() -> Self {
        Self {
            leader_id: None,
            total_nodes: 0,
            active_nodes: 0,
            healthy: false,
        }
    }

    /// State of a scheduler running without clustering.
    pub fn single_node(node_id: impl Into<String>) -> Self {
        Self {
            leader_id: Some(node_id.into()),
            total_nodes: 1,
            active_nodes: 1,
            healthy: true,
        }
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    pub fn active_nodes(&self) -> usize {
        self.active_nodes
    }

    pub fn inactive_nodes(&self) -> usize {
        self.total_nodes - self.active_nodes
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Strict majority of the known members is active.
    pub fn has_quorum(&self) -> bool {
        self.active_nodes > self.total_nodes / 2
    }
}

/// Strategy used by the leader to pick target nodes for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategyKind {
    #[default]
    RoundRobin,
    LoadBased,
    Affinity,
    Broadcast,
}

impl DistributionStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStrategyKind::RoundRobin => "round_robin",
            DistributionStrategyKind::LoadBased => "load_based",
            DistributionStrategyKind::Affinity => "affinity",
            DistributionStrategyKind::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for DistributionStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionStrategyKind {
    type Err = SchedulerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(DistributionStrategyKind::RoundRobin),
            "load_based" => Ok(DistributionStrategyKind::LoadBased),
            "affinity" => Ok(DistributionStrategyKind::Affinity),
            "broadcast" => Ok(DistributionStrategyKind::Broadcast),
            other => Err(SchedulerError::Configuration(format!(
                "unknown distribution strategy: {other}"
            ))),
        }
    }
}

/// Messages exchanged between coordinators through a `ClusterTransport`.
///
/// Events carry identifiers and epoch-millisecond timestamps only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    NodeJoined {
        node_id: String,
        host: String,
        port: u16,
        timestamp_ms: i64,
    },
    NodeLeft {
        node_id: String,
        timestamp_ms: i64,
    },
    LeaderElected {
        leader_id: String,
        timestamp_ms: i64,
    },
    JobDistributed {
        job_id: String,
        target_node: String,
        distributed_by: String,
        timestamp_ms: i64,
    },
    Heartbeat {
        node_id: String,
        timestamp_ms: i64,
        cpu_load: i32,
        memory_used_mb: i64,
        active_jobs: i64,
    },
}

impl ClusterEvent {
    /// Node that published the event.
    pub fn source_node(&self) -> &str {
        match self {
            ClusterEvent::NodeJoined { node_id, .. }
            | ClusterEvent::NodeLeft { node_id, .. }
            | ClusterEvent::Heartbeat { node_id, .. } => node_id,
            ClusterEvent::LeaderElected { leader_id, .. } => leader_id,
            ClusterEvent::JobDistributed { distributed_by, .. } => distributed_by,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            ClusterEvent::NodeJoined { timestamp_ms, .. }
            | ClusterEvent::NodeLeft { timestamp_ms, .. }
            | ClusterEvent::LeaderElected { timestamp_ms, .. }
            | ClusterEvent::JobDistributed { timestamp_ms, .. }
            | ClusterEvent::Heartbeat { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ClusterEvent::NodeJoined { .. } => "node_joined",
            ClusterEvent::NodeLeft { .. } => "node_left",
            ClusterEvent::LeaderElected { .. } => "leader_elected",
            ClusterEvent::JobDistributed { .. } => "job_distributed",
            ClusterEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn to_json(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> SchedulerResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_load_fields_are_clamped() {
        let node = ClusterNode::new("node-a", "localhost", DEFAULT_CLUSTER_PORT, now());
        node.set_cpu_load(250);
        node.set_memory_used_mb(-5);
        node.set_active_jobs(-1);

        assert_eq!(node.cpu_load(), 100);
        assert_eq!(node.memory_used_mb(), 0);
        assert_eq!(node.active_jobs(), 0);

        node.decrement_active_jobs();
        assert_eq!(node.active_jobs(), 0);
        node.increment_active_jobs();
        node.increment_active_jobs();
        node.decrement_active_jobs();
        assert_eq!(node.active_jobs(), 1);
    }

    #[test]
    fn test_load_score_weights() {
        let node = ClusterNode::new("node-a", "localhost", DEFAULT_CLUSTER_PORT, now());
        node.apply_load(NodeLoad {
            cpu_load: 40,
            memory_used_mb: 2048,
            active_jobs: 10,
        });
        let expected = 40.0 * 0.5 + 10.0 * 0.3 + 2.0 * 0.2;
        assert!((node.load_score() - expected).abs() < f64::EPSILON);
        assert!((node.snapshot().load_score() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_heartbeat_staleness() {
        let start = now();
        let node = ClusterNode::new("node-a", "localhost", DEFAULT_CLUSTER_PORT, start);
        let timeout = Duration::from_secs(15);

        assert!(!node.is_heartbeat_stale(timeout, start + chrono::Duration::seconds(15)));
        assert!(node.is_heartbeat_stale(timeout, start + chrono::Duration::seconds(16)));

        node.record_heartbeat(start + chrono::Duration::seconds(16));
        assert!(!node.is_heartbeat_stale(timeout, start + chrono::Duration::seconds(20)));
        assert_eq!(node.uptime(start + chrono::Duration::seconds(20)), Duration::from_secs(20));
    }

    #[test]
    fn test_nodes_compare_by_id() {
        let a = ClusterNode::new("node-a", "host-1", 1, now());
        let b = ClusterNode::new("node-a", "host-2", 2, now());
        b.set_status(NodeStatus::Down);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generated_node_id_contains_host() {
        let id = generate_node_id("worker-host");
        assert!(id.starts_with("worker-host-"));
        assert_eq!(id.split('-').count(), 4);
    }

    #[test]
    fn test_cluster_state_quorum() {
        let state = ClusterState::new(Some("a".into()), 4, 2, true).unwrap();
        assert!(!state.has_quorum());
        assert_eq!(state.inactive_nodes(), 2);

        let state = ClusterState::new(Some("a".into()), 4, 3, true).unwrap();
        assert!(state.has_quorum());

        assert!(ClusterState::new(None, 2, 3, false).is_err());
    }

    #[test]
    fn test_single_node_and_empty_state() {
        let single = ClusterState::single_node("node-a");
        assert_eq!(single.leader_id(), Some("node-a"));
        assert!(single.has_quorum());
        assert!(single.is_healthy());

        let empty = ClusterState::empty();
        assert_eq!(empty.leader_id(), None);
        assert!(!empty.has_quorum());
        assert!(!empty.is_healthy());
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!(
            "load-based".parse::<DistributionStrategyKind>().unwrap(),
            DistributionStrategyKind::LoadBased
        );
        assert_eq!(
            "ROUND_ROBIN".parse::<DistributionStrategyKind>().unwrap(),
            DistributionStrategyKind::RoundRobin
        );
        assert!("random".parse::<DistributionStrategyKind>().is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let event = ClusterEvent::JobDistributed {
            job_id: "job-1".into(),
            target_node: "node-b".into(),
            distributed_by: "node-a".into(),
            timestamp_ms: 1_700_000_000_000,
        };
        let payload = event.to_json().unwrap();
        assert!(payload.contains("\"event\":\"job_distributed\""));
        assert_eq!(ClusterEvent::from_json(&payload).unwrap(), event);
        assert_eq!(event.source_node(), "node-a");
        assert!(ClusterEvent::from_json("{\"event\":\"unknown\"}").is_err());
    }
}
