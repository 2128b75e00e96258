use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use scheduler_core::models::{DistributionStrategyKind, NodeSnapshot};

/// Picks the node(s) that should own a job.
///
/// Implementations only ever return ids of `Active` nodes from `nodes`; an
/// empty result means no node is available.
pub trait DistributionStrategy: Send + Sync {
    fn select_nodes(&self, job_id: &str, nodes: &[NodeSnapshot]) -> Vec<String>;

    fn kind(&self) -> DistributionStrategyKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }
}

pub fn create_strategy(kind: DistributionStrategyKind) -> Arc<dyn DistributionStrategy> {
    match kind {
        DistributionStrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
        DistributionStrategyKind::LoadBased => Arc::new(LoadBasedStrategy::new()),
        DistributionStrategyKind::Affinity => Arc::new(AffinityStrategy::new()),
        DistributionStrategyKind::Broadcast => Arc::new(BroadcastStrategy::new()),
    }
}

/// Active nodes ordered by id, so every strategy sees a stable ordering.
fn active_sorted(nodes: &[NodeSnapshot]) -> Vec<&NodeSnapshot> {
    let mut active: Vec<&NodeSnapshot> = nodes.iter().filter(|n| n.is_active()).collect();
    active.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    active
}

/// Cycles through the active nodes with a separate counter per job.
#[derive(Default)]
pub struct RoundRobinStrategy {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionStrategy for RoundRobinStrategy {
    fn select_nodes(&self, job_id: &str, nodes: &[NodeSnapshot]) -> Vec<String> {
        let active = active_sorted(nodes);
        if active.is_empty() {
            debug!(job.id = job_id, "no active node for round-robin");
            return Vec::new();
        }

        let index = {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let counter = counters.entry(job_id.to_string()).or_insert(0);
            let index = *counter % active.len();
            *counter = counter.wrapping_add(1);
            index
        };

        debug!(
            job.id = job_id,
            node.id = %active[index].node_id,
            index,
            candidates = active.len(),
            "round-robin selected node"
        );
        vec![active[index].node_id.clone()]
    }

    fn kind(&self) -> DistributionStrategyKind {
        DistributionStrategyKind::RoundRobin
    }
}

/// Lowest load score wins; ties go to the smaller node id.
#[derive(Debug, Default)]
pub struct LoadBasedStrategy;

impl LoadBasedStrategy {
    pub fn new() -> Self {
        Self
    }

    fn least_loaded(nodes: &[NodeSnapshot]) -> Option<&NodeSnapshot> {
        active_sorted(nodes)
            .into_iter()
            .min_by(|a, b| a.load_score().total_cmp(&b.load_score()))
    }
}

impl DistributionStrategy for LoadBasedStrategy {
    fn select_nodes(&self, job_id: &str, nodes: &[NodeSnapshot]) -> Vec<String> {
        match Self::least_loaded(nodes) {
            Some(node) => {
                debug!(
                    job.id = job_id,
                    node.id = %node.node_id,
                    load_score = node.load_score(),
                    "load-based selected node"
                );
                vec![node.node_id.clone()]
            }
            None => Vec::new(),
        }
    }

    fn kind(&self) -> DistributionStrategyKind {
        DistributionStrategyKind::LoadBased
    }
}

/// Keeps a job on the same node while that node stays active.
///
/// The first placement hashes the job id over the active nodes. When the
/// pinned node is no longer active the job moves to the least loaded node
/// and is pinned there.
#[derive(Default)]
pub struct AffinityStrategy {
    pins: Mutex<HashMap<String, String>>,
}

impl AffinityStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn fnv1a(text: &str) -> u64 {
        text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
    }
}

impl DistributionStrategy for AffinityStrategy {
    fn select_nodes(&self, job_id: &str, nodes: &[NodeSnapshot]) -> Vec<String> {
        let active = active_sorted(nodes);
        if active.is_empty() {
            return Vec::new();
        }

        let mut pins = self.pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let target = match pins.get(job_id) {
            Some(pinned) if active.iter().any(|n| &n.node_id == pinned) => pinned.clone(),
            Some(pinned) => {
                let fallback = LoadBasedStrategy::least_loaded(nodes)
                    .map(|n| n.node_id.clone())
                    .unwrap_or_else(|| active[0].node_id.clone());
                debug!(
                    job.id = job_id,
                    from = %pinned,
                    to = %fallback,
                    "affinity node inactive, falling back to load-based"
                );
                fallback
            }
            None => {
                let index = (Self::fnv1a(job_id) % active.len() as u64) as usize;
                active[index].node_id.clone()
            }
        };
        pins.insert(job_id.to_string(), target.clone());
        vec![target]
    }

    fn kind(&self) -> DistributionStrategyKind {
        DistributionStrategyKind::Affinity
    }
}

/// Every active node gets the job.
#[derive(Debug, Default)]
pub struct BroadcastStrategy;

impl BroadcastStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl DistributionStrategy for BroadcastStrategy {
    fn select_nodes(&self, _job_id: &str, nodes: &[NodeSnapshot]) -> Vec<String> {
        active_sorted(nodes)
            .into_iter()
            .map(|n| n.node_id.clone())
            .collect()
    }

    fn kind(&self) -> DistributionStrategyKind {
        DistributionStrategyKind::Broadcast
    }
}
