use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use scheduler_core::models::{DistributionStrategyKind, NodeSnapshot};

use crate::strategies::{create_strategy, DistributionStrategy};

/// Where a job was placed and by which strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAssignment {
    pub job_id: String,
    pub target_nodes: Vec<String>,
    pub strategy: DistributionStrategyKind,
}

impl JobAssignment {
    pub fn is_assigned_to(&self, node_id: &str) -> bool {
        self.target_nodes.iter().any(|n| n == node_id)
    }
}

/// Placement bookkeeping for the leader.
///
/// Every strategy keeps its own state (round-robin counters, affinity pins),
/// so one instance of each is held for the lifetime of the distributor.
pub struct JobDistributor {
    default_kind: DistributionStrategyKind,
    strategies: HashMap<DistributionStrategyKind, Arc<dyn DistributionStrategy>>,
    assignments: RwLock<HashMap<String, JobAssignment>>,
}

impl JobDistributor {
    pub fn new(default_kind: DistributionStrategyKind) -> Self {
        let strategies = [
            DistributionStrategyKind::RoundRobin,
            DistributionStrategyKind::LoadBased,
            DistributionStrategyKind::Affinity,
            DistributionStrategyKind::Broadcast,
        ]
        .into_iter()
        .map(|kind| (kind, create_strategy(kind)))
        .collect();

        Self {
            default_kind,
            strategies,
            assignments: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_strategy(&self) -> DistributionStrategyKind {
        self.default_kind
    }

    /// Places a job with the default strategy.
    pub async fn distribute(&self, job_id: &str, nodes: &[NodeSnapshot]) -> Option<JobAssignment> {
        self.distribute_with(job_id, self.default_kind, nodes).await
    }

    /// Places a job and records the assignment. Returns `None` when no node is active.
    pub async fn distribute_with(
        &self,
        job_id: &str,
        kind: DistributionStrategyKind,
        nodes: &[NodeSnapshot],
    ) -> Option<JobAssignment> {
        let assignment = self.place(job_id, kind, nodes)?;
        self.assignments
            .write()
            .await
            .insert(job_id.to_string(), assignment.clone());
        Some(assignment)
    }

    /// Re-places every job assigned to `node_id` with the strategy that placed it.
    ///
    /// Jobs for which no active node remains keep no assignment.
    pub async fn reassign_jobs_from_node(
        &self,
        node_id: &str,
        nodes: &[NodeSnapshot],
    ) -> Vec<JobAssignment> {
        let mut assignments = self.assignments.write().await;
        let affected: Vec<(String, DistributionStrategyKind)> = assignments
            .values()
            .filter(|a| a.is_assigned_to(node_id))
            .map(|a| (a.job_id.clone(), a.strategy))
            .collect();

        let mut moved = Vec::with_capacity(affected.len());
        for (job_id, kind) in affected {
            match self.place(&job_id, kind, nodes) {
                Some(assignment) => {
                    assignments.insert(job_id, assignment.clone());
                    moved.push(assignment);
                }
                None => {
                    warn!(job.id = %job_id, from = node_id, "no active node to take over job");
                    assignments.remove(&job_id);
                }
            }
        }

        if !moved.is_empty() {
            info!(node.id = node_id, jobs = moved.len(), "reassigned jobs from node");
        }
        moved
    }

    /// Recomputes assignments that reference a node that is no longer active.
    ///
    /// Returns the assignments that changed.
    pub async fn rebalance(&self, nodes: &[NodeSnapshot]) -> Vec<JobAssignment> {
        let stale: Vec<String> = {
            let assignments = self.assignments.read().await;
            let mut stale: Vec<String> = assignments
                .values()
                .flat_map(|a| a.target_nodes.iter())
                .filter(|target| {
                    !nodes
                        .iter()
                        .any(|n| &n.node_id == *target && n.is_active())
                })
                .cloned()
                .collect();
            stale.sort();
            stale.dedup();
            stale
        };

        let mut changed = Vec::new();
        for node_id in stale {
            changed.extend(self.reassign_jobs_from_node(&node_id, nodes).await);
        }
        debug!(changed = changed.len(), "rebalance finished");
        changed
    }

    pub async fn assignment(&self, job_id: &str) -> Option<JobAssignment> {
        self.assignments.read().await.get(job_id).cloned()
    }

    pub async fn assignments(&self) -> Vec<JobAssignment> {
        let mut all: Vec<JobAssignment> =
            self.assignments.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        all
    }

    /// Number of jobs currently assigned to `node_id`.
    pub async fn node_load(&self, node_id: &str) -> usize {
        self.assignments
            .read()
            .await
            .values()
            .filter(|a| a.is_assigned_to(node_id))
            .count()
    }

    pub async fn remove_job(&self, job_id: &str) -> Option<JobAssignment> {
        self.assignments.write().await.remove(job_id)
    }

    fn place(
        &self,
        job_id: &str,
        kind: DistributionStrategyKind,
        nodes: &[NodeSnapshot],
    ) -> Option<JobAssignment> {
        let strategy = self.strategies.get(&kind)?;
        let target_nodes = strategy.select_nodes(job_id, nodes);
        if target_nodes.is_empty() {
            debug!(job.id = job_id, strategy = strategy.name(), "no target node selected");
            return None;
        }
        Some(JobAssignment {
            job_id: job_id.to_string(),
            target_nodes,
            strategy: kind,
        })
    }
}
