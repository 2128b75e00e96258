use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument, Span};

use scheduler_core::config::ClusterConfig;
use scheduler_core::models::{
    ClusterEvent, ClusterNode, ClusterState, JobDefinition, NodeLoad, NodeSnapshot, NodeStatus,
};
use scheduler_core::traits::{Clock, ClusterListener, ClusterTransport, ListenerRegistry};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::heartbeat::{HeartbeatManager, LoadProbe};
use crate::job_distributor::{JobAssignment, JobDistributor};
use crate::leader_election::LeaderElection;
use crate::node_failure_detector::{LivenessPolicy, NodeFailureDetector};

/// Host recorded for a member first seen through its heartbeat.
const UNKNOWN_HOST: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    New,
    Known,
    /// Was suspected or down and has been heard from again.
    Revived,
}

/// Membership, liveness and leadership for one node.
///
/// Remote state is learned only from transport events; the local node's own
/// entry is updated by its heartbeat. The leader is the active node with the
/// smallest id. Without fencing, two nodes that cannot hear each other will
/// both consider themselves leader until heartbeats flow again; the window is
/// bounded by `heartbeat_timeout` plus `down_after_missed_beats` intervals.
///
/// A node that announced its departure is remembered with its leave time, so
/// a heartbeat or join it sent earlier and that arrives late is discarded.
pub struct ClusterCoordinator {
    local: Arc<ClusterNode>,
    config: ClusterConfig,
    transport: Arc<dyn ClusterTransport>,
    clock: Arc<dyn Clock>,
    nodes: RwLock<HashMap<String, Arc<ClusterNode>>>,
    departed: Mutex<HashMap<String, i64>>,
    election: Mutex<LeaderElection>,
    detector: NodeFailureDetector,
    distributor: JobDistributor,
    heartbeat: HeartbeatManager,
    listeners: ListenerRegistry<dyn ClusterListener>,
    metrics: Arc<MetricsCollector>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    span: Span,
}

impl ClusterCoordinator {
    pub fn new(
        config: ClusterConfig,
        node_id: impl Into<String>,
        transport: Arc<dyn ClusterTransport>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let node_id = node_id.into();
        let local = Arc::new(ClusterNode::new(
            node_id.clone(),
            config.host.clone(),
            config.port,
            clock.now(),
        ));
        let heartbeat = HeartbeatManager::new(
            Arc::clone(&local),
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.heartbeat_interval(),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            span: tracing::info_span!("cluster_coordinator", node.id = %node_id),
            election: Mutex::new(LeaderElection::new(node_id)),
            detector: NodeFailureDetector::new(LivenessPolicy::from_config(&config)),
            distributor: JobDistributor::new(config.distribution_strategy),
            heartbeat,
            local,
            config,
            transport,
            clock,
            nodes: RwLock::new(HashMap::new()),
            departed: Mutex::new(HashMap::new()),
            listeners: ListenerRegistry::new(),
            metrics,
            running: AtomicBool::new(false),
            shutdown,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Replaces the load sampled into each heartbeat.
    pub fn with_load_probe(mut self, probe: LoadProbe) -> Self {
        self.heartbeat = self.heartbeat.with_load_probe(probe);
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn current_node_id(&self) -> &str {
        self.local.node_id()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_leader(&self) -> bool {
        self.is_running() && self.lock_election().is_local_leader()
    }

    pub fn leader_id(&self) -> Option<String> {
        self.lock_election().current().map(str::to_string)
    }

    /// Number of leadership changes seen locally. Diagnostic only.
    pub fn leadership_epoch(&self) -> u64 {
        self.lock_election().epoch()
    }

    pub fn distributor(&self) -> &JobDistributor {
        &self.distributor
    }

    pub fn add_listener(&self, listener: Arc<dyn ClusterListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ClusterListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Joins the cluster. Calling it on a running coordinator is a no-op.
    pub async fn start(self: &Arc<Self>) -> scheduler_core::SchedulerResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!(node.id = self.current_node_id(), "coordinator already running");
            return Ok(());
        }
        self.start_inner().instrument(self.span.clone()).await;
        Ok(())
    }

    async fn start_inner(self: &Arc<Self>) {
        self.shutdown.send_replace(false);
        self.local.record_heartbeat(self.clock.now());
        self.local.set_status(NodeStatus::Active);
        self.nodes
            .write()
            .await
            .insert(self.local.node_id().to_string(), Arc::clone(&self.local));

        let events = self.transport.subscribe().await;
        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_event_loop(events));

        info!(
            host = %self.config.host,
            port = self.config.port,
            strategy = %self.distributor.default_strategy(),
            "joining cluster"
        );
        self.publish(self.join_event()).await;
        let snapshot = self.local.snapshot();
        self.listeners.notify(|l| l.on_node_joined(&snapshot));
        self.reevaluate_leadership().await;

        tasks.push(self.spawn_heartbeat_loop());
    }

    /// Leaves the cluster. Calling it on a stopped coordinator is a no-op.
    pub async fn stop(&self) -> scheduler_core::SchedulerResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_inner().instrument(self.span.clone()).await;
        Ok(())
    }

    async fn stop_inner(&self) {
        self.local.set_status(NodeStatus::ShuttingDown);

        // No heartbeat may follow the leave announcement.
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for handle in tasks {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "coordinator task ended abnormally");
                }
            }
        }

        self.publish(ClusterEvent::NodeLeft {
            node_id: self.local.node_id().to_string(),
            timestamp_ms: self.clock.now().timestamp_millis(),
        })
        .await;

        self.nodes.write().await.clear();
        self.lock_departed().clear();
        let change = self.lock_election().reset();
        if let Some(change) = change {
            StructuredLogger::log_leader_changed(
                self.local.node_id(),
                change.previous.as_deref(),
                None,
                change.epoch,
            );
        }
        self.metrics.update_cluster_view(0, false);

        let snapshot = self.local.snapshot();
        self.listeners.notify(|l| l.on_node_left(&snapshot));
        info!("left cluster");
    }

    /// Quorum-aware view of the membership table.
    pub async fn cluster_state(&self) -> ClusterState {
        let nodes = self.nodes.read().await;
        let total = nodes.len();
        let active = nodes.values().filter(|n| n.is_active()).count();
        let healthy = self.is_running() && active > total / 2;
        ClusterState::new(self.leader_id(), total, active, healthy)
            .unwrap_or_else(|_| ClusterState::empty())
    }

    /// Snapshots of all known nodes, ordered by id.
    pub async fn nodes(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<NodeSnapshot> = self
            .nodes
            .read()
            .await
            .values()
            .map(|n| n.snapshot())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub async fn node(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.nodes.read().await.get(node_id).map(|n| n.snapshot())
    }

    pub fn local_snapshot(&self) -> NodeSnapshot {
        self.local.snapshot()
    }

    pub fn update_local_load(&self, load: NodeLoad) {
        self.local.apply_load(load);
    }

    pub fn job_started(&self) {
        self.local.increment_active_jobs();
    }

    pub fn job_finished(&self) {
        self.local.decrement_active_jobs();
    }

    /// Places `job` and announces the placement. Followers do nothing and return `None`.
    pub async fn distribute_job(&self, job: &JobDefinition) -> Option<JobAssignment> {
        if !self.is_leader() {
            debug!(job.id = job.job_id(), "not leader, skipping distribution");
            return None;
        }
        let nodes = self.nodes().await;
        let assignment = self.distributor.distribute(job.job_id(), &nodes).await?;
        self.announce(&assignment).await;
        Some(assignment)
    }

    /// Moves assignments off nodes that are no longer active. Leader only.
    pub async fn rebalance_jobs(&self) -> Vec<JobAssignment> {
        if !self.is_leader() {
            return Vec::new();
        }
        let nodes = self.nodes().await;
        let changed = self.distributor.rebalance(&nodes).await;
        for assignment in &changed {
            self.announce(assignment).await;
        }
        changed
    }

    pub async fn forget_job(&self, job_id: &str) {
        self.distributor.remove_job(job_id).await;
    }

    /// Applies one event received from the transport. Events published by
    /// this node are ignored.
    pub async fn handle_event(&self, event: ClusterEvent) {
        if !self.is_running() || event.source_node() == self.local.node_id() {
            return;
        }
        if self.sent_before_departure(&event) {
            debug!(
                member.id = event.source_node(),
                event.type = event.event_type(),
                "ignoring event sent before the node left"
            );
            return;
        }

        match event {
            ClusterEvent::NodeJoined {
                node_id, host, port, ..
            } => {
                let (node, change) = self.upsert_node(&node_id, &host, port).await;
                if change == Membership::New {
                    info!(member.id = %node_id, host = %host, port, "node joined");
                    let snapshot = node.snapshot();
                    self.listeners.notify(|l| l.on_node_joined(&snapshot));
                    // 新节点需要知道本节点
                    self.publish(self.join_event()).await;
                }
                self.reevaluate_leadership().await;
            }
            ClusterEvent::NodeLeft {
                node_id,
                timestamp_ms,
            } => {
                self.record_departure(&node_id, timestamp_ms);
                if let Some(node) = self.nodes.read().await.get(&node_id) {
                    node.set_status(NodeStatus::ShuttingDown);
                }
                self.remove_node(&node_id).await;
            }
            ClusterEvent::Heartbeat {
                node_id,
                cpu_load,
                memory_used_mb,
                active_jobs,
                ..
            } => {
                let (node, change) = self.upsert_node(&node_id, UNKNOWN_HOST, 0).await;
                node.apply_load(NodeLoad {
                    cpu_load,
                    memory_used_mb,
                    active_jobs,
                });
                match change {
                    Membership::New => {
                        let snapshot = node.snapshot();
                        self.listeners.notify(|l| l.on_node_joined(&snapshot));
                        self.reevaluate_leadership().await;
                    }
                    Membership::Revived => self.reevaluate_leadership().await,
                    Membership::Known => {}
                }
            }
            ClusterEvent::LeaderElected { leader_id, .. } => {
                let local_view = self.leader_id();
                if local_view.as_deref() != Some(leader_id.as_str()) {
                    debug!(announced = %leader_id, local = ?local_view, "leader views differ");
                }
            }
            ClusterEvent::JobDistributed {
                job_id,
                target_node,
                ..
            } => {
                debug!(job.id = %job_id, target = %target_node, "job distributed");
                self.listeners
                    .notify(|l| l.on_job_distributed(&job_id, &target_node));
            }
        }
    }

    /// Re-evaluates every remote node against the liveness policy.
    pub async fn check_liveness(&self) {
        if !self.is_running() {
            return;
        }
        let now = self.clock.now();
        let remote: Vec<Arc<ClusterNode>> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.node_id() != self.local.node_id())
            .cloned()
            .collect();

        let mut changed = false;
        let mut went_down = Vec::new();
        let mut purge = Vec::new();
        for node in &remote {
            if let Some(transition) = self.detector.evaluate(node, now) {
                StructuredLogger::log_node_status_changed(
                    self.local.node_id(),
                    &transition.node_id,
                    transition.from,
                    transition.to,
                );
                changed = true;
                if transition.to == NodeStatus::Down {
                    went_down.push(transition.node_id);
                }
            }
            if self.detector.should_purge(node, now) {
                purge.push(node.node_id().to_string());
            }
        }

        if changed {
            self.reevaluate_leadership().await;
        }
        for node_id in went_down {
            self.reassign_from(&node_id).await;
        }
        for node_id in purge {
            debug!(member.id = %node_id, "purging down node");
            self.remove_node(&node_id).await;
        }

        // A redelivery this late is not expected; forget old departures.
        let policy = self.detector.policy();
        let horizon = policy.down_after() + policy.purge_down_after;
        let cutoff = now
            .timestamp_millis()
            .saturating_sub(i64::try_from(horizon.as_millis()).unwrap_or(i64::MAX));
        self.lock_departed().retain(|_, left_at| *left_at > cutoff);
    }

    fn record_departure(&self, node_id: &str, left_at: i64) {
        let mut departed = self.lock_departed();
        let recorded = departed.entry(node_id.to_string()).or_insert(left_at);
        *recorded = (*recorded).max(left_at);
    }

    /// True for a heartbeat or join stamped no later than the sender's last
    /// leave. A newer one means the node came back and clears the record.
    fn sent_before_departure(&self, event: &ClusterEvent) -> bool {
        let (node_id, sent_at) = match event {
            ClusterEvent::Heartbeat {
                node_id,
                timestamp_ms,
                ..
            }
            | ClusterEvent::NodeJoined {
                node_id,
                timestamp_ms,
                ..
            } => (node_id, *timestamp_ms),
            _ => return false,
        };
        let mut departed = self.lock_departed();
        match departed.get(node_id) {
            Some(&left_at) if sent_at <= left_at => true,
            Some(_) => {
                departed.remove(node_id);
                false
            }
            None => false,
        }
    }

    fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ClusterEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        event = events.recv() => match event {
                            Some(event) => this.handle_event(event).await,
                            None => {
                                warn!("cluster transport closed");
                                break;
                            }
                        },
                    }
                }
            }
            .instrument(self.span.clone()),
        )
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let period = self.heartbeat.interval().max(Duration::from_millis(1));
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = this.heartbeat.send_heartbeat().await {
                                warn!(error = %err, "failed to publish heartbeat");
                            }
                            this.check_liveness().await;
                        }
                    }
                }
            }
            .instrument(self.span.clone()),
        )
    }

    fn lock_election(&self) -> MutexGuard<'_, LeaderElection> {
        self.election.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_departed(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.departed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_event(&self) -> ClusterEvent {
        ClusterEvent::NodeJoined {
            node_id: self.local.node_id().to_string(),
            host: self.local.host().to_string(),
            port: self.local.port(),
            timestamp_ms: self.clock.now().timestamp_millis(),
        }
    }

    async fn publish(&self, event: ClusterEvent) {
        let event_type = event.event_type();
        if let Err(err) = self.transport.publish(event).await {
            warn!(event.type = event_type, error = %err, "failed to publish cluster event");
        }
    }

    /// Records a sign of life from `node_id`, adding it when unknown.
    async fn upsert_node(
        &self,
        node_id: &str,
        host: &str,
        port: u16,
    ) -> (Arc<ClusterNode>, Membership) {
        let now = self.clock.now();
        let mut nodes = self.nodes.write().await;

        let Some(node) = nodes.get(node_id).cloned() else {
            let node = Arc::new(ClusterNode::new(node_id, host, port, now));
            nodes.insert(node_id.to_string(), Arc::clone(&node));
            return (node, Membership::New);
        };

        let node = if node.host() == UNKNOWN_HOST && host != UNKNOWN_HOST {
            // 先收到心跳后收到加入事件：补全地址信息
            let replacement = Arc::new(ClusterNode::new(node_id, host, port, node.startup_time()));
            replacement.set_status(node.status());
            replacement.apply_load(NodeLoad {
                cpu_load: i32::from(node.cpu_load()),
                memory_used_mb: i64::try_from(node.memory_used_mb()).unwrap_or(i64::MAX),
                active_jobs: i64::from(node.active_jobs()),
            });
            nodes.insert(node_id.to_string(), Arc::clone(&replacement));
            replacement
        } else {
            node
        };

        node.record_heartbeat(now);
        let previous = node.status();
        if previous == NodeStatus::Active {
            return (node, Membership::Known);
        }
        node.set_status(NodeStatus::Active);
        StructuredLogger::log_node_status_changed(
            self.local.node_id(),
            node_id,
            previous,
            NodeStatus::Active,
        );
        (node, Membership::Revived)
    }

    async fn remove_node(&self, node_id: &str) {
        let Some(node) = self.nodes.write().await.remove(node_id) else {
            return;
        };
        info!(member.id = %node_id, status = %node.status(), "node left");
        let snapshot = node.snapshot();
        self.listeners.notify(|l| l.on_node_left(&snapshot));
        self.reevaluate_leadership().await;
        self.reassign_from(node_id).await;
    }

    async fn reassign_from(&self, node_id: &str) {
        if !self.is_leader() {
            return;
        }
        let nodes = self.nodes().await;
        for assignment in self.distributor.reassign_jobs_from_node(node_id, &nodes).await {
            self.announce(&assignment).await;
        }
    }

    async fn announce(&self, assignment: &JobAssignment) {
        for target in &assignment.target_nodes {
            self.publish(ClusterEvent::JobDistributed {
                job_id: assignment.job_id.clone(),
                target_node: target.clone(),
                distributed_by: self.local.node_id().to_string(),
                timestamp_ms: self.clock.now().timestamp_millis(),
            })
            .await;
            self.listeners
                .notify(|l| l.on_job_distributed(&assignment.job_id, target));
        }
    }

    async fn reevaluate_leadership(&self) {
        let (change, active) = {
            let nodes = self.nodes.read().await;
            let active: Vec<&str> = nodes
                .values()
                .filter(|n| n.is_active())
                .map(|n| n.node_id())
                .collect();
            let change = self.lock_election().evaluate(active.iter().copied());
            (change, active.len())
        };

        let is_leader = self.is_leader();
        self.metrics.update_cluster_view(active, is_leader);

        let Some(change) = change else {
            return;
        };
        StructuredLogger::log_leader_changed(
            self.local.node_id(),
            change.previous.as_deref(),
            change.leader.as_deref(),
            change.epoch,
        );
        self.metrics.record_leadership_change();

        if let Some(leader) = change.leader {
            if is_leader {
                self.publish(ClusterEvent::LeaderElected {
                    leader_id: leader.clone(),
                    timestamp_ms: self.clock.now().timestamp_millis(),
                })
                .await;
            }
            self.listeners.notify(|l| l.on_leader_elected(&leader));
        }
    }
}

impl std::fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("node_id", &self.local.node_id())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
