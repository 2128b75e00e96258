#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use scheduler_core::models::{DistributionStrategyKind, NodeSnapshot, NodeStatus};
    use scheduler_dispatcher::strategies::{
        AffinityStrategy, BroadcastStrategy, LoadBasedStrategy, RoundRobinStrategy,
    };
    use scheduler_dispatcher::{create_strategy, DistributionStrategy, JobDistributor};

    fn node(id: &str, status: NodeStatus, cpu_load: u8, active_jobs: u32) -> NodeSnapshot {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        NodeSnapshot {
            node_id: id.to_string(),
            host: "localhost".to_string(),
            port: 5701,
            startup_time: at,
            last_heartbeat: at,
            status,
            cpu_load,
            memory_used_mb: 256,
            active_jobs,
        }
    }

    fn three_nodes() -> Vec<NodeSnapshot> {
        vec![
            node("node-c", NodeStatus::Active, 10, 0),
            node("node-a", NodeStatus::Active, 10, 0),
            node("node-b", NodeStatus::Active, 10, 0),
        ]
    }

    #[test]
    fn test_round_robin_cycles_per_job() {
        let strategy = RoundRobinStrategy::new();
        let nodes = three_nodes();

        let picks: Vec<String> = (0..4)
            .map(|_| strategy.select_nodes("job-1", &nodes).remove(0))
            .collect();
        assert_eq!(picks, vec!["node-a", "node-b", "node-c", "node-a"]);

        // 每个任务有独立的计数器
        assert_eq!(strategy.select_nodes("job-2", &nodes), vec!["node-a"]);
    }

    #[test]
    fn test_round_robin_skips_inactive_nodes() {
        let strategy = RoundRobinStrategy::new();
        let nodes = vec![
            node("node-a", NodeStatus::Suspected, 10, 0),
            node("node-b", NodeStatus::Active, 10, 0),
        ];
        for _ in 0..3 {
            assert_eq!(strategy.select_nodes("job-1", &nodes), vec!["node-b"]);
        }
        assert!(strategy
            .select_nodes("job-1", &[node("node-a", NodeStatus::Down, 0, 0)])
            .is_empty());
    }

    #[test]
    fn test_load_based_prefers_least_loaded() {
        let strategy = LoadBasedStrategy::new();
        let nodes = vec![
            node("node-a", NodeStatus::Active, 90, 4),
            node("node-b", NodeStatus::Active, 20, 1),
            node("node-c", NodeStatus::Down, 0, 0),
        ];
        assert_eq!(strategy.select_nodes("job-1", &nodes), vec!["node-b"]);

        // 负载相同时选择 id 最小的节点
        assert_eq!(strategy.select_nodes("job-1", &three_nodes()), vec!["node-a"]);
    }

    #[test]
    fn test_affinity_is_sticky_until_node_leaves() {
        let strategy = AffinityStrategy::new();
        let mut nodes = three_nodes();

        let first = strategy.select_nodes("report", &nodes);
        assert_eq!(first.len(), 1);
        for _ in 0..5 {
            assert_eq!(strategy.select_nodes("report", &nodes), first);
        }

        for n in nodes.iter_mut().filter(|n| n.node_id == first[0]) {
            n.status = NodeStatus::Down;
        }
        let moved = strategy.select_nodes("report", &nodes);
        assert_eq!(moved.len(), 1);
        assert_ne!(moved, first);
        assert_eq!(strategy.select_nodes("report", &nodes), moved);
    }

    #[test]
    fn test_broadcast_targets_every_active_node() {
        let strategy = BroadcastStrategy::new();
        let mut nodes = three_nodes();
        nodes.push(node("node-d", NodeStatus::ShuttingDown, 0, 0));
        assert_eq!(
            strategy.select_nodes("job-1", &nodes),
            vec!["node-a", "node-b", "node-c"]
        );
    }

    #[test]
    fn test_factory_matches_kind() {
        for kind in [
            DistributionStrategyKind::RoundRobin,
            DistributionStrategyKind::LoadBased,
            DistributionStrategyKind::Affinity,
            DistributionStrategyKind::Broadcast,
        ] {
            let strategy = create_strategy(kind);
            assert_eq!(strategy.kind(), kind);
            assert_eq!(strategy.name(), kind.as_str());
        }
    }

    #[tokio::test]
    async fn test_distributor_records_assignments() {
        let distributor = JobDistributor::new(DistributionStrategyKind::RoundRobin);
        let nodes = three_nodes();

        let first = distributor.distribute("job-1", &nodes).await.unwrap();
        assert_eq!(first.target_nodes, vec!["node-a"]);
        assert_eq!(first.strategy, DistributionStrategyKind::RoundRobin);

        let broadcast = distributor
            .distribute_with("job-2", DistributionStrategyKind::Broadcast, &nodes)
            .await
            .unwrap();
        assert_eq!(broadcast.target_nodes.len(), 3);

        assert_eq!(distributor.assignment("job-1").await, Some(first));
        assert_eq!(distributor.assignments().await.len(), 2);
        assert_eq!(distributor.node_load("node-a").await, 2);
        assert_eq!(distributor.node_load("node-b").await, 1);

        assert!(distributor.remove_job("job-2").await.is_some());
        assert!(distributor.remove_job("job-2").await.is_none());
        assert_eq!(distributor.node_load("node-b").await, 0);
    }

    #[tokio::test]
    async fn test_no_active_node_means_no_assignment() {
        let distributor = JobDistributor::new(DistributionStrategyKind::LoadBased);
        let nodes = vec![node("node-a", NodeStatus::Down, 0, 0)];
        assert!(distributor.distribute("job-1", &nodes).await.is_none());
        assert!(distributor.assignment("job-1").await.is_none());
    }

    #[tokio::test]
    async fn test_reassign_moves_jobs_off_failed_node() {
        let distributor = JobDistributor::new(DistributionStrategyKind::LoadBased);
        let mut nodes = three_nodes();
        distributor.distribute("job-1", &nodes).await.unwrap();
        distributor.distribute("job-2", &nodes).await.unwrap();
        assert_eq!(distributor.node_load("node-a").await, 2);

        nodes[1].status = NodeStatus::Down;
        let moved = distributor.reassign_jobs_from_node("node-a", &nodes).await;
        assert_eq!(moved.len(), 2);
        assert!(moved.iter().all(|a| a.target_nodes == vec!["node-b"]));
        assert_eq!(distributor.node_load("node-a").await, 0);
    }

    #[tokio::test]
    async fn test_rebalance_reports_only_changes() {
        let distributor = JobDistributor::new(DistributionStrategyKind::RoundRobin);
        let mut nodes = three_nodes();
        for id in ["job-1", "job-2", "job-3"] {
            distributor.distribute(id, &nodes).await.unwrap();
        }
        assert!(distributor.rebalance(&nodes).await.is_empty());

        nodes.retain(|n| n.node_id != "node-a");
        let changed = distributor.rebalance(&nodes).await;
        assert_eq!(changed.len(), 3);
        assert_eq!(distributor.node_load("node-a").await, 0);
    }
}
