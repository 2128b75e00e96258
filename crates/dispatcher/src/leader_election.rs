/// A change of the locally observed leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipChange {
    pub previous: Option<String>,
    pub leader: Option<String>,
    pub epoch: u64,
}

/// Smallest-id leader rule over the active membership.
///
/// There is no voting round and no fencing token: two partitioned nodes may
/// both elect themselves until their views converge. `epoch` counts local
/// leadership changes and is diagnostic only.
#[derive(Debug)]
pub struct LeaderElection {
    local_node_id: String,
    current: Option<String>,
    epoch: u64,
}

impl LeaderElection {
    pub fn new(local_node_id: impl Into<String>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            current: None,
            epoch: 0,
        }
    }

    /// The lexicographically smallest id.
    pub fn elect<'a>(active_node_ids: impl IntoIterator<Item = &'a str>) -> Option<String> {
        active_node_ids.into_iter().min().map(str::to_string)
    }

    /// Re-runs the rule. Returns the change when the leader differs from the last result.
    pub fn evaluate<'a>(
        &mut self,
        active_node_ids: impl IntoIterator<Item = &'a str>,
    ) -> Option<LeadershipChange> {
        let leader = Self::elect(active_node_ids);
        self.apply(leader)
    }

    /// Forgets the current leader, e.g. when the local node stops.
    pub fn reset(&mut self) -> Option<LeadershipChange> {
        self.apply(None)
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_local_leader(&self) -> bool {
        self.current.as_deref() == Some(self.local_node_id.as_str())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn apply(&mut self, leader: Option<String>) -> Option<LeadershipChange> {
        if leader == self.current {
            return None;
        }
        self.epoch += 1;
        let previous = std::mem::replace(&mut self.current, leader.clone());
        Some(LeadershipChange {
            previous,
            leader,
            epoch: self.epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_id_wins() {
        assert_eq!(
            LeaderElection::elect(["node-c", "node-a", "node-b"]),
            Some("node-a".to_string())
        );
        assert_eq!(LeaderElection::elect(std::iter::empty()), None);
    }

    #[test]
    fn test_changes_are_reported_once() {
        let mut election = LeaderElection::new("node-b");

        let change = election.evaluate(["node-b"]).unwrap();
        assert_eq!(change.previous, None);
        assert_eq!(change.leader.as_deref(), Some("node-b"));
        assert!(election.is_local_leader());

        assert!(election.evaluate(["node-b", "node-c"]).is_none());

        let change = election.evaluate(["node-a", "node-b"]).unwrap();
        assert_eq!(change.previous.as_deref(), Some("node-b"));
        assert_eq!(change.epoch, 2);
        assert!(!election.is_local_leader());

        let change = election.reset().unwrap();
        assert_eq!(change.leader, None);
        assert_eq!(election.epoch(), 3);
    }
}
