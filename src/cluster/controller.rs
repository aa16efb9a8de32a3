//! External membership surface and region-status derivation.

use std::sync::Arc;

use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::{NodeInfo, RegionStatus};

use super::nexus::NexusCluster;

/// Wraps the consensus facade with leader-gated membership operations and
/// maps consensus state to the externally visible region status.
pub struct ClusterController {
    nexus: Arc<NexusCluster>,
    local_node_id: u64,
    dc_id: String,
}

impl ClusterController {
    pub fn new(nexus: Arc<NexusCluster>, local_node_id: u64, dc_id: impl Into<String>) -> Self {
        Self {
            nexus,
            local_node_id,
            dc_id: dc_id.into(),
        }
    }

    pub fn local_node_id(&self) -> u64 {
        self.local_node_id
    }

    pub fn nexus(&self) -> &Arc<NexusCluster> {
        &self.nexus
    }

    /// Add a member. Only the leader drives configuration changes; callers
    /// hitting a follower get the leader hint back.
    pub fn add_node(&self, node_url: &str) -> DkvResult<u64> {
        self.require_leadership()?;
        // Members joined through the external surface are placed in the
        // serving node's data center; cross-DC members bootstrap from
        // configuration.
        self.nexus.add_node(node_url, &self.dc_id)
    }

    /// Remove a member; leader-gated like [`Self::add_node`].
    pub fn remove_node(&self, node_url: &str) -> DkvResult<u64> {
        self.require_leadership()?;
        self.nexus.remove_node(node_url)
    }

    /// Leader id plus the member set. Served by any member.
    pub fn list_nodes(&self) -> (u64, Vec<NodeInfo>) {
        (
            self.nexus.leader().unwrap_or(0),
            self.nexus.node_infos(),
        )
    }

    /// This node's externally visible role.
    ///
    /// Leader maps to LEADER. Among the followers of each data center the
    /// lowest node id is the designated PRIMARY_FOLLOWER; the rest are
    /// SECONDARY_FOLLOWER. With no elected leader the shard is
    /// transitional and reports INACTIVE.
    pub fn region_status(&self) -> RegionStatus {
        let Some(leader) = self.nexus.leader() else {
            return RegionStatus::Inactive;
        };
        if leader == self.local_node_id {
            return RegionStatus::Leader;
        }

        let designated = self
            .nexus
            .members()
            .into_iter()
            .filter(|m| m.node_id != leader && m.dc_id == self.dc_id)
            .map(|m| m.node_id)
            .min();
        match designated {
            Some(id) if id == self.local_node_id => RegionStatus::PrimaryFollower,
            Some(_) => RegionStatus::SecondaryFollower,
            // Not in the member set (e.g. mid-removal): transitional.
            None => RegionStatus::Inactive,
        }
    }

    fn require_leadership(&self) -> DkvResult<()> {
        if self.nexus.is_leader(self.local_node_id) {
            Ok(())
        } else {
            Err(DkvError::NotLeader {
                leader_hint: self.nexus.leader().unwrap_or(0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Arc<NexusCluster> {
        Arc::new(NexusCluster::bootstrap([
            ("http://n1:7071".to_string(), "dc-a".to_string()),
            ("http://n2:7071".to_string(), "dc-a".to_string()),
            ("http://n3:7071".to_string(), "dc-a".to_string()),
            ("http://n4:7071".to_string(), "dc-b".to_string()),
        ]))
    }

    #[test]
    fn leader_and_follower_roles() {
        let nexus = cluster();
        let leader = ClusterController::new(nexus.clone(), 1, "dc-a");
        let primary = ClusterController::new(nexus.clone(), 2, "dc-a");
        let secondary = ClusterController::new(nexus.clone(), 3, "dc-a");
        let remote_primary = ClusterController::new(nexus.clone(), 4, "dc-b");

        assert_eq!(leader.region_status(), RegionStatus::Leader);
        assert_eq!(primary.region_status(), RegionStatus::PrimaryFollower);
        assert_eq!(secondary.region_status(), RegionStatus::SecondaryFollower);
        // Only follower in dc-b, so it is that DC's designated follower.
        assert_eq!(remote_primary.region_status(), RegionStatus::PrimaryFollower);
    }

    #[test]
    fn follower_rejects_membership_changes_with_hint() {
        let nexus = cluster();
        let follower = ClusterController::new(nexus, 2, "dc-a");
        let err = follower.add_node("http://n5:7071").unwrap_err();
        assert!(matches!(err, DkvError::NotLeader { leader_hint: 1 }));
    }

    #[test]
    fn election_moves_roles() {
        let nexus = cluster();
        let node2 = ClusterController::new(nexus.clone(), 2, "dc-a");
        assert_eq!(node2.region_status(), RegionStatus::PrimaryFollower);

        nexus.elect(2).unwrap();
        assert_eq!(node2.region_status(), RegionStatus::Leader);

        // Node 1 is now the lowest follower id in dc-a.
        let node1 = ClusterController::new(nexus.clone(), 1, "dc-a");
        assert_eq!(node1.region_status(), RegionStatus::PrimaryFollower);

        nexus.step_down();
        assert_eq!(node2.region_status(), RegionStatus::Inactive);
    }
}
