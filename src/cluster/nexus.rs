//! Embedded consensus facade.
//!
//! DKV delegates log replication and election safety to the embedded Nexus
//! consensus module; this facade owns what the rest of the process needs
//! from it: the member set, the current leader and term, and the
//! configuration-change protocol. Membership changes go through the
//! replicated log one at a time, so they are serialized here; concurrent
//! AddNode calls queue behind the change lock.
//!
//! Leader choice is deterministic (lowest member id) whenever the facade
//! has to fill a vacancy, which keeps multi-node tests reproducible.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::NodeInfo;

/// A consensus member with its placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NexusMember {
    pub node_id: u64,
    pub url: String,
    pub dc_id: String,
}

/// Member set and leader state for one shard's consensus group.
pub struct NexusCluster {
    members: RwLock<HashMap<u64, NexusMember>>,
    leader: AtomicU64, // 0 = no leader (transitional)
    term: AtomicU64,
    // Serializes configuration changes; one at a time through the log.
    config_change: Mutex<()>,
}

impl NexusCluster {
    /// Bootstrap with the initial member set. Ids are assigned in listing
    /// order starting at 1, and the lowest id starts as leader.
    pub fn bootstrap(members: impl IntoIterator<Item = (String, String)>) -> Self {
        let cluster = Self {
            members: RwLock::new(HashMap::new()),
            leader: AtomicU64::new(0),
            term: AtomicU64::new(0),
            config_change: Mutex::new(()),
        };
        for (url, dc_id) in members {
            let mut map = cluster.members.write();
            let node_id = next_id(&map);
            map.insert(node_id, NexusMember { node_id, url, dc_id });
        }
        cluster.fill_vacancy();
        cluster
    }

    /// Add a member. Idempotent on URL: re-adding an existing member
    /// returns its id without a configuration change.
    pub fn add_node(&self, url: &str, dc_id: &str) -> DkvResult<u64> {
        if url.is_empty() {
            return Err(DkvError::invalid("empty node url"));
        }
        let _change = self.config_change.lock();
        let mut members = self.members.write();
        if let Some(existing) = members.values().find(|m| m.url == url) {
            return Ok(existing.node_id);
        }
        let node_id = next_id(&members);
        members.insert(
            node_id,
            NexusMember {
                node_id,
                url: url.to_string(),
                dc_id: dc_id.to_string(),
            },
        );
        drop(members);
        self.fill_vacancy();
        tracing::info!(node_id, url, dc_id, "member added");
        Ok(node_id)
    }

    /// Remove a member by URL. Removing the leader vacates leadership and
    /// the lowest remaining id takes over.
    pub fn remove_node(&self, url: &str) -> DkvResult<u64> {
        let _change = self.config_change.lock();
        let mut members = self.members.write();
        let Some(node_id) = members
            .values()
            .find(|m| m.url == url)
            .map(|m| m.node_id)
        else {
            return Err(DkvError::invalid(format!("unknown node url: {}", url)));
        };
        if members.len() == 1 {
            return Err(DkvError::invalid("cannot remove the last member"));
        }
        members.remove(&node_id);
        drop(members);

        if self.leader.load(Ordering::Acquire) == node_id {
            self.leader.store(0, Ordering::Release);
            self.fill_vacancy();
        }
        tracing::info!(node_id, url, "member removed");
        Ok(node_id)
    }

    /// Current leader id, if any.
    pub fn leader(&self) -> Option<u64> {
        match self.leader.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Current term.
    pub fn term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    pub fn is_leader(&self, node_id: u64) -> bool {
        self.leader() == Some(node_id)
    }

    /// All members, sorted by id.
    pub fn members(&self) -> Vec<NexusMember> {
        let mut members: Vec<NexusMember> = self.members.read().values().cloned().collect();
        members.sort_by_key(|m| m.node_id);
        members
    }

    /// Member lookup by URL.
    pub fn member_by_url(&self, url: &str) -> Option<NexusMember> {
        self.members.read().values().find(|m| m.url == url).cloned()
    }

    /// Wire shape of the member set.
    pub fn node_infos(&self) -> Vec<NodeInfo> {
        self.members()
            .into_iter()
            .map(|m| NodeInfo {
                node_id: m.node_id,
                nexus_url: m.url,
            })
            .collect()
    }

    /// Force a specific member into leadership (election outcome injected
    /// by tests or an operator transfer). Bumps the term.
    pub fn elect(&self, node_id: u64) -> DkvResult<()> {
        if !self.members.read().contains_key(&node_id) {
            return Err(DkvError::invalid(format!("unknown node id: {}", node_id)));
        }
        self.leader.store(node_id, Ordering::Release);
        let term = self.term.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(node_id, term, "leadership assumed");
        Ok(())
    }

    /// Vacate leadership; the shard is transitional until a new election.
    pub fn step_down(&self) {
        self.leader.store(0, Ordering::Release);
    }

    fn fill_vacancy(&self) {
        if self.leader.load(Ordering::Acquire) != 0 {
            return;
        }
        let lowest = self.members.read().keys().min().copied();
        if let Some(node_id) = lowest {
            self.leader.store(node_id, Ordering::Release);
            self.term.fetch_add(1, Ordering::AcqRel);
        }
    }
}

fn next_id(members: &HashMap<u64, NexusMember>) -> u64 {
    members.keys().max().copied().unwrap_or(0) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_cluster() -> NexusCluster {
        NexusCluster::bootstrap([
            ("http://n1:7071".to_string(), "dc-a".to_string()),
            ("http://n2:7071".to_string(), "dc-a".to_string()),
            ("http://n3:7071".to_string(), "dc-b".to_string()),
        ])
    }

    #[test]
    fn bootstrap_elects_lowest_id() {
        let cluster = three_node_cluster();
        assert_eq!(cluster.leader(), Some(1));
        assert_eq!(cluster.members().len(), 3);
    }

    #[test]
    fn add_node_is_idempotent_on_url() {
        let cluster = three_node_cluster();
        let id = cluster.add_node("http://n4:7071", "dc-b").unwrap();
        assert_eq!(id, 4);
        assert_eq!(cluster.add_node("http://n4:7071", "dc-b").unwrap(), 4);
        assert_eq!(cluster.members().len(), 4);
    }

    #[test]
    fn removing_leader_promotes_lowest_remaining() {
        let cluster = three_node_cluster();
        cluster.remove_node("http://n1:7071").unwrap();
        assert_eq!(cluster.leader(), Some(2));
    }

    #[test]
    fn cannot_remove_last_member() {
        let cluster = NexusCluster::bootstrap([("http://n1:7071".to_string(), "dc-a".to_string())]);
        assert!(cluster.remove_node("http://n1:7071").is_err());
    }

    #[test]
    fn elect_bumps_term() {
        let cluster = three_node_cluster();
        let term = cluster.term();
        cluster.elect(3).unwrap();
        assert_eq!(cluster.leader(), Some(3));
        assert!(cluster.term() > term);
        assert!(cluster.elect(99).is_err());
    }
}
