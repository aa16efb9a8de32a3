//! Discovery service tests: registry semantics, the heartbeat loop, and
//! routing over discovery output.

mod common;

use common::region;
use dkv::config::NodeConfig;
use dkv::controller::ClusterController;
use dkv::discovery_client::{ClusterInfoFilter, ClusterInfoSource, DiscoveryClient};
use dkv::error::DkvResult;
use dkv::heartbeat::{Heartbeater, StatusSink};
use dkv::nexus::NexusCluster;
use dkv::proto::{RegionInfo, RegionStatus};
use dkv::registry::{DiscoveryRegistry, RegionFilter};
use dkv::router::{select_read_target, select_write_target, ConsistencyLevel};
use dkv::time::now_epoch_millis;
use std::sync::Arc;
use std::time::Duration;

/// In-process sink/source pair over a registry, standing in for the
/// discovery RPC surface.
struct RegistryEndpoint {
    registry: Arc<DiscoveryRegistry>,
}

#[tonic::async_trait]
impl StatusSink for RegistryEndpoint {
    async fn update_status(&self, info: RegionInfo, timestamp: u64) -> DkvResult<()> {
        self.registry.update_status(info, timestamp)
    }
}

#[tonic::async_trait]
impl ClusterInfoSource for RegistryEndpoint {
    async fn fetch(&self, filter: &ClusterInfoFilter) -> DkvResult<Vec<RegionInfo>> {
        Ok(self.registry.cluster_info(&RegionFilter {
            dc_id: filter.dc_id.clone(),
            database: filter.database.clone(),
            vbucket: filter.vbucket,
        }))
    }
}

// ============================================================================
// Registry end-to-end
// ============================================================================

#[test]
fn shard_view_tracks_heartbeats_and_expiry() {
    let registry = DiscoveryRegistry::new(Duration::from_millis(60));
    let now = now_epoch_millis();

    let leader = region("A", "D", 0, "leader:7070", RegionStatus::Leader);
    let follower = region("A", "D", 0, "pf:7070", RegionStatus::PrimaryFollower);
    let slave = region("A", "D", 0, "slave:7070", RegionStatus::ActiveSlave);

    registry.update_status(leader.clone(), now).unwrap();
    registry.update_status(follower.clone(), now).unwrap();
    registry.update_status(slave.clone(), now).unwrap();

    let filter = RegionFilter {
        dc_id: Some("A".to_string()),
        database: Some("D".to_string()),
        vbucket: Some(0),
    };
    let regions = registry.cluster_info(&filter);
    assert_eq!(regions.len(), 3);

    // The leader and follower keep heartbeating; the slave goes quiet.
    std::thread::sleep(Duration::from_millis(40));
    let now = now_epoch_millis();
    registry.update_status(leader, now).unwrap();
    registry.update_status(follower, now).unwrap();
    std::thread::sleep(Duration::from_millis(40));

    let regions = registry.cluster_info(&filter);
    let addresses: Vec<&str> = regions.iter().map(|r| r.node_address.as_str()).collect();
    assert_eq!(addresses, vec!["leader:7070", "pf:7070"]);
}

// ============================================================================
// Heartbeat loop
// ============================================================================

#[tokio::test]
async fn member_heartbeats_advertise_the_derived_role() {
    let registry = Arc::new(DiscoveryRegistry::new(Duration::from_secs(10)));
    let nexus = Arc::new(NexusCluster::bootstrap([
        ("http://n1:7071".to_string(), "dc-a".to_string()),
        ("http://n2:7071".to_string(), "dc-a".to_string()),
    ]));
    let controller = Arc::new(ClusterController::new(nexus.clone(), 1, "dc-a"));

    let node = NodeConfig {
        listen_addr: "127.0.0.1:7070".to_string(),
        role: dkv::config::NodeRole::Master,
        dc_id: "dc-a".to_string(),
        database: "D".to_string(),
        vbucket: 0,
    };
    let reporter = Arc::new(dkv::heartbeat::MemberRegionReporter::new(
        node,
        "http://n1:7071,http://n2:7071".to_string(),
        controller,
    ));
    let sink = Arc::new(RegistryEndpoint {
        registry: registry.clone(),
    });
    let heartbeater = Heartbeater::new(reporter, sink, Duration::from_millis(50));

    heartbeater.beat_once().await.unwrap();
    let regions = registry.cluster_info(&RegionFilter::default());
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].status(), RegionStatus::Leader);
    assert_eq!(regions[0].nexus_cluster_url, "http://n1:7071,http://n2:7071");

    // Leadership moves; the next beat advertises the new role.
    nexus.elect(2).unwrap();
    heartbeater.beat_once().await.unwrap();
    let regions = registry.cluster_info(&RegionFilter::default());
    assert_eq!(regions[0].status(), RegionStatus::PrimaryFollower);
}

// ============================================================================
// Client + router over discovery output
// ============================================================================

#[tokio::test]
async fn clients_route_by_consistency_level() {
    let registry = Arc::new(DiscoveryRegistry::new(Duration::from_secs(10)));
    let now = now_epoch_millis();
    registry
        .update_status(region("A", "D", 0, "leader:7070", RegionStatus::Leader), now)
        .unwrap();
    registry
        .update_status(
            region("B", "D", 0, "pf-b:7070", RegionStatus::PrimaryFollower),
            now,
        )
        .unwrap();
    registry
        .update_status(
            region("B", "D", 0, "slave-b:7070", RegionStatus::ActiveSlave),
            now,
        )
        .unwrap();
    registry
        .update_status(
            region("A", "D", 1, "other-shard:7070", RegionStatus::Leader),
            now,
        )
        .unwrap();

    let source = Arc::new(RegistryEndpoint {
        registry: registry.clone(),
    });
    let client = DiscoveryClient::new(source, Duration::from_millis(1));

    let shard = client
        .cluster_info(&ClusterInfoFilter::shard("D", 0))
        .await
        .unwrap();
    assert_eq!(shard.len(), 3, "other shards must not leak into the view");

    // Reads route per consistency level from the client's DC.
    let linearizable =
        select_read_target(&shard, ConsistencyLevel::Linearizable, "B").unwrap();
    assert_eq!(linearizable.node_address, "leader:7070");

    let sequential = select_read_target(&shard, ConsistencyLevel::Sequential, "B").unwrap();
    assert_eq!(sequential.node_address, "pf-b:7070");

    let eventual = select_read_target(&shard, ConsistencyLevel::Eventual, "B").unwrap();
    assert_eq!(eventual.node_address, "slave-b:7070");

    // Writes go to the leader, and master lookup agrees.
    assert_eq!(select_write_target(&shard).unwrap().node_address, "leader:7070");
    let master = client.locate_master("D", 0, "B").await.unwrap();
    assert_eq!(master.node_address, "leader:7070");
}

#[tokio::test]
async fn leader_switchover_is_visible_after_cache_refresh() {
    let registry = Arc::new(DiscoveryRegistry::new(Duration::from_secs(10)));
    registry
        .update_status(
            region("A", "D", 0, "old-leader:7070", RegionStatus::Leader),
            1,
        )
        .unwrap();

    let source = Arc::new(RegistryEndpoint {
        registry: registry.clone(),
    });
    let client = DiscoveryClient::new(source, Duration::from_secs(60));

    let master = client.locate_master("D", 0, "A").await.unwrap();
    assert_eq!(master.node_address, "old-leader:7070");

    // The old leader demotes and a new one reports in.
    registry
        .update_status(
            region("A", "D", 0, "old-leader:7070", RegionStatus::SecondaryFollower),
            2,
        )
        .unwrap();
    registry
        .update_status(
            region("A", "D", 0, "new-leader:7070", RegionStatus::Leader),
            2,
        )
        .unwrap();

    // The cached view still names the old leader until invalidated, which
    // is what the NotLeader retry path does.
    let master = client.locate_master("D", 0, "A").await.unwrap();
    assert_eq!(master.node_address, "old-leader:7070");

    client.invalidate();
    let master = client.locate_master("D", 0, "A").await.unwrap();
    assert_eq!(master.node_address, "new-leader:7070");
}
