//! Unary gRPC clients and the adapters that plug them into the
//! replication and discovery loops.
//!
//! Clients speak the hand-written proto messages through tonic's generic
//! unary path. Transport failures map to `Unreachable`; server-side
//! failures come back through the Status envelope and are rebuilt into the
//! originating error taxonomy.

use prost::Message;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::core::config::NodeConfig;
use crate::core::error::{error_from_status, DkvError, DkvResult};
use crate::discovery::{ClusterInfoFilter, ClusterInfoSource, DiscoveryClient, StatusSink};
use crate::replication::{ChangeBatch, ChangeSource, SlaveProgress};
use crate::rpc::proto;

/// Lazily connected channel to one peer.
#[derive(Clone)]
pub struct RpcChannel {
    channel: Channel,
}

impl RpcChannel {
    /// Create a channel; the connection is established on first use.
    pub fn connect(addr: &str) -> DkvResult<Self> {
        let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| DkvError::unreachable(format!("invalid address {}: {}", addr, e)))?
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(10));
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, req: Req) -> DkvResult<Resp>
    where
        Req: Message + Send + Sync + 'static,
        Resp: Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| DkvError::unreachable(format!("connect failed: {}", e)))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        grpc.unary(Request::new(req), PathAndQuery::from_static(path), codec)
            .await
            .map(|resp| resp.into_inner())
            .map_err(|status| {
                DkvError::unreachable(format!("{}: {}", status.code(), status.message()))
            })
    }
}

/// Raise a non-OK envelope status as its originating error.
fn check_status(status: &Option<proto::Status>) -> DkvResult<()> {
    match status {
        Some(s) if !s.is_ok() => Err(error_from_status(s.code, &s.message)),
        _ => Ok(()),
    }
}

// ============================================================================
// Per-surface clients
// ============================================================================

/// Client for the dkv.Replication surface.
#[derive(Clone)]
pub struct ReplicationClient {
    channel: RpcChannel,
}

impl ReplicationClient {
    pub fn connect(addr: &str) -> DkvResult<Self> {
        Ok(Self {
            channel: RpcChannel::connect(addr)?,
        })
    }

    pub async fn get_changes(&self, from: u64, max: u32) -> DkvResult<ChangeBatch> {
        let resp: proto::GetChangesResponse = self
            .channel
            .unary(
                "/dkv.Replication/GetChanges",
                proto::GetChangesRequest {
                    from_change_number: from,
                    max_number_of_changes: max,
                },
            )
            .await?;
        check_status(&resp.status)?;
        Ok(ChangeBatch {
            master_change_number: resp.master_change_number,
            changes: resp.changes,
        })
    }

    pub async fn add_replica(&self, replica: proto::Replica) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary("/dkv.Replication/AddReplica", replica)
            .await?;
        check_status(&Some(status))
    }

    pub async fn remove_replica(&self, replica: proto::Replica) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary("/dkv.Replication/RemoveReplica", replica)
            .await?;
        check_status(&Some(status))
    }

    pub async fn get_replicas(&self, zone: Option<&str>) -> DkvResult<Vec<proto::Replica>> {
        let resp: proto::GetReplicasResponse = self
            .channel
            .unary(
                "/dkv.Replication/GetReplicas",
                proto::GetReplicasRequest {
                    zone: zone.unwrap_or_default().to_string(),
                },
            )
            .await?;
        check_status(&resp.status)?;
        Ok(resp.replicas)
    }
}

/// Client for the dkv.Maintenance surface.
#[derive(Clone)]
pub struct MaintenanceClient {
    channel: RpcChannel,
}

impl MaintenanceClient {
    pub fn connect(addr: &str) -> DkvResult<Self> {
        Ok(Self {
            channel: RpcChannel::connect(addr)?,
        })
    }

    pub async fn backup(&self, backup_path: &str) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary(
                "/dkv.Maintenance/Backup",
                proto::BackupRequest {
                    backup_path: backup_path.to_string(),
                },
            )
            .await?;
        check_status(&Some(status))
    }

    pub async fn restore(&self, restore_path: &str) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary(
                "/dkv.Maintenance/Restore",
                proto::RestoreRequest {
                    restore_path: restore_path.to_string(),
                },
            )
            .await?;
        check_status(&Some(status))
    }

    pub async fn get_status(&self) -> DkvResult<proto::RegionInfo> {
        self.channel
            .unary("/dkv.Maintenance/GetStatus", proto::GetStatusRequest {})
            .await
    }
}

/// Client for the dkv.Cluster surface.
#[derive(Clone)]
pub struct ClusterClient {
    channel: RpcChannel,
}

impl ClusterClient {
    pub fn connect(addr: &str) -> DkvResult<Self> {
        Ok(Self {
            channel: RpcChannel::connect(addr)?,
        })
    }

    pub async fn add_node(&self, node_url: &str) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary(
                "/dkv.Cluster/AddNode",
                proto::AddNodeRequest {
                    node_url: node_url.to_string(),
                },
            )
            .await?;
        check_status(&Some(status))
    }

    pub async fn remove_node(&self, node_url: &str) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary(
                "/dkv.Cluster/RemoveNode",
                proto::RemoveNodeRequest {
                    node_url: node_url.to_string(),
                },
            )
            .await?;
        check_status(&Some(status))
    }

    pub async fn list_nodes(&self) -> DkvResult<(u64, Vec<proto::NodeInfo>)> {
        let resp: proto::ListNodesResponse = self
            .channel
            .unary("/dkv.Cluster/ListNodes", proto::ListNodesRequest {})
            .await?;
        check_status(&resp.status)?;
        Ok((resp.leader, resp.nodes))
    }
}

/// Client for the dkv.Discovery surface.
#[derive(Clone)]
pub struct DiscoveryRpc {
    channel: RpcChannel,
}

impl DiscoveryRpc {
    pub fn connect(addr: &str) -> DkvResult<Self> {
        Ok(Self {
            channel: RpcChannel::connect(addr)?,
        })
    }

    pub async fn update_status(&self, info: proto::RegionInfo, timestamp: u64) -> DkvResult<()> {
        let status: proto::Status = self
            .channel
            .unary(
                "/dkv.Discovery/UpdateStatus",
                proto::UpdateStatusRequest {
                    region_info: Some(info),
                    timestamp,
                },
            )
            .await?;
        check_status(&Some(status))
    }

    pub async fn get_cluster_info(
        &self,
        filter: &ClusterInfoFilter,
    ) -> DkvResult<Vec<proto::RegionInfo>> {
        let resp: proto::GetClusterInfoResponse = self
            .channel
            .unary(
                "/dkv.Discovery/GetClusterInfo",
                proto::GetClusterInfoRequest {
                    dc_id: filter.dc_id.clone().unwrap_or_default(),
                    database: filter.database.clone().unwrap_or_default(),
                    vbucket_filter: filter.vbucket,
                },
            )
            .await?;
        check_status(&resp.status)?;
        Ok(resp.region_infos)
    }
}

// ============================================================================
// Loop adapters
// ============================================================================

/// Fans discovery calls across the configured endpoints, trying each until
/// one answers.
pub struct DiscoveryEndpoints {
    clients: Vec<DiscoveryRpc>,
}

impl DiscoveryEndpoints {
    pub fn connect(endpoints: &[String]) -> DkvResult<Self> {
        if endpoints.is_empty() {
            return Err(DkvError::invalid("no discovery endpoints configured"));
        }
        let clients = endpoints
            .iter()
            .map(|addr| DiscoveryRpc::connect(addr))
            .collect::<DkvResult<Vec<_>>>()?;
        Ok(Self { clients })
    }
}

#[tonic::async_trait]
impl StatusSink for DiscoveryEndpoints {
    async fn update_status(&self, info: proto::RegionInfo, timestamp: u64) -> DkvResult<()> {
        let mut last_err = DkvError::unreachable("no discovery endpoints");
        for client in &self.clients {
            match client.update_status(info.clone(), timestamp).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

#[tonic::async_trait]
impl ClusterInfoSource for DiscoveryEndpoints {
    async fn fetch(&self, filter: &ClusterInfoFilter) -> DkvResult<Vec<proto::RegionInfo>> {
        let mut last_err = DkvError::unreachable("no discovery endpoints");
        for client in &self.clients {
            match client.get_cluster_info(filter).await {
                Ok(regions) => return Ok(regions),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

/// The slave puller's change source: re-resolves the shard's LEADER via
/// discovery on every call, so a switchover is picked up on the next pull.
pub struct RpcChangeSource {
    discovery: Arc<DiscoveryClient>,
    node: NodeConfig,
    progress: Arc<SlaveProgress>,
    // Channel per master address; masters move rarely, connections are
    // reused across pulls.
    masters: Mutex<HashMap<String, ReplicationClient>>,
}

impl RpcChangeSource {
    pub fn new(
        discovery: Arc<DiscoveryClient>,
        node: NodeConfig,
        progress: Arc<SlaveProgress>,
    ) -> Self {
        Self {
            discovery,
            node,
            progress,
            masters: Mutex::new(HashMap::new()),
        }
    }

    /// This slave's identity in a master's replica registry.
    fn replica_identity(&self) -> proto::Replica {
        let (hostname, port) = match self.node.listen_addr.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
            None => (self.node.listen_addr.clone(), 0),
        };
        proto::Replica {
            zone: self.node.dc_id.clone(),
            hostname,
            port,
        }
    }

    async fn current_master(&self) -> DkvResult<(String, ReplicationClient)> {
        let master = self
            .discovery
            .locate_master(&self.node.database, self.node.vbucket, &self.node.dc_id)
            .await?;
        let addr = master.node_address;
        let (client, fresh) = {
            let mut masters = self.masters.lock();
            match masters.get(&addr) {
                Some(client) => (client.clone(), false),
                None => {
                    let client = ReplicationClient::connect(&addr)?;
                    masters.insert(addr.clone(), client.clone());
                    (client, true)
                }
            }
        };
        if fresh {
            // Register with the new master; re-adding is idempotent and
            // refreshes our last-seen timestamp, so best effort is enough.
            if let Err(e) = client.add_replica(self.replica_identity()).await {
                tracing::warn!(master = %addr, error = %e, "replica registration failed");
            }
            self.progress.set_master_host(&addr);
        }
        Ok((addr, client))
    }
}

#[tonic::async_trait]
impl ChangeSource for RpcChangeSource {
    async fn get_changes(&self, from: u64, max: u32) -> DkvResult<ChangeBatch> {
        let (addr, client) = self.current_master().await?;
        match client.get_changes(from, max).await {
            Ok(batch) => Ok(batch),
            Err(e) => {
                // A demoted or dead master invalidates the discovery view;
                // the next pull re-selects.
                if matches!(
                    e,
                    DkvError::NotLeader { .. } | DkvError::Unreachable { .. }
                ) {
                    tracing::info!(master = %addr, error = %e, "dropping master; will re-select");
                    self.discovery.invalidate();
                    self.masters.lock().remove(&addr);
                }
                Err(e)
            }
        }
    }

    async fn request_snapshot(&self, path: &Path) -> DkvResult<()> {
        let (addr, _) = self.current_master().await?;
        let maintenance = MaintenanceClient::connect(&addr)?;
        maintenance
            .backup(&path.to_string_lossy())
            .await
    }
}
