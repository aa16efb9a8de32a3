//! gRPC server for the DKV surfaces.
//!
//! Services are implemented directly against tonic's transport (no
//! codegen): each service matches on the request path, decodes the message
//! with the hand-written proto impls, and answers with the Status envelope.
//! Per-request failures travel inside the envelope; only undecodable
//! requests and unknown methods surface as transport-level errors.

use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use prost::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tonic::codegen::http::{header, StatusCode};
use tonic::Status;

use crate::cluster::ClusterController;
use crate::core::error::DkvError;
use crate::discovery::registry::RegionFilter;
use crate::discovery::{DiscoveryRegistry, RegionReporter};
use crate::replication::{ChangeFeed, ReplicaRegistry};
use crate::rpc::proto;
use crate::storage::{KvStore, StorageEngine};

// ============================================================================
// Replication service
// ============================================================================

/// Serves the change feed and the replica registry.
#[derive(Clone)]
pub struct ReplicationService {
    feed: Arc<ChangeFeed>,
    replicas: Arc<ReplicaRegistry>,
    controller: Arc<ClusterController>,
}

impl ReplicationService {
    pub fn new(
        feed: Arc<ChangeFeed>,
        replicas: Arc<ReplicaRegistry>,
        controller: Arc<ClusterController>,
    ) -> Self {
        Self {
            feed,
            replicas,
            controller,
        }
    }

    fn get_changes(&self, req: proto::GetChangesRequest) -> proto::GetChangesResponse {
        // Only the elected leader serves the replication stream; a slave
        // pulling from a demoted master re-selects via discovery.
        let local = self.controller.local_node_id();
        if !self.controller.nexus().is_leader(local) {
            let err = DkvError::NotLeader {
                leader_hint: self.controller.nexus().leader().unwrap_or(0),
            };
            return proto::GetChangesResponse {
                status: Some(proto::Status::from_error(&err)),
                ..Default::default()
            };
        }

        match self
            .feed
            .get_changes(req.from_change_number, req.max_number_of_changes)
        {
            Ok(batch) => proto::GetChangesResponse {
                status: Some(proto::Status::ok()),
                master_change_number: batch.master_change_number,
                number_of_changes: batch.changes.len() as u32,
                changes: batch.changes,
            },
            Err(e) => proto::GetChangesResponse {
                status: Some(proto::Status::from_error(&e)),
                ..Default::default()
            },
        }
    }

    fn add_replica(&self, replica: proto::Replica) -> proto::Status {
        match self.replicas.add(replica) {
            Ok(()) => proto::Status::ok(),
            Err(e) => proto::Status::from_error(&e),
        }
    }

    fn remove_replica(&self, replica: proto::Replica) -> proto::Status {
        self.replicas.remove(&replica);
        proto::Status::ok()
    }

    fn get_replicas(&self, req: proto::GetReplicasRequest) -> proto::GetReplicasResponse {
        let zone = if req.zone.is_empty() {
            None
        } else {
            Some(req.zone.as_str())
        };
        proto::GetReplicasResponse {
            status: Some(proto::Status::ok()),
            replicas: self.replicas.list(zone),
        }
    }
}

impl tonic::server::NamedService for ReplicationService {
    const NAME: &'static str = "dkv.Replication";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for ReplicationService
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let inner = self.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let body = match collect_unary_body(req.into_body()).await {
                Ok(body) => body,
                Err(status) => return Ok(grpc_error_response(status)),
            };
            tracing::debug!(path = %path, body_len = body.len(), "replication request");

            let response = match path.as_str() {
                "/dkv.Replication/GetChanges" => {
                    unary(&body, |req| Ok(inner.get_changes(req)))
                }
                "/dkv.Replication/AddReplica" => {
                    unary(&body, |replica| Ok(inner.add_replica(replica)))
                }
                "/dkv.Replication/RemoveReplica" => {
                    unary(&body, |replica| Ok(inner.remove_replica(replica)))
                }
                "/dkv.Replication/GetReplicas" => {
                    unary(&body, |req| Ok(inner.get_replicas(req)))
                }
                _ => Err(Status::unimplemented(format!("unknown method: {}", path))),
            };

            Ok(match response {
                Ok(resp) => resp,
                Err(status) => grpc_error_response(status),
            })
        })
    }
}

// ============================================================================
// Maintenance service
// ============================================================================

/// Backup/restore plus the per-node GetStatus used by discovery to
/// reconcile.
#[derive(Clone)]
pub struct MaintenanceService {
    store: Arc<dyn StorageEngine>,
    reporter: Arc<dyn RegionReporter>,
}

impl MaintenanceService {
    pub fn new(store: Arc<dyn StorageEngine>, reporter: Arc<dyn RegionReporter>) -> Self {
        Self { store, reporter }
    }

    fn backup(&self, req: proto::BackupRequest) -> proto::Status {
        if req.backup_path.is_empty() {
            return proto::Status::from_error(&DkvError::invalid("empty backup path"));
        }
        match self.store.backup(std::path::Path::new(&req.backup_path)) {
            Ok(()) => proto::Status::ok(),
            Err(e) => proto::Status::from_error(&e),
        }
    }

    fn restore(&self, req: proto::RestoreRequest) -> proto::Status {
        if req.restore_path.is_empty() {
            return proto::Status::from_error(&DkvError::invalid("empty restore path"));
        }
        match self.store.restore(std::path::Path::new(&req.restore_path)) {
            Ok(()) => proto::Status::ok(),
            Err(e) => proto::Status::from_error(&e),
        }
    }

    fn get_status(&self) -> proto::RegionInfo {
        self.reporter.current_region()
    }
}

impl tonic::server::NamedService for MaintenanceService {
    const NAME: &'static str = "dkv.Maintenance";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for MaintenanceService
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let inner = self.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let body = match collect_unary_body(req.into_body()).await {
                Ok(body) => body,
                Err(status) => return Ok(grpc_error_response(status)),
            };
            tracing::debug!(path = %path, body_len = body.len(), "maintenance request");

            let response = match path.as_str() {
                "/dkv.Maintenance/Backup" => unary(&body, |req| Ok(inner.backup(req))),
                "/dkv.Maintenance/Restore" => unary(&body, |req| Ok(inner.restore(req))),
                "/dkv.Maintenance/GetStatus" => {
                    unary(&body, |_req: proto::GetStatusRequest| Ok(inner.get_status()))
                }
                _ => Err(Status::unimplemented(format!("unknown method: {}", path))),
            };

            Ok(match response {
                Ok(resp) => resp,
                Err(status) => grpc_error_response(status),
            })
        })
    }
}

// ============================================================================
// Cluster service
// ============================================================================

/// Membership surface over the cluster controller.
#[derive(Clone)]
pub struct ClusterService {
    controller: Arc<ClusterController>,
}

impl ClusterService {
    pub fn new(controller: Arc<ClusterController>) -> Self {
        Self { controller }
    }

    fn add_node(&self, req: proto::AddNodeRequest) -> proto::Status {
        match self.controller.add_node(&req.node_url) {
            Ok(node_id) => {
                tracing::info!(node_id, url = %req.node_url, "node added");
                proto::Status::ok()
            }
            Err(e) => proto::Status::from_error(&e),
        }
    }

    fn remove_node(&self, req: proto::RemoveNodeRequest) -> proto::Status {
        match self.controller.remove_node(&req.node_url) {
            Ok(node_id) => {
                tracing::info!(node_id, url = %req.node_url, "node removed");
                proto::Status::ok()
            }
            Err(e) => proto::Status::from_error(&e),
        }
    }

    fn list_nodes(&self) -> proto::ListNodesResponse {
        let (leader, nodes) = self.controller.list_nodes();
        proto::ListNodesResponse {
            status: Some(proto::Status::ok()),
            leader,
            nodes,
        }
    }
}

impl tonic::server::NamedService for ClusterService {
    const NAME: &'static str = "dkv.Cluster";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for ClusterService
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let inner = self.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let body = match collect_unary_body(req.into_body()).await {
                Ok(body) => body,
                Err(status) => return Ok(grpc_error_response(status)),
            };
            tracing::debug!(path = %path, body_len = body.len(), "cluster request");

            let response = match path.as_str() {
                "/dkv.Cluster/AddNode" => unary(&body, |req| Ok(inner.add_node(req))),
                "/dkv.Cluster/RemoveNode" => unary(&body, |req| Ok(inner.remove_node(req))),
                "/dkv.Cluster/ListNodes" => {
                    unary(&body, |_req: proto::ListNodesRequest| Ok(inner.list_nodes()))
                }
                _ => Err(Status::unimplemented(format!("unknown method: {}", path))),
            };

            Ok(match response {
                Ok(resp) => resp,
                Err(status) => grpc_error_response(status),
            })
        })
    }
}

// ============================================================================
// Discovery service
// ============================================================================

/// Heartbeat intake and cluster-info lookups.
#[derive(Clone)]
pub struct DiscoveryService {
    registry: Arc<DiscoveryRegistry>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<DiscoveryRegistry>) -> Self {
        Self { registry }
    }

    fn update_status(&self, req: proto::UpdateStatusRequest) -> proto::Status {
        let Some(info) = req.region_info else {
            return proto::Status::from_error(&DkvError::invalid("missing region info"));
        };
        match self.registry.update_status(info, req.timestamp) {
            Ok(()) => proto::Status::ok(),
            // Stale heartbeats are reordering noise, dropped silently.
            Err(DkvError::StaleUpdate { incoming, stored }) => {
                tracing::debug!(incoming, stored, "dropped stale heartbeat");
                proto::Status::ok()
            }
            Err(e) => proto::Status::from_error(&e),
        }
    }

    fn get_cluster_info(&self, req: proto::GetClusterInfoRequest) -> proto::GetClusterInfoResponse {
        let filter = RegionFilter {
            dc_id: non_empty(req.dc_id),
            database: non_empty(req.database),
            vbucket: req.vbucket_filter,
        };
        proto::GetClusterInfoResponse {
            status: Some(proto::Status::ok()),
            region_infos: self.registry.cluster_info(&filter),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl tonic::server::NamedService for DiscoveryService {
    const NAME: &'static str = "dkv.Discovery";
}

impl<B> tonic::codegen::Service<tonic::codegen::http::Request<B>> for DiscoveryService
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    type Response = tonic::codegen::http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: tonic::codegen::http::Request<B>) -> Self::Future {
        let inner = self.clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let body = match collect_unary_body(req.into_body()).await {
                Ok(body) => body,
                Err(status) => return Ok(grpc_error_response(status)),
            };
            tracing::debug!(path = %path, body_len = body.len(), "discovery request");

            let response = match path.as_str() {
                "/dkv.Discovery/UpdateStatus" => {
                    unary(&body, |req| Ok(inner.update_status(req)))
                }
                "/dkv.Discovery/GetClusterInfo" => {
                    unary(&body, |req| Ok(inner.get_cluster_info(req)))
                }
                _ => Err(Status::unimplemented(format!("unknown method: {}", path))),
            };

            Ok(match response {
                Ok(resp) => resp,
                Err(status) => grpc_error_response(status),
            })
        })
    }
}

// ============================================================================
// Server assembly
// ============================================================================

/// The node's gRPC listener. Which services are mounted depends on the
/// role the runtime assembled.
pub struct DkvGrpcServer {
    bind_addr: SocketAddr,
    replication: Option<ReplicationService>,
    maintenance: Option<MaintenanceService>,
    cluster: Option<ClusterService>,
    discovery: Option<DiscoveryService>,
}

impl DkvGrpcServer {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            replication: None,
            maintenance: None,
            cluster: None,
            discovery: None,
        }
    }

    pub fn with_replication(mut self, service: ReplicationService) -> Self {
        self.replication = Some(service);
        self
    }

    pub fn with_maintenance(mut self, service: MaintenanceService) -> Self {
        self.maintenance = Some(service);
        self
    }

    pub fn with_cluster(mut self, service: ClusterService) -> Self {
        self.cluster = Some(service);
        self
    }

    pub fn with_discovery(mut self, service: DiscoveryService) -> Self {
        self.discovery = Some(service);
        self
    }

    /// Serve until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), DkvError> {
        let addr = self.bind_addr;
        tracing::info!(%addr, "starting gRPC listener");

        tonic::transport::Server::builder()
            .add_optional_service(self.replication)
            .add_optional_service(self.maintenance)
            .add_optional_service(self.cluster)
            .add_optional_service(self.discovery)
            .serve_with_shutdown(addr, async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                tracing::info!("gRPC listener shutting down");
            })
            .await
            .map_err(|e| DkvError::unreachable(format!("gRPC server error: {}", e)))
    }
}

// ============================================================================
// gRPC framing helpers
// ============================================================================

/// Decode one request and encode the handler's response, with gRPC framing
/// on both sides.
fn unary<Req, Resp, F>(
    body: &Bytes,
    handler: F,
) -> Result<tonic::codegen::http::Response<tonic::body::BoxBody>, Status>
where
    Req: Message + Default,
    Resp: Message,
    F: FnOnce(Req) -> Result<Resp, Status>,
{
    let req = decode_grpc_message::<Req>(body)?;
    let resp = handler(req)?;
    Ok(grpc_response(encode_grpc_message(&resp)))
}

/// Read the single message of a unary request off the body stream.
async fn collect_unary_body<B>(body: B) -> Result<Bytes, Status>
where
    B: tonic::codegen::Body + Send + 'static,
    B::Data: Into<Bytes> + Send,
    B::Error: Into<tonic::codegen::StdError> + Send + 'static,
{
    let mut data = BytesMut::new();
    let mut pinned = std::pin::pin!(body);

    loop {
        match pinned.as_mut().frame().await {
            Some(Ok(frame)) => {
                if frame.is_data() {
                    if let Ok(chunk) = frame.into_data() {
                        data.extend_from_slice(&chunk.into());
                        // gRPC frame: 1-byte flag + 4-byte length + message.
                        if data.len() >= 5 {
                            let len =
                                u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
                            if data.len() >= 5 + len {
                                break;
                            }
                        }
                    }
                } else if frame.is_trailers() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e.into(), "failed to read request body");
                return Err(Status::internal("failed to read request body"));
            }
            None => break,
        }
    }

    Ok(data.freeze())
}

/// Decode a gRPC message from body bytes (strips the 5-byte header).
fn decode_grpc_message<M: Message + Default>(body: &Bytes) -> Result<M, Status> {
    if body.len() < 5 {
        return Err(Status::invalid_argument("gRPC message too short"));
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if body.len() < 5 + len {
        return Err(Status::invalid_argument(format!(
            "gRPC message truncated: expected {} bytes, got {}",
            len,
            body.len() - 5
        )));
    }
    let msg_bytes = &body[5..5 + len];
    M::decode(msg_bytes).map_err(|e| Status::invalid_argument(format!("decode error: {}", e)))
}

/// Encode a gRPC message to bytes (adds the 5-byte header).
fn encode_grpc_message<M: Message>(msg: &M) -> Bytes {
    let encoded = msg.encode_to_vec();
    let mut buf = BytesMut::with_capacity(5 + encoded.len());
    buf.put_u8(0); // not compressed
    buf.put_u32(encoded.len() as u32);
    buf.put_slice(&encoded);
    buf.freeze()
}

/// A gRPC body that includes trailers with grpc-status.
struct GrpcBody {
    data: Option<Bytes>,
    trailers_sent: bool,
}

impl http_body::Body for GrpcBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        if let Some(data) = self.data.take() {
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::data(data))));
        }
        if !self.trailers_sent {
            self.trailers_sent = true;
            let mut trailers = tonic::codegen::http::HeaderMap::new();
            trailers.insert("grpc-status", "0".parse().expect("static header value"));
            return std::task::Poll::Ready(Some(Ok(http_body::Frame::trailers(trailers))));
        }
        std::task::Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none() && self.trailers_sent
    }
}

/// Build a gRPC response with proper headers and trailers.
fn grpc_response(body: Bytes) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    let grpc_body = GrpcBody {
        data: Some(body),
        trailers_sent: false,
    };

    tonic::codegen::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/grpc")
        .body(tonic::body::BoxBody::new(grpc_body))
        .expect("static response parts")
}

/// Build a gRPC error response.
fn grpc_error_response(status: Status) -> tonic::codegen::http::Response<tonic::body::BoxBody> {
    status.into_http()
}
