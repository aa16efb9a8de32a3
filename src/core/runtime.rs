//! Role-driven runtime orchestration.
//!
//! The runtime assembles components for the configured role and owns their
//! lifecycle:
//!
//! - master/standalone: storage → consensus facade → change feed →
//!   heartbeater → gRPC listener (replication + maintenance + cluster)
//! - slave: storage → discovery client → puller task → heartbeater →
//!   gRPC listener (maintenance)
//! - discovery: region registry → gRPC listener (discovery)
//!
//! Shutdown flows through one watch channel into every loop and the
//! listener.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cluster::{ClusterController, NexusCluster};
use crate::core::config::{Config, NodeRole};
use crate::discovery::heartbeat::{MemberRegionReporter, SlaveRegionReporter};
use crate::discovery::{DiscoveryClient, DiscoveryRegistry, Heartbeater, RegionReporter};
use crate::replication::{ChangeFeed, ReplicaRegistry, SlaveLoop, SlaveProgress};
use crate::rpc::client::{DiscoveryEndpoints, RpcChangeSource};
use crate::rpc::server::{
    ClusterService, DiscoveryService, DkvGrpcServer, MaintenanceService, ReplicationService,
};
use crate::storage::{open_engine, StorageEngine};

/// A running DKV node.
pub struct Runtime {
    config: Arc<Config>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
    server_handle: Option<JoinHandle<()>>,
    store: Option<Arc<dyn StorageEngine>>,
}

impl Runtime {
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
            server_handle: None,
            store: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The storage engine, once started (absent on discovery nodes).
    pub fn store(&self) -> Option<&Arc<dyn StorageEngine>> {
        self.store.as_ref()
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Assemble and start every component for the configured role.
    pub async fn start(&mut self) -> Result<()> {
        let role = self.config.node.role;
        tracing::info!(
            role = %role,
            listen_addr = %self.config.node.listen_addr,
            dc_id = %self.config.node.dc_id,
            "starting DKV node"
        );

        let bind_addr: SocketAddr = self
            .config
            .node
            .listen_addr
            .parse()
            .context("invalid listen address")?;

        let server = match role {
            NodeRole::Master | NodeRole::Standalone => self.assemble_master(bind_addr)?,
            NodeRole::Slave => self.assemble_slave(bind_addr)?,
            NodeRole::Discovery => self.assemble_discovery(bind_addr),
        };

        let shutdown_rx = self.shutdown_rx.clone();
        self.server_handle = Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown_rx).await {
                tracing::error!(error = %e, "gRPC listener failed");
            }
        }));

        tracing::info!("DKV node started");
        Ok(())
    }

    fn assemble_master(&mut self, bind_addr: SocketAddr) -> Result<DkvGrpcServer> {
        let store = open_engine(&self.config.storage)?;
        self.store = Some(store.clone());

        let nexus = Arc::new(NexusCluster::bootstrap(self.bootstrap_members()));
        let self_url = self.self_nexus_url();
        let local_node_id = nexus
            .member_by_url(&self_url)
            .map(|m| m.node_id)
            .context("this node's nexus_node_url is not in the bootstrap member set")?;
        let controller = Arc::new(ClusterController::new(
            nexus,
            local_node_id,
            self.config.node.dc_id.clone(),
        ));

        let reporter: Arc<dyn RegionReporter> = Arc::new(MemberRegionReporter::new(
            self.config.node.clone(),
            self.config.cluster.nexus_cluster_url.clone(),
            controller.clone(),
        ));
        self.spawn_heartbeater(reporter.clone())?;

        let feed = Arc::new(ChangeFeed::new(store.clone()));
        let replicas = Arc::new(ReplicaRegistry::new());

        Ok(DkvGrpcServer::new(bind_addr)
            .with_replication(ReplicationService::new(feed, replicas, controller.clone()))
            .with_maintenance(MaintenanceService::new(store, reporter))
            .with_cluster(ClusterService::new(controller)))
    }

    fn assemble_slave(&mut self, bind_addr: SocketAddr) -> Result<DkvGrpcServer> {
        let store = open_engine(&self.config.storage)?;
        self.store = Some(store.clone());

        let endpoints = Arc::new(DiscoveryEndpoints::connect(&self.config.discovery.endpoints)?);
        let discovery = Arc::new(DiscoveryClient::new(
            endpoints.clone(),
            Duration::from_millis(self.config.discovery.cache_ttl_ms),
        ));

        let progress = Arc::new(SlaveProgress::new());
        let source = Arc::new(RpcChangeSource::new(
            discovery,
            self.config.node.clone(),
            progress.clone(),
        ));
        let puller = SlaveLoop::new(
            store.clone(),
            source,
            progress.clone(),
            Path::new(&self.config.storage.db_folder),
            self.config.replication.clone(),
        )?;
        let shutdown_rx = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(puller.run(shutdown_rx)));

        let reporter: Arc<dyn RegionReporter> = Arc::new(SlaveRegionReporter::new(
            self.config.node.clone(),
            progress,
        ));
        self.spawn_heartbeater(reporter.clone())?;

        Ok(DkvGrpcServer::new(bind_addr)
            .with_maintenance(MaintenanceService::new(store, reporter)))
    }

    fn assemble_discovery(&mut self, bind_addr: SocketAddr) -> DkvGrpcServer {
        let registry = Arc::new(DiscoveryRegistry::new(Duration::from_secs(
            self.config.discovery.region_ttl_secs,
        )));
        DkvGrpcServer::new(bind_addr).with_discovery(DiscoveryService::new(registry))
    }

    /// Heartbeat to discovery when endpoints are configured; a node with
    /// none (single-node development setups) simply stays unadvertised.
    fn spawn_heartbeater(&mut self, reporter: Arc<dyn RegionReporter>) -> Result<()> {
        if self.config.discovery.endpoints.is_empty() {
            tracing::warn!("no discovery endpoints configured; node will not advertise itself");
            return Ok(());
        }
        let sink = Arc::new(DiscoveryEndpoints::connect(&self.config.discovery.endpoints)?);
        let heartbeater = Heartbeater::new(
            reporter,
            sink,
            Duration::from_millis(self.config.discovery.heartbeat_interval_ms),
        );
        let shutdown_rx = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(heartbeater.run(shutdown_rx)));
        Ok(())
    }

    /// Bootstrap member set: the same-DC quick form plus explicit cross-DC
    /// peers, falling back to a single self member.
    fn bootstrap_members(&self) -> Vec<(String, String)> {
        let mut members: Vec<(String, String)> = self
            .config
            .cluster
            .nexus_cluster_url
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| (url.to_string(), self.config.node.dc_id.clone()))
            .collect();
        for peer in &self.config.cluster.peers {
            if !members.iter().any(|(url, _)| *url == peer.url) {
                members.push((peer.url.clone(), peer.dc_id.clone()));
            }
        }
        if members.is_empty() {
            members.push((self.self_nexus_url(), self.config.node.dc_id.clone()));
        }
        members
    }

    fn self_nexus_url(&self) -> String {
        if self.config.cluster.nexus_node_url.is_empty() {
            self.config.node.listen_addr.clone()
        } else {
            self.config.cluster.nexus_node_url.clone()
        }
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until SIGINT or an internal shutdown, then stop.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Signal every component and wait (bounded) for the loops and the
    /// listener to drain.
    pub async fn stop(&mut self) {
        tracing::info!("stopping DKV node");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks.drain(..) {
            if let Err(e) = tokio::time::timeout(Duration::from_secs(5), task).await {
                tracing::warn!(error = %e, "background task did not stop in time");
            }
        }
        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
                tracing::warn!(error = %e, "gRPC listener did not stop in time");
            }
        }
        tracing::info!("DKV node stopped");
    }
}
