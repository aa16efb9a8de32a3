//! Node-side heartbeat loop.
//!
//! Every node periodically reports its region to the discovery service.
//! Heartbeats are fire-and-forget: a failed send is logged and the loop
//! moves on, so discovery outages never disturb the data path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::cluster::ClusterController;
use crate::core::config::NodeConfig;
use crate::core::error::DkvResult;
use crate::core::time;
use crate::replication::SlaveProgress;
use crate::rpc::proto::RegionInfo;

/// Supplies the node's current region view for each heartbeat.
pub trait RegionReporter: Send + Sync {
    fn current_region(&self) -> RegionInfo;
}

/// Receives heartbeats; implemented by the discovery RPC client and by
/// in-process registries in tests.
#[tonic::async_trait]
pub trait StatusSink: Send + Sync {
    async fn update_status(&self, info: RegionInfo, timestamp: u64) -> DkvResult<()>;
}

/// Region view of a consensus member, derived from the cluster controller.
pub struct MemberRegionReporter {
    node: NodeConfig,
    nexus_cluster_url: String,
    controller: Arc<ClusterController>,
}

impl MemberRegionReporter {
    pub fn new(
        node: NodeConfig,
        nexus_cluster_url: String,
        controller: Arc<ClusterController>,
    ) -> Self {
        Self {
            node,
            nexus_cluster_url,
            controller,
        }
    }
}

impl RegionReporter for MemberRegionReporter {
    fn current_region(&self) -> RegionInfo {
        let mut info = RegionInfo {
            dc_id: self.node.dc_id.clone(),
            node_address: self.node.listen_addr.clone(),
            database: self.node.database.clone(),
            vbucket: self.node.vbucket,
            nexus_cluster_url: self.nexus_cluster_url.clone(),
            ..Default::default()
        };
        info.set_status(self.controller.region_status());
        info
    }
}

/// Region view of an asynchronous slave, derived from the puller's
/// observed lag and its currently chosen master.
pub struct SlaveRegionReporter {
    node: NodeConfig,
    progress: Arc<SlaveProgress>,
}

impl SlaveRegionReporter {
    pub fn new(node: NodeConfig, progress: Arc<SlaveProgress>) -> Self {
        Self { node, progress }
    }
}

impl RegionReporter for SlaveRegionReporter {
    fn current_region(&self) -> RegionInfo {
        let mut info = RegionInfo {
            dc_id: self.node.dc_id.clone(),
            node_address: self.node.listen_addr.clone(),
            database: self.node.database.clone(),
            vbucket: self.node.vbucket,
            master_host: self.progress.master_host(),
            ..Default::default()
        };
        info.set_status(self.progress.region_status());
        info
    }
}

/// The heartbeat task for one node.
pub struct Heartbeater {
    reporter: Arc<dyn RegionReporter>,
    sink: Arc<dyn StatusSink>,
    interval: Duration,
}

impl Heartbeater {
    pub fn new(
        reporter: Arc<dyn RegionReporter>,
        sink: Arc<dyn StatusSink>,
        interval: Duration,
    ) -> Self {
        Self {
            reporter,
            sink,
            interval,
        }
    }

    /// Send one heartbeat now.
    pub async fn beat_once(&self) -> DkvResult<()> {
        let info = self.reporter.current_region();
        self.sink
            .update_status(info, time::now_epoch_millis())
            .await
    }

    /// Run until shutdown, beating every interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "heartbeater started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.beat_once().await {
                tracing::warn!(error = %e, "heartbeat failed; will retry next interval");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("heartbeater stopped");
    }
}
