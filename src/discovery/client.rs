//! Consumer-side discovery client.
//!
//! Wraps GetClusterInfo with a freshness-tracked cache so the slave puller
//! and the request router can re-query discovery on every iteration
//! without hammering it. Discovery stays a pure data store; consumers pull
//! from here, never the other way around.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::error::{DkvError, DkvResult};
use crate::rpc::proto::{RegionInfo, RegionStatus};

/// Region query, matching the GetClusterInfo wildcard semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClusterInfoFilter {
    pub dc_id: Option<String>,
    pub database: Option<String>,
    pub vbucket: Option<u32>,
}

impl ClusterInfoFilter {
    /// Filter for one shard of one database.
    pub fn shard(database: impl Into<String>, vbucket: u32) -> Self {
        Self {
            dc_id: None,
            database: Some(database.into()),
            vbucket: Some(vbucket),
        }
    }
}

/// Where cluster info actually comes from; implemented by the discovery
/// RPC client and by in-process registries in tests.
#[tonic::async_trait]
pub trait ClusterInfoSource: Send + Sync {
    async fn fetch(&self, filter: &ClusterInfoFilter) -> DkvResult<Vec<RegionInfo>>;
}

struct CachedRegions {
    regions: Vec<RegionInfo>,
    fetched_at: Instant,
}

/// Cached view over a [`ClusterInfoSource`].
pub struct DiscoveryClient {
    source: Arc<dyn ClusterInfoSource>,
    cache: Mutex<Option<(ClusterInfoFilter, CachedRegions)>>,
    cache_ttl: Duration,
}

impl DiscoveryClient {
    pub fn new(source: Arc<dyn ClusterInfoSource>, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
            cache_ttl,
        }
    }

    /// Regions matching the filter, served from cache while fresh.
    pub async fn cluster_info(&self, filter: &ClusterInfoFilter) -> DkvResult<Vec<RegionInfo>> {
        {
            let cache = self.cache.lock();
            if let Some((cached_filter, cached)) = cache.as_ref() {
                if cached_filter == filter && cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(cached.regions.clone());
                }
            }
        }

        let regions = self.source.fetch(filter).await?;
        *self.cache.lock() = Some((
            filter.clone(),
            CachedRegions {
                regions: regions.clone(),
                fetched_at: Instant::now(),
            },
        ));
        Ok(regions)
    }

    /// Drop the cache so the next lookup refetches (used after NotLeader
    /// rejections and transport errors).
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// The shard's current LEADER, preferring one in `prefer_dc` when
    /// conflicting reports exist. Ties break on the lowest node address so
    /// selection is deterministic.
    pub async fn locate_master(
        &self,
        database: &str,
        vbucket: u32,
        prefer_dc: &str,
    ) -> DkvResult<RegionInfo> {
        let filter = ClusterInfoFilter::shard(database, vbucket);
        let regions = self.cluster_info(&filter).await?;
        let mut leaders: Vec<RegionInfo> = regions
            .into_iter()
            .filter(|r| r.status() == RegionStatus::Leader)
            .collect();
        leaders.sort_by(|a, b| {
            let a_local = a.dc_id == prefer_dc;
            let b_local = b.dc_id == prefer_dc;
            b_local
                .cmp(&a_local)
                .then_with(|| a.node_address.cmp(&b.node_address))
        });
        leaders.into_iter().next().ok_or_else(|| {
            DkvError::unreachable(format!(
                "no leader known for {}/{} in discovery",
                database, vbucket
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        fetches: AtomicUsize,
        regions: Vec<RegionInfo>,
    }

    #[tonic::async_trait]
    impl ClusterInfoSource for CountingSource {
        async fn fetch(&self, _filter: &ClusterInfoFilter) -> DkvResult<Vec<RegionInfo>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.regions.clone())
        }
    }

    fn leader(dc: &str, addr: &str) -> RegionInfo {
        let mut info = RegionInfo {
            dc_id: dc.to_string(),
            database: "db".to_string(),
            vbucket: 0,
            node_address: addr.to_string(),
            ..Default::default()
        };
        info.set_status(RegionStatus::Leader);
        info
    }

    #[tokio::test]
    async fn cache_serves_repeat_lookups() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            regions: vec![leader("dc-a", "n1:7070")],
        });
        let client = DiscoveryClient::new(source.clone(), Duration::from_secs(60));

        let filter = ClusterInfoFilter::shard("db", 0);
        client.cluster_info(&filter).await.unwrap();
        client.cluster_info(&filter).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        client.invalidate();
        client.cluster_info(&filter).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn locate_master_prefers_local_dc() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            regions: vec![leader("dc-a", "a:7070"), leader("dc-b", "b:7070")],
        });
        let client = DiscoveryClient::new(source, Duration::from_secs(60));

        let master = client.locate_master("db", 0, "dc-b").await.unwrap();
        assert_eq!(master.node_address, "b:7070");
    }
}
