//! Cluster readiness gate
//!
//! Callers must not schedule access work for a cluster that is still
//! provisioning. The gate reads the owning StrataCluster's status; a TTL
//! cache in front keeps the hot path off the API server, since every access
//! object for a cluster asks the same question on every resync.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::crd::StrataCluster;
use crate::Error;

/// Answers "is this managed cluster ready for access provisioning"
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterReadiness: Send + Sync {
    /// Returns true once the named cluster accepts admin connections
    async fn is_ready(&self, cluster: &str) -> Result<bool, Error>;
}

/// Readiness gate backed by the StrataCluster CRD status
pub struct KubeClusterReadiness {
    client: Client,
}

impl KubeClusterReadiness {
    /// Create a gate reading StrataCluster objects through the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterReadiness for KubeClusterReadiness {
    async fn is_ready(&self, cluster: &str) -> Result<bool, Error> {
        let api: Api<StrataCluster> = Api::all(self.client.clone());
        // A cluster that does not exist (yet) is simply not ready.
        Ok(api.get_opt(cluster).await?.is_some_and(|c| c.is_ready()))
    }
}

struct CacheEntry {
    ready: bool,
    expires_at: Instant,
}

/// TTL cache wrapping another readiness gate
pub struct CachedClusterReadiness<R> {
    inner: R,
    ttl: Duration,
    cache: DashMap<String, CacheEntry>,
}

impl<R: ClusterReadiness> CachedClusterReadiness<R> {
    /// Wrap a gate with the given cache TTL
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Remove expired cache entries (for periodic cleanup)
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.cache.retain(|_, entry| now < entry.expires_at);
    }

    /// Number of cached answers
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl<R: ClusterReadiness> ClusterReadiness for CachedClusterReadiness<R> {
    async fn is_ready(&self, cluster: &str) -> Result<bool, Error> {
        if let Some(entry) = self.cache.get(cluster) {
            if Instant::now() < entry.expires_at {
                return Ok(entry.ready);
            }
        }

        // Only successful lookups are cached; errors must stay visible to
        // the caller on every attempt.
        let ready = self.inner.is_ready(cluster).await?;
        self.cache.insert(
            cluster.to_string(),
            CacheEntry {
                ready,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(ready)
    }
}
