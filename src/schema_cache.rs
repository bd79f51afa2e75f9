//! Process-wide cache of the cluster schema description.

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::cluster::{Cluster, ClusterError};

/// Cached schema blob, shared by every connection worker.
///
/// An empty blob means "not populated". The lock is held across the
/// introspection call so concurrent populate attempts serialize: the
/// first one introspects, the others find the blob already filled.
///
/// Uses `tokio::sync::Mutex` (not `parking_lot`) because the guard lives
/// across an `.await`.
#[derive(Debug, Default)]
pub struct SchemaCache {
    blob: Mutex<Bytes>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached blob, introspecting `cluster` first if empty.
    ///
    /// # Errors
    ///
    /// Returns the introspection error; the cache stays empty in that case.
    pub async fn get_or_populate<C: Cluster>(&self, cluster: &C) -> Result<Bytes, ClusterError> {
        let mut blob = self.blob.lock().await;
        if blob.is_empty() {
            *blob = cluster.describe_schema().await?;
            tracing::debug!(bytes = blob.len(), "schema cache populated");
        }
        Ok(blob.clone())
    }

    /// Forgets the cached blob; the next read re-introspects.
    pub async fn clear(&self) {
        let mut blob = self.blob.lock().await;
        if !blob.is_empty() {
            tracing::debug!("schema cache cleared");
        }
        *blob = Bytes::new();
    }

    pub async fn is_populated(&self) -> bool {
        !self.blob.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_read_uses_cache() {
        let cluster = MemoryCluster::new();
        let cache = SchemaCache::new();

        let first = cache.get_or_populate(&cluster).await.unwrap();
        let second = cache.get_or_populate(&cluster).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cluster.describe_calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_reintrospection() {
        let cluster = MemoryCluster::new();
        let cache = SchemaCache::new();

        assert_eq!(cache.get_or_populate(&cluster).await.unwrap(), "schema #1");
        cache.clear().await;
        assert!(!cache.is_populated().await);
        assert_eq!(cache.get_or_populate(&cluster).await.unwrap(), "schema #2");
        assert_eq!(cluster.describe_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_introspection_is_not_cached() {
        let cluster = MemoryCluster::new();
        let cache = SchemaCache::new();

        cluster.set_schema_failure(Some("unreachable"));
        assert!(cache.get_or_populate(&cluster).await.is_err());
        assert!(!cache.is_populated().await);

        cluster.set_schema_failure(None);
        assert!(cache.get_or_populate(&cluster).await.is_ok());
        assert!(cache.is_populated().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_populate_introspects_once() {
        let cluster = MemoryCluster::new().with_describe_delay(Duration::from_millis(50));
        let cache = Arc::new(SchemaCache::new());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let cluster = cluster.clone();
            tasks.push(tokio::spawn(async move {
                cache.get_or_populate(&cluster).await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "schema #1");
        }
        assert_eq!(cluster.describe_calls(), 1);
    }
}
