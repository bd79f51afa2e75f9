//! Scripted in-memory cluster for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::cluster::{Cluster, ClusterError, Row, Statement};

/// Page size used when a paged statement does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// In-memory cluster backend.
///
/// Statements are matched by their exact text against scripted row sets;
/// unscripted statements succeed with no rows. Every call is recorded so
/// tests can observe what reached the cluster and through which session.
///
/// Clones and derived sessions share the same script and records. Locks
/// are never held across an `.await`.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
    /// Request timeout of this session; `None` for the shared one.
    timeout: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    results: Mutex<HashMap<String, Vec<Row>>>,
    failures: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<String, Duration>>,
    schema: Mutex<Option<Bytes>>,
    schema_failure: Mutex<Option<String>>,
    describe_delay: Mutex<Duration>,
    connect_delay: Mutex<Duration>,
    describe_calls: AtomicUsize,
    executed: Mutex<Vec<Executed>>,
    derived: Mutex<Vec<Duration>>,
    page_fetches: Mutex<Vec<Option<Duration>>>,
    connects_in_flight: AtomicUsize,
    max_concurrent_connects: AtomicUsize,
}

/// A statement that reached the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub statement: Statement,
    /// Timeout of the session it ran on; `None` for the shared session.
    pub timeout: Option<Duration>,
}

/// Remaining rows of a paged statement.
#[derive(Debug)]
pub struct MemoryPager {
    remaining: VecDeque<Row>,
    page_size: usize,
}

impl MemoryPager {
    fn next_page(&mut self) -> Vec<Row> {
        let n = self.page_size.min(self.remaining.len());
        self.remaining.drain(..n).collect()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by `cql`.
    pub fn with_result(self, cql: impl Into<String>, rows: Vec<Row>) -> Self {
        self.set_result(cql, rows);
        self
    }

    pub fn set_result(&self, cql: impl Into<String>, rows: Vec<Row>) {
        self.inner.results.lock().insert(cql.into(), rows);
    }

    /// Makes `cql` fail with a query error.
    pub fn fail_on(self, cql: impl Into<String>, message: impl Into<String>) -> Self {
        self.inner
            .failures
            .lock()
            .insert(cql.into(), message.into());
        self
    }

    /// Makes `cql` take `delay` to answer. Sessions with a shorter timeout
    /// give up with `ClusterError::Timeout`.
    pub fn with_delay(self, cql: impl Into<String>, delay: Duration) -> Self {
        self.inner.delays.lock().insert(cql.into(), delay);
        self
    }

    /// Schema blob returned by introspection. Without one, each
    /// introspection returns a blob naming its call number.
    pub fn with_schema(self, blob: impl Into<Bytes>) -> Self {
        self.set_schema(blob);
        self
    }

    pub fn set_schema(&self, blob: impl Into<Bytes>) {
        *self.inner.schema.lock() = Some(blob.into());
    }

    /// Makes introspection fail until cleared with `None`.
    pub fn set_schema_failure(&self, message: Option<&str>) {
        *self.inner.schema_failure.lock() = message.map(str::to_owned);
    }

    pub fn with_describe_delay(self, delay: Duration) -> Self {
        *self.inner.describe_delay.lock() = delay;
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.inner.connect_delay.lock() = delay;
        self
    }

    /// Request timeout of this session.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of schema introspections run so far.
    pub fn describe_calls(&self) -> usize {
        self.inner.describe_calls.load(Ordering::SeqCst)
    }

    /// Every statement run so far, in order.
    pub fn executed(&self) -> Vec<Executed> {
        self.inner.executed.lock().clone()
    }

    /// Session timeout of every follow-up page fetch, in order.
    pub fn page_fetch_timeouts(&self) -> Vec<Option<Duration>> {
        self.inner.page_fetches.lock().clone()
    }

    /// Timeouts of every derived session opened so far.
    pub fn derived_timeouts(&self) -> Vec<Duration> {
        self.inner.derived.lock().clone()
    }

    /// Highest number of derived sessions ever being created at once.
    pub fn max_concurrent_connects(&self) -> usize {
        self.inner.max_concurrent_connects.load(Ordering::SeqCst)
    }

    async fn run(&self, statement: &Statement) -> Result<Vec<Row>, ClusterError> {
        self.inner.executed.lock().push(Executed {
            statement: statement.clone(),
            timeout: self.timeout,
        });

        let delay = self.inner.delays.lock().get(&statement.cql).copied();
        if let Some(delay) = delay {
            match self.timeout {
                Some(timeout) if timeout < delay => {
                    tokio::time::sleep(timeout).await;
                    return Err(ClusterError::Timeout(timeout));
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        if let Some(message) = self.inner.failures.lock().get(&statement.cql) {
            return Err(ClusterError::Query(message.clone()));
        }

        Ok(self
            .inner
            .results
            .lock()
            .get(&statement.cql)
            .cloned()
            .unwrap_or_default())
    }
}

impl Cluster for MemoryCluster {
    type Pager = MemoryPager;

    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>, ClusterError> {
        let mut rows = self.run(statement).await?;
        if let Some(page_size) = statement.paging_size {
            rows.truncate(page_size as usize);
        }
        Ok(rows)
    }

    async fn start_paged(
        &self,
        statement: &Statement,
    ) -> Result<(MemoryPager, Vec<Row>), ClusterError> {
        let rows = self.run(statement).await?;
        let mut pager = MemoryPager {
            remaining: rows.into(),
            page_size: statement
                .paging_size
                .map_or(DEFAULT_PAGE_SIZE, |n| n as usize),
        };
        let first = pager.next_page();
        Ok((pager, first))
    }

    async fn next_page(&self, pager: &mut MemoryPager) -> Result<Option<Vec<Row>>, ClusterError> {
        self.inner.page_fetches.lock().push(self.timeout);
        if pager.remaining.is_empty() {
            return Ok(None);
        }
        Ok(Some(pager.next_page()))
    }

    async fn describe_schema(&self) -> Result<Bytes, ClusterError> {
        let call = self.inner.describe_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.inner.describe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.inner.schema_failure.lock().clone() {
            return Err(ClusterError::Schema(message));
        }
        let scripted = self.inner.schema.lock().clone();
        Ok(scripted.unwrap_or_else(|| Bytes::from(format!("schema #{call}"))))
    }

    async fn connect_with_timeout(&self, timeout: Duration) -> Result<Self, ClusterError> {
        let in_flight = self.inner.connects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_concurrent_connects
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.inner.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.inner.derived.lock().push(timeout);
        self.inner.connects_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Self {
            inner: self.inner.clone(),
            timeout: Some(timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&'static str]) -> Row {
        cells
            .iter()
            .map(|c| Bytes::from_static(c.as_bytes()))
            .collect()
    }

    #[tokio::test]
    async fn test_paging_serves_pages_then_none() {
        let rows: Vec<Row> = (0..5).map(|_| row(&["k", "v"])).collect();
        let cluster = MemoryCluster::new().with_result("SELECT", rows);

        let mut statement = Statement::new("SELECT");
        statement.paging_size = Some(2);

        let (mut pager, first) = cluster.start_paged(&statement).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(cluster.next_page(&mut pager).await.unwrap().unwrap().len(), 2);
        assert_eq!(cluster.next_page(&mut pager).await.unwrap().unwrap().len(), 1);
        assert!(cluster.next_page(&mut pager).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let cluster = MemoryCluster::new().fail_on("DROP TABLE t", "no such table");
        let err = cluster
            .execute(&Statement::new("DROP TABLE t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Query(msg) if msg == "no such table"));
        assert_eq!(cluster.executed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_to_derived_session_only() {
        let cluster = MemoryCluster::new().with_delay("SLOW", Duration::from_secs(5));
        let statement = Statement::new("SLOW");

        let derived = cluster
            .connect_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(
            derived.execute(&statement).await,
            Err(ClusterError::Timeout(t)) if t == Duration::from_secs(1)
        ));
        assert!(cluster.execute(&statement).await.is_ok());

        let timeouts: Vec<_> = cluster.executed().iter().map(|e| e.timeout).collect();
        assert_eq!(timeouts, vec![Some(Duration::from_secs(1)), None]);
    }

    #[tokio::test]
    async fn test_describe_counts_calls() {
        let cluster = MemoryCluster::new();
        assert_eq!(cluster.describe_schema().await.unwrap(), "schema #1");
        assert_eq!(cluster.describe_schema().await.unwrap(), "schema #2");
        assert_eq!(cluster.describe_calls(), 2);

        cluster.set_schema_failure(Some("unreachable"));
        assert!(cluster.describe_schema().await.is_err());
    }
}
