//! The database cluster as seen by the proxy.
//!
//! The proxy never interprets statements: it forwards the text, the bound
//! values and the query options, and hands rows back as opaque byte cells.
//! [`Cluster`] is the seam between the connection workers and the driver.
//!
//! ```text
//! +-------------------+
//! | Connection Worker |
//! +-------------------+
//!          |
//!          v
//! +-------------------+      derive(timeout)      +-------------------+
//! | Session<C>        | ------------------------> | C (ephemeral)     |
//! |  shared, one per  |   serialized creation     |  one order only   |
//! |  process          |                           +-------------------+
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! | Cluster trait     |
//! +-------------------+
//!       /      \
//!      v        v
//! +-------------+ +---------------+
//! |MemoryCluster| | ScyllaCluster |  (feature "scylla")
//! +-------------+ +---------------+
//! ```

pub mod memory;
#[cfg(feature = "scylla")]
pub mod scylla;

pub use memory::MemoryCluster;
#[cfg(feature = "scylla")]
pub use self::scylla::ScyllaCluster;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::protocol::{Consistency, Order};

/// One result row; a NULL cell is an empty blob.
pub type Row = Vec<Bytes>;

/// A statement ready to be sent to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub cql: String,
    pub parameters: Vec<Bytes>,
    pub consistency: Consistency,
    pub timestamp: Option<i64>,
    pub paging_size: Option<u32>,
}

impl Statement {
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            parameters: Vec::new(),
            consistency: Consistency::Default,
            timestamp: None,
            paging_size: None,
        }
    }

    /// Copies the query options of `order`.
    pub fn from_order(order: &Order) -> Self {
        Self {
            cql: order.statement.clone(),
            parameters: order.parameters.clone(),
            consistency: order.consistency,
            timestamp: order.timestamp,
            paging_size: order.paging_size(),
        }
    }
}

/// Errors reported by the cluster backend.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cannot connect to cluster: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot encode cell value: {0}")]
    Value(String),

    #[error("schema introspection failed: {0}")]
    Schema(String),
}

/// A connection to the database cluster.
///
/// Implementations must allow independent statements to run concurrently
/// from many tasks through `&self`.
pub trait Cluster: Send + Sync + Sized + 'static {
    /// Server-side position of a paged query.
    type Pager: Send + Sync + 'static;

    /// Runs a statement and returns every row of its first page.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Query` if the cluster rejects the statement,
    /// `ClusterError::Timeout` if it does not answer in time.
    fn execute(
        &self,
        statement: &Statement,
    ) -> impl Future<Output = Result<Vec<Row>, ClusterError>> + Send;

    /// Runs a statement with paging enabled.
    ///
    /// Returns the pager positioned after the first page, and that page.
    fn start_paged(
        &self,
        statement: &Statement,
    ) -> impl Future<Output = Result<(Self::Pager, Vec<Row>), ClusterError>> + Send;

    /// Fetches the next page of a paged query.
    ///
    /// Returns `Ok(None)` once every page has been served.
    fn next_page(
        &self,
        pager: &mut Self::Pager,
    ) -> impl Future<Output = Result<Option<Vec<Row>>, ClusterError>> + Send;

    /// Introspects the cluster schema into one opaque blob.
    ///
    /// This is the slowest call the proxy makes; callers cache the result.
    fn describe_schema(&self) -> impl Future<Output = Result<Bytes, ClusterError>> + Send;

    /// Opens a new, independent connection to the same cluster whose
    /// requests time out after `timeout`.
    ///
    /// Creation may touch process-wide driver state and must not run
    /// concurrently with itself; go through [`Session::derive`].
    fn connect_with_timeout(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self, ClusterError>> + Send;
}

/// The process-wide cluster session shared by every connection worker.
pub struct Session<C> {
    cluster: C,
    derive_lock: Mutex<()>,
}

impl<C: Cluster> Session<C> {
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            derive_lock: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Opens an ephemeral session with its own request timeout.
    ///
    /// The shared session is left untouched. Only one derived session is
    /// created at a time; queries on the returned session run unserialized.
    pub async fn derive(&self, timeout: Duration) -> Result<C, ClusterError> {
        let _guard = self.derive_lock.lock().await;
        tracing::debug!(?timeout, "opening ephemeral session");
        self.cluster.connect_with_timeout(timeout).await
    }
}
