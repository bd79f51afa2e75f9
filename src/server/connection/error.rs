use crate::cluster::ClusterError;
use crate::protocol::ProtocolError;
use crate::server::connection::CursorError;
use crate::wire::WireError;

/// Why one order failed. The connection carries on with the next order.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    #[error("result cannot be sent: {0}")]
    Unencodable(#[from] ProtocolError),

    #[error("expected {expected} columns, row has {available}")]
    ColumnCount { expected: usize, available: usize },
}

/// Why a connection ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Wire(#[from] WireError),
}
