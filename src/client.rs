//! Client side of the proxy protocol.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::cluster::Row;
use crate::protocol::{Order, OrderKind, OrderResult};
use crate::wire::{self, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Wire(#[from] WireError),

    #[error("{0:?} order failed")]
    Failed(OrderKind),

    #[error("declare reply carries no cursor index")]
    MissingCursorIndex,
}

/// A connection to the proxy.
///
/// Orders are answered in sequence, so the client holds `&mut self` for
/// the whole round trip.
pub struct ProxyClient<S = TcpStream> {
    stream: S,
}

impl ProxyClient<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(WireError::from)?;
        stream.set_nodelay(true).map_err(WireError::from)?;
        Ok(Self::from_stream(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProxyClient<S> {
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }

    /// Sends one order and waits for its result.
    pub async fn send(&mut self, order: &Order) -> Result<OrderResult, WireError> {
        wire::write_order(&mut self.stream, order).await?;
        wire::read_result(&mut self.stream).await
    }

    async fn send_checked(&mut self, order: &Order) -> Result<OrderResult, ClientError> {
        let result = self.send(order).await?;
        if !result.succeeded() {
            return Err(ClientError::Failed(order.kind));
        }
        Ok(result)
    }

    pub async fn execute(&mut self, cql: &str) -> Result<(), ClientError> {
        self.send_checked(&Order::execute(cql)).await?;
        Ok(())
    }

    /// Returns the first row of `cql`, if any.
    pub async fn rows(&mut self, cql: &str, column_count: u16) -> Result<Option<Row>, ClientError> {
        let result = self.send_checked(&Order::rows(cql, column_count)).await?;
        Ok(result.rows(column_count as usize).next().map(<[Bytes]>::to_vec))
    }

    /// Opens a cursor; returns its index and the first page.
    pub async fn declare_cursor(
        &mut self,
        cql: &str,
        column_count: u16,
        paging_size: i32,
    ) -> Result<(u32, Vec<Row>), ClientError> {
        let order = Order::declare_cursor(cql, column_count, paging_size);
        let result = self.send_checked(&order).await?;
        let index = result.cursor_index().ok_or(ClientError::MissingCursorIndex)?;
        let rows = result
            .cursor_rows(column_count as usize)
            .map(<[Bytes]>::to_vec)
            .collect();
        Ok((index, rows))
    }

    /// Next page of a cursor; empty once the cursor is exhausted.
    pub async fn fetch_cursor(&mut self, index: u32, column_count: u16) -> Result<Vec<Row>, ClientError> {
        let result = self.send_checked(&Order::fetch_cursor(index as i32)).await?;
        Ok(result
            .rows(column_count as usize)
            .map(<[Bytes]>::to_vec)
            .collect())
    }

    pub async fn close_cursor(&mut self, index: u32) -> Result<(), ClientError> {
        self.send_checked(&Order::close_cursor(index as i32)).await?;
        Ok(())
    }

    pub async fn describe_cluster(&mut self) -> Result<Bytes, ClientError> {
        let result = self.send_checked(&Order::describe_cluster()).await?;
        Ok(result.blobs().first().cloned().unwrap_or_default())
    }

    /// Closes the write side; the proxy ends the connection.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await.map_err(WireError::from)?;
        Ok(())
    }
}
