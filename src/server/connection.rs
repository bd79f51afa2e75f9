mod cursors;
mod error;

pub use cursors::{Cursor, CursorError, CursorTable};
pub use error::{ConnectionError, OrderError};

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cluster::{Cluster, Row, Session, Statement};
use crate::protocol::{Consistency, Order, OrderKind, OrderResult};
use crate::schema_cache::SchemaCache;
use crate::wire::{self, WireError};

/// Lifecycle of a connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Reading, executing and answering orders.
    Running,
    /// The stream failed, hung up or was stopped; open cursors are abandoned.
    Closing,
    /// The stream is released.
    Done,
}

/// The paging state behind one cursor.
///
/// A cursor declared with its own timeout keeps the ephemeral session it was
/// opened on, so later pages are fetched under the same timeout.
struct PagedQuery<C: Cluster> {
    pager: C::Pager,
    ephemeral: Option<C>,
}

/// A single client connection.
///
/// Orders are handled strictly one at a time: read, execute, answer. A
/// failing order produces a failed result and the loop carries on; only
/// transport failures end the connection.
pub struct Connection<C: Cluster, S> {
    stream: S,
    session: Arc<Session<C>>,
    schema_cache: Arc<SchemaCache>,
    cursors: CursorTable<PagedQuery<C>>,
    state: WorkerState,
}

impl<C, S> Connection<C, S>
where
    C: Cluster,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, session: Arc<Session<C>>, schema_cache: Arc<SchemaCache>) -> Self {
        Self {
            stream,
            session,
            schema_cache,
            cursors: CursorTable::new(),
            state: WorkerState::Running,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Serves orders until the client leaves, the stream fails or `stop`
    /// is cancelled.
    ///
    /// `stop` is only observed while waiting for the next order; an order
    /// already being executed is answered first.
    pub async fn run(&mut self, stop: CancellationToken) -> Result<(), ConnectionError> {
        debug!("worker started");
        let outcome = self.serve(&stop).await;

        self.state = WorkerState::Closing;
        let abandoned = self.cursors.open_count();
        if abandoned > 0 {
            debug!(abandoned, "abandoning open cursors");
        }
        self.cursors.clear();
        // The peer may already be gone.
        let _ = self.stream.shutdown().await;
        self.state = WorkerState::Done;

        match &outcome {
            Ok(()) => debug!("worker finished"),
            Err(e) => debug!(error = %e, "worker finished on transport error"),
        }
        outcome
    }

    async fn serve(&mut self, stop: &CancellationToken) -> Result<(), ConnectionError> {
        loop {
            let order = tokio::select! {
                res = wire::read_order(&mut self.stream) => match res {
                    Ok(order) => order,
                    Err(e) if e.is_clean_disconnect() => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
                _ = stop.cancelled() => {
                    debug!("stop requested");
                    return Ok(());
                }
            };
            self.handle_order(order).await?;
        }
    }

    /// Executes one order and writes its result.
    async fn handle_order(&mut self, order: Order) -> Result<(), ConnectionError> {
        trace!(kind = ?order.kind, cursor = order.cursor_index, statement = %order.statement, "order");
        if order.kind.runs_statement() && order.consistency != Consistency::Quorum {
            warn!(consistency = ?order.consistency, statement = %order.statement, "order does not use QUORUM consistency");
        }

        let (outcome, deferred_close) = self.dispatch(&order).await;

        if order.clears_schema_cache {
            self.schema_cache.clear().await;
        }

        let result = outcome.unwrap_or_else(|e| {
            warn!(kind = ?order.kind, error = %e, "order failed");
            OrderResult::failure()
        });
        self.send(&result).await?;

        // Close-Cursor answers first and releases afterwards.
        if let Some(slot) = deferred_close {
            self.cursors.close(slot);
            debug!(cursor = slot, remaining = self.cursors.len(), "cursor closed");
        }
        Ok(())
    }

    /// Returns the order outcome and, for Close-Cursor, the slot to release
    /// once the reply is out.
    async fn dispatch(&mut self, order: &Order) -> (Result<OrderResult, OrderError>, Option<usize>) {
        match order.kind {
            OrderKind::Execute => (self.execute(order).await, None),
            OrderKind::Rows => (self.read_row(order).await, None),
            OrderKind::DeclareCursor => (self.declare_cursor(order).await, None),
            OrderKind::FetchCursor => (self.fetch_cursor(order).await, None),
            OrderKind::CloseCursor => match self.cursors.validate(order.cursor_index) {
                Ok(slot) => (Ok(OrderResult::success()), Some(slot)),
                Err(e) => (Err(e.into()), None),
            },
            OrderKind::DescribeCluster => (self.describe_cluster().await, None),
        }
    }

    /// Writes `result`, or an empty failure if it cannot be encoded.
    async fn send(&mut self, result: &OrderResult) -> Result<(), WireError> {
        match wire::write_result(&mut self.stream, result).await {
            Err(e @ (WireError::Protocol(_) | WireError::FrameTooLarge(_))) => {
                warn!(error = %e, blobs = result.len(), "result cannot be encoded");
                wire::write_result(&mut self.stream, &OrderResult::failure()).await
            }
            other => other,
        }
    }

    /// Runs a one-shot statement, on an ephemeral session if the order
    /// carries its own timeout.
    async fn run_statement(&self, order: &Order) -> Result<Vec<Row>, OrderError> {
        let statement = Statement::from_order(order);
        let rows = match order.timeout() {
            Some(timeout) => {
                let ephemeral = self.session.derive(timeout).await?;
                ephemeral.execute(&statement).await?
            }
            None => self.session.cluster().execute(&statement).await?,
        };
        Ok(rows)
    }

    async fn execute(&self, order: &Order) -> Result<OrderResult, OrderError> {
        self.run_statement(order).await?;
        Ok(OrderResult::success())
    }

    async fn read_row(&self, order: &Order) -> Result<OrderResult, OrderError> {
        let rows = self.run_statement(order).await?;
        let mut result = OrderResult::success();
        if let Some(row) = rows.first() {
            push_rows(&mut result, std::slice::from_ref(row), order.column_count as usize)?;
        }
        Ok(result)
    }

    async fn declare_cursor(&mut self, order: &Order) -> Result<OrderResult, OrderError> {
        let statement = Statement::from_order(order);
        let (query, first_page) = match order.timeout() {
            Some(timeout) => {
                let ephemeral = self.session.derive(timeout).await?;
                let (pager, rows) = ephemeral.start_paged(&statement).await?;
                let query = PagedQuery {
                    pager,
                    ephemeral: Some(ephemeral),
                };
                (query, rows)
            }
            None => {
                let (pager, rows) = self.session.cluster().start_paged(&statement).await?;
                let query = PagedQuery {
                    pager,
                    ephemeral: None,
                };
                (query, rows)
            }
        };

        let column_count = order.column_count as usize;
        let index = self.cursors.len();
        let mut result = OrderResult::success();
        result.push(Bytes::copy_from_slice(&(index as u32).to_be_bytes()));
        push_rows(&mut result, &first_page, column_count)?;
        // A reply that cannot be sent must not leave a cursor the client never heard of.
        result.check_encodable()?;

        let declared = self.cursors.declare(query, column_count);
        debug_assert_eq!(declared, index);
        debug!(cursor = declared, rows = first_page.len(), "cursor declared");
        Ok(result)
    }

    async fn fetch_cursor(&mut self, order: &Order) -> Result<OrderResult, OrderError> {
        let cursor = self.cursors.get_mut(order.cursor_index)?;
        let PagedQuery { pager, ephemeral } = &mut cursor.query;
        let cluster = ephemeral.as_ref().unwrap_or(self.session.cluster());
        let page = cluster.next_page(pager).await?;

        let mut result = OrderResult::success();
        if let Some(rows) = page {
            push_rows(&mut result, &rows, cursor.column_count)?;
        }
        trace!(cursor = order.cursor_index, blobs = result.len(), "cursor fetched");
        Ok(result)
    }

    async fn describe_cluster(&self) -> Result<OrderResult, OrderError> {
        let blob = self
            .schema_cache
            .get_or_populate(self.session.cluster())
            .await?;
        let mut result = OrderResult::success();
        result.push(blob);
        Ok(result)
    }
}

/// Appends the first `column_count` cells of each row.
fn push_rows(result: &mut OrderResult, rows: &[Row], column_count: usize) -> Result<(), OrderError> {
    for row in rows {
        if row.len() < column_count {
            return Err(OrderError::ColumnCount {
                expected: column_count,
                available: row.len(),
            });
        }
        for cell in &row[..column_count] {
            result.push(cell.clone());
        }
    }
    Ok(())
}
