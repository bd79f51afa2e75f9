use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cluster::{Cluster, Session};
use crate::schema_cache::SchemaCache;
use crate::server::connection::Connection;
use crate::server::registry::Registry;

/// Listen backlog used when none is configured.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Pause after a failed `accept`, so a persistent failure (e.g. out of
/// file descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP server sharing one cluster session among its client connections.
pub struct Server<C: Cluster> {
    listener: TcpListener,
    session: Arc<Session<C>>,
    schema_cache: Arc<SchemaCache>,
    registry: Registry,
    next_conn_id: u64,
}

impl<C: Cluster> Server<C> {
    /// Creates a new server with a given listener and shared session.
    pub fn new(listener: TcpListener, session: Arc<Session<C>>) -> Self {
        Self {
            listener,
            session,
            schema_cache: Arc::new(SchemaCache::new()),
            registry: Registry::new(),
            next_conn_id: 1,
        }
    }

    /// Uses an existing schema cache instead of a fresh one.
    pub fn with_schema_cache(mut self, schema_cache: Arc<SchemaCache>) -> Self {
        self.schema_cache = schema_cache;
        self
    }

    /// Binds a listening socket with `SO_REUSEADDR` set.
    pub fn bind(addr: SocketAddr, backlog: Option<u32>) -> io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(backlog.unwrap_or(DEFAULT_BACKLOG))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// On shutdown the listener is closed first, then every live worker
    /// is asked to stop. Workers are not awaited.
    pub async fn serve(mut self, shutdown: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                res = self.listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "cannot set TCP_NODELAY");
            }

            let conn_id = self.next_conn_id;
            self.next_conn_id += 1;
            debug!(conn_id, %peer, "accepted connection");

            let session = self.session.clone();
            let schema_cache = self.schema_cache.clone();
            let span = info_span!("conn", conn_id, %peer);
            self.registry.spawn(conn_id, peer, move |stop| {
                async move {
                    let mut connection = Connection::new(stream, session, schema_cache);
                    if let Err(e) = connection.run(stop).await {
                        debug!(error = %e, "connection closed on error");
                    }
                }
                .instrument(span)
            });
        }

        drop(self.listener);
        let signalled = self.registry.stop_all();
        info!(workers = signalled, "listener stopped");
    }
}
