use std::future::Future;
use std::net::SocketAddr;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The connection workers started by the listener.
///
/// Only the accept loop touches the registry, so it needs no locking.
/// Finished workers are swept out before each new one is recorded, which
/// keeps the list bounded by the number of live connections.
#[derive(Default)]
pub struct Registry {
    workers: Vec<WorkerHandle>,
}

struct WorkerHandle {
    conn_id: u64,
    peer: SocketAddr,
    task: JoinHandle<()>,
    stop: CancellationToken,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets workers whose task has finished. Returns how many.
    pub fn sweep(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|w| !w.task.is_finished());
        let reclaimed = before - self.workers.len();
        if reclaimed > 0 {
            tracing::trace!(reclaimed, live = self.workers.len(), "swept finished workers");
        }
        reclaimed
    }

    /// Starts a worker task and records it.
    ///
    /// `worker` receives the token it must watch for the stop request.
    pub fn spawn<F, Fut>(&mut self, conn_id: u64, peer: SocketAddr, worker: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.sweep();
        let stop = CancellationToken::new();
        let task = tokio::spawn(worker(stop.clone()));
        self.workers.push(WorkerHandle {
            conn_id,
            peer,
            task,
            stop,
        });
    }

    /// Number of recorded workers, including finished ones not yet swept.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Asks every live worker to stop and forgets them.
    ///
    /// Workers are not joined; each one ends on its own once it is back to
    /// waiting for an order. Returns the number of workers signalled.
    pub fn stop_all(&mut self) -> usize {
        self.sweep();
        let count = self.workers.len();
        for worker in self.workers.drain(..) {
            tracing::debug!(conn_id = worker.conn_id, peer = %worker.peer, "stopping worker");
            worker.stop.cancel();
        }
        count
    }
}
