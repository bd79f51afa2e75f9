use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dbproxy::cluster::{ScyllaCluster, Session};
use dbproxy::config::Args;
use dbproxy::server::Server;
use dbproxy::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    telemetry::init(&config.log_level, config.json_logs)?;

    info!(
        listen = %config.listen,
        hosts = ?config.cluster_hosts,
        port = config.cluster_port,
        "starting dbproxy"
    );

    let cluster = ScyllaCluster::connect(&config.cluster_hosts, config.cluster_port)
        .await
        .inspect_err(|e| error!(error = %e, "cannot connect to cluster"))?;
    let session = Arc::new(Session::new(cluster));

    let listener = Server::<ScyllaCluster>::bind(config.listen, config.backlog)
        .with_context(|| format!("cannot listen on {}", config.listen))?;
    let server = Server::new(listener, session);
    info!(addr = %server.local_addr()?, "ready");

    let shutdown = CancellationToken::new();
    tokio::spawn(stop_on_signal(shutdown.clone()));
    server.serve(shutdown).await;

    info!("dbproxy stopped");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn stop_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
    shutdown.cancel();
}
