//! Command-line and environment configuration.

use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "dbproxy")]
#[command(about = "Shares one cluster session between many local clients")]
pub struct Args {
    /// Address clients connect to
    #[arg(long, env = "DBPROXY_LISTEN", default_value = "127.0.0.1:4042")]
    pub listen: String,

    /// Comma-separated cluster contact points
    #[arg(long, env = "DBPROXY_CASSANDRA_HOST_LIST", default_value = "localhost")]
    pub cassandra_host_list: String,

    /// Cluster native protocol port
    #[arg(long, env = "DBPROXY_CASSANDRA_PORT", default_value = "9042")]
    pub cassandra_port: u16,

    /// Listen backlog
    #[arg(long, env = "DBPROXY_MAX_PENDING_CONNECTIONS")]
    pub max_pending_connections: Option<u32>,

    /// Log at debug level or more verbose
    #[arg(long, env = "DBPROXY_DEBUG", default_value = "false")]
    pub debug: bool,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, env = "DBPROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "DBPROXY_JSON_LOGS", default_value = "false")]
    pub json_logs: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {value:?}: {source}")]
    ListenAddress {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("cluster host list is empty")]
    EmptyHostList,

    #[error("max pending connections must be at least 1")]
    ZeroBacklog,
}

/// Validated process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub cluster_hosts: Vec<String>,
    pub cluster_port: u16,
    pub backlog: Option<u32>,
    pub log_level: String,
    pub json_logs: bool,
}

impl Args {
    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let listen = self
            .listen
            .parse()
            .map_err(|source| ConfigError::ListenAddress {
                value: self.listen.clone(),
                source,
            })?;

        let cluster_hosts: Vec<String> = self
            .cassandra_host_list
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_owned)
            .collect();
        if cluster_hosts.is_empty() {
            return Err(ConfigError::EmptyHostList);
        }

        if self.max_pending_connections == Some(0) {
            return Err(ConfigError::ZeroBacklog);
        }

        let log_level = if self.debug && !is_debug_or_finer(&self.log_level) {
            "debug".to_owned()
        } else {
            self.log_level
        };

        Ok(ProxyConfig {
            listen,
            cluster_hosts,
            cluster_port: self.cassandra_port,
            backlog: self.max_pending_connections,
            log_level,
            json_logs: self.json_logs,
        })
    }
}

fn is_debug_or_finer(level: &str) -> bool {
    matches!(level.to_ascii_lowercase().as_str(), "debug" | "trace")
}
