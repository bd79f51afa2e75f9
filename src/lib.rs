pub mod client;
pub mod cluster;
pub mod config;
pub mod protocol;
pub mod schema_cache;
pub mod server;
pub mod telemetry;
pub mod wire;
