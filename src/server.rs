//! TCP server for proxy client connections.
//!
//! This module provides the network layer that accepts client connections
//! and runs one worker task per connection against the shared session.
//!
//! ## Architecture
//!
//! ```text
//! +--------+
//! | Server |  <- Accepts TCP connections
//! +--------+
//!      |
//!      v
//! +----------+
//! | Registry |  <- Records workers, sweeps finished ones, stops the rest
//! +----------+
//!      |
//!      v
//! +------------+     +-------------+
//! | Connection | --> | CursorTable |  <- Per-connection paging state
//! +------------+     +-------------+
//!      |
//!      v
//! +------------------------+
//! | Session / SchemaCache  |  <- Shared by every connection
//! +------------------------+
//! ```
//!
//! ## Terminology
//!
//! - **Server**: TCP listener that spawns connection workers
//! - **Connection**: Per-client worker answering orders in sequence
//! - **Registry**: Tracks live workers so they can be stopped on shutdown

pub mod connection;
pub mod listener;
pub mod registry;

pub use connection::{Connection, WorkerState};
pub use listener::Server;
pub use registry::Registry;
