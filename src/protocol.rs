//! Client/proxy wire protocol.
//!
//! Every message is a frame made of a 4-byte tag, a big-endian `u32` body
//! length and the body itself. Clients send orders, the proxy answers each
//! one with exactly one result, in order.
//!
//! ## Architecture
//!
//! ```text
//! +----------+                          +-----------+
//! |  Client  |  --- Order (CQLP) --->   |   Proxy   |
//! |          |  <-- OrderResult ----    | (dbproxy) |
//! +----------+      (SUCS / EROR)       +-----------+
//!               ^                   ^
//!               |  codec + wire I/O |
//!               +-------------------+
//! ```
//!
//! ## Terminology
//!
//! - **Order**: one client request (statement, parameters, paging, cursor ops)
//! - **OrderResult**: the reply, a success flag plus a flat list of blobs
//! - **Frame**: tag + length + body; the unit read and written by [`crate::wire`]

pub mod codec;
pub mod error;
pub mod order;
pub mod result;
pub mod types;

pub use codec::{
    FAILURE_TAG, FRAME_HEADER_SIZE, FrameHeader, MAX_BODY_SIZE, ORDER_TAG, SUCCESS_TAG,
};
pub use error::ProtocolError;
pub use order::Order;
pub use result::{MAX_RESULT_BLOBS, OrderResult};
pub use types::{Consistency, OrderKind};
