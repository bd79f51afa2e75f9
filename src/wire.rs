//! Exact-length socket I/O and framing.
//!
//! Framing is only as safe as the primitives under it: a short read or
//! write that went unnoticed would shift every later message. The
//! functions here either move exactly the requested number of bytes or
//! fail, reporting how many bytes made it across.
//!
//! ```text
//! read_order                     write_result
//!   |                              |
//!   +- read_frame                  +- encode whole frame
//!   |    +- read_exact(header)     +- write_exact(frame)
//!   |    +- read_exact(body chunks) +- flush
//!   +- Order::decode
//! ```

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{
    FAILURE_TAG, FRAME_HEADER_SIZE, FrameHeader, MAX_BODY_SIZE, ORDER_TAG, Order, OrderResult,
    ProtocolError, SUCCESS_TAG,
};

/// Largest slice of a frame body requested from the reader at once.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Transport failure. Always terminal for the connection it happened on.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("peer hung up after {transferred} of {expected} bytes")]
    HangUp { transferred: usize, expected: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected frame tag {0:?}")]
    UnexpectedTag([u8; 4]),

    #[error("frame body of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("malformed message: {0}")]
    Protocol(#[from] ProtocolError),
}

impl WireError {
    /// True when the peer closed the socket between two messages.
    pub fn is_clean_disconnect(&self) -> bool {
        matches!(
            self,
            WireError::HangUp {
                transferred: 0,
                ..
            }
        )
    }
}

/// Fills `buf` completely from `reader`.
///
/// Returns `buf.len()` on success. An empty buffer succeeds immediately
/// without touching the reader. End of stream before the buffer is full is
/// a [`WireError::HangUp`].
pub async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let expected = buf.len();
    let mut filled = 0;
    let mut calls = 0usize;

    while filled < expected {
        calls += 1;
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => {
                return Err(WireError::HangUp {
                    transferred: filled,
                    expected,
                });
            }
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if calls > 1 {
        tracing::trace!(bytes = expected, calls, "read completed in several parts");
    }
    Ok(filled)
}

/// Writes all of `buf` to `writer`.
///
/// A writer that accepts zero bytes has gone away and is reported as a
/// [`WireError::HangUp`].
pub async fn write_exact<W>(writer: &mut W, buf: &[u8]) -> Result<usize, WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let expected = buf.len();
    let mut written = 0;
    let mut calls = 0usize;

    while written < expected {
        calls += 1;
        match writer.write(&buf[written..]).await {
            Ok(0) => {
                return Err(WireError::HangUp {
                    transferred: written,
                    expected,
                });
            }
            Ok(n) => written += n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                tokio::task::yield_now().await;
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                return Err(WireError::HangUp {
                    transferred: written,
                    expected,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    if calls > 1 {
        tracing::trace!(bytes = expected, calls, "write completed in several parts");
    }
    Ok(written)
}

/// Reads one frame and returns its tag and body.
pub async fn read_frame<R>(reader: &mut R) -> Result<([u8; 4], BytesMut), WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    read_exact(reader, &mut raw).await?;
    let header = FrameHeader::parse(&raw);

    let length = header.length as usize;
    if length > MAX_BODY_SIZE {
        return Err(WireError::FrameTooLarge(length));
    }

    // Grows one chunk at a time with the bytes that actually arrive.
    let mut body = BytesMut::with_capacity(length.min(READ_CHUNK_SIZE));
    while body.len() < length {
        let start = body.len();
        let end = start + (length - start).min(READ_CHUNK_SIZE);
        body.resize(end, 0);
        read_exact(reader, &mut body[start..end])
            .await
            .map_err(|e| match e {
                // The header made it, so a hang-up here is mid-frame.
                WireError::HangUp { transferred, .. } => WireError::HangUp {
                    transferred: FRAME_HEADER_SIZE + start + transferred,
                    expected: FRAME_HEADER_SIZE + length,
                },
                other => other,
            })?;
    }
    Ok((header.tag, body))
}

/// Reads and decodes the next order.
pub async fn read_order<R>(reader: &mut R) -> Result<Order, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (tag, mut body) = read_frame(reader).await?;
    if tag != ORDER_TAG {
        return Err(WireError::UnexpectedTag(tag));
    }
    Ok(Order::decode(&mut body)?)
}

/// Reads and decodes the next result.
pub async fn read_result<R>(reader: &mut R) -> Result<OrderResult, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (tag, mut body) = read_frame(reader).await?;
    let succeeded = match tag {
        SUCCESS_TAG => true,
        FAILURE_TAG => false,
        other => return Err(WireError::UnexpectedTag(other)),
    };
    Ok(OrderResult::decode_body(succeeded, &mut body)?)
}

/// Encodes `body` behind a header and writes the whole frame.
async fn write_frame<W, F>(writer: &mut W, tag: [u8; 4], encode: F) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
    F: FnOnce(&mut BytesMut) -> Result<(), ProtocolError>,
{
    let mut frame = BytesMut::zeroed(FRAME_HEADER_SIZE);
    encode(&mut frame)?;

    let length = frame.len() - FRAME_HEADER_SIZE;
    if length > MAX_BODY_SIZE {
        return Err(WireError::FrameTooLarge(length));
    }
    frame[..FRAME_HEADER_SIZE].copy_from_slice(&FrameHeader::new(tag, length as u32).to_bytes());

    write_exact(writer, &frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes one result frame.
///
/// The frame is fully encoded before anything is written, so an encoding
/// failure leaves the stream untouched.
pub async fn write_result<W>(writer: &mut W, result: &OrderResult) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_frame(writer, result.tag(), |dst| result.encode_body(dst)).await
}

/// Writes one order frame.
pub async fn write_order<W>(writer: &mut W, order: &Order) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_frame(writer, ORDER_TAG, |dst| order.encode(dst)).await
}
