use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::ProtocolError;

/// Tag of a frame carrying an [`Order`](crate::protocol::Order).
pub const ORDER_TAG: [u8; 4] = *b"CQLP";

/// Tag of a frame carrying a successful [`OrderResult`](crate::protocol::OrderResult).
pub const SUCCESS_TAG: [u8; 4] = *b"SUCS";

/// Tag of a frame carrying a failed [`OrderResult`](crate::protocol::OrderResult).
pub const FAILURE_TAG: [u8; 4] = *b"EROR";

/// Tag (4 bytes) followed by the body length (4 bytes).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum frame body size in bytes (64 MB).
/// Matches the largest cell value the cluster client library accepts.
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Ensures that the buffer has at least `n` bytes remaining.
macro_rules! ensure_remaining {
    ($buf:expr, $n:expr) => {
        if $buf.len() < $n {
            return Err(ProtocolError::InsufficientData {
                needed: $n,
                available: $buf.len(),
            });
        }
    };
}

pub(crate) use ensure_remaining;

/// Fixed-size header in front of every message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: [u8; 4],
    pub length: u32,
}

impl FrameHeader {
    pub fn new(tag: [u8; 4], length: u32) -> Self {
        Self { tag, length }
    }

    pub fn parse(raw: &[u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            tag: [raw[0], raw[1], raw[2], raw[3]],
            length: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    pub fn to_bytes(self) -> [u8; FRAME_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [
            self.tag[0],
            self.tag[1],
            self.tag[2],
            self.tag[3],
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }
}

/// Read a length-prefixed blob: `u32` length followed by that many bytes.
pub fn get_blob(src: &mut BytesMut) -> Result<Bytes, ProtocolError> {
    ensure_remaining!(src, 4);
    let len = src.get_u32() as usize;
    ensure_remaining!(src, len);
    Ok(src.split_to(len).freeze())
}

/// Write a length-prefixed blob.
pub fn put_blob(dst: &mut BytesMut, blob: &[u8]) -> Result<(), ProtocolError> {
    if blob.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::BlobTooLarge(blob.len()));
    }
    dst.put_u32(blob.len() as u32);
    dst.put_slice(blob);
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
pub fn get_string(src: &mut BytesMut) -> Result<String, ProtocolError> {
    let raw = get_blob(src)?;
    Ok(String::from_utf8(raw.to_vec())?)
}
