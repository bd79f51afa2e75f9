use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::codec::{ensure_remaining, get_blob, put_blob};
use crate::protocol::{FAILURE_TAG, MAX_BODY_SIZE, ProtocolError, SUCCESS_TAG};

/// Largest number of blobs one result can carry (the count is a `u16`).
pub const MAX_RESULT_BLOBS: usize = u16::MAX as usize;

/// Reply to one [`Order`](crate::protocol::Order).
///
/// Rows are flattened into a single list of blobs; the receiver regroups
/// them with the column count it already knows from the order it sent.
/// For Declare-Cursor replies the first blob is the new cursor index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderResult {
    succeeded: bool,
    blobs: Vec<Bytes>,
}

impl OrderResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            blobs: Vec::new(),
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn push(&mut self, blob: Bytes) {
        self.blobs.push(blob);
    }

    pub fn blobs(&self) -> &[Bytes] {
        &self.blobs
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Frame tag announcing this result.
    pub fn tag(&self) -> [u8; 4] {
        if self.succeeded {
            SUCCESS_TAG
        } else {
            FAILURE_TAG
        }
    }

    /// Regroups all blobs into rows of `column_count` values.
    pub fn rows(&self, column_count: usize) -> std::slice::Chunks<'_, Bytes> {
        Self::chunk(&self.blobs, column_count)
    }

    /// Cursor index carried by a Declare-Cursor reply.
    pub fn cursor_index(&self) -> Option<u32> {
        let first = self.blobs.first()?;
        let raw: [u8; 4] = first.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    /// Rows of a Declare-Cursor reply, skipping the cursor index.
    pub fn cursor_rows(&self, column_count: usize) -> std::slice::Chunks<'_, Bytes> {
        let rest = self.blobs.get(1..).unwrap_or_default();
        Self::chunk(rest, column_count)
    }

    fn chunk(blobs: &[Bytes], column_count: usize) -> std::slice::Chunks<'_, Bytes> {
        if column_count == 0 {
            return blobs[..0].chunks(1);
        }
        blobs.chunks(column_count)
    }

    /// Size of the encoded body: the blob count plus each length-prefixed blob.
    pub fn encoded_len(&self) -> usize {
        2 + self.blobs.iter().map(|b| 4 + b.len()).sum::<usize>()
    }

    /// Checks that the result fits in a single frame.
    pub fn check_encodable(&self) -> Result<(), ProtocolError> {
        if self.blobs.len() > MAX_RESULT_BLOBS {
            return Err(ProtocolError::TooMany {
                what: "result blobs",
                count: self.blobs.len(),
                limit: MAX_RESULT_BLOBS,
            });
        }
        let len = self.encoded_len();
        if len > MAX_BODY_SIZE {
            return Err(ProtocolError::BodyTooLarge(len));
        }
        Ok(())
    }

    /// Appends the result body (blob count and blobs) to `dst`.
    ///
    /// Nothing is written when the result is too large to encode.
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.check_encodable()?;

        let mut body = BytesMut::with_capacity(self.encoded_len());
        body.put_u16(self.blobs.len() as u16);
        for blob in &self.blobs {
            put_blob(&mut body, blob)?;
        }
        dst.unsplit(body);
        Ok(())
    }

    /// Decodes a result body whose success flag came from the frame tag.
    pub fn decode_body(succeeded: bool, src: &mut BytesMut) -> Result<Self, ProtocolError> {
        ensure_remaining!(src, 2);
        let count = src.get_u16() as usize;
        let mut blobs = Vec::with_capacity(count);
        for _ in 0..count {
            blobs.push(get_blob(src)?);
        }
        if !src.is_empty() {
            return Err(ProtocolError::TrailingBytes(src.len()));
        }
        Ok(Self { succeeded, blobs })
    }
}
