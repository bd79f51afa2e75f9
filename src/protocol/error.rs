/// Errors raised while encoding or decoding a message body.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },

    #[error("unknown order kind: {0}")]
    UnknownOrderKind(u8),

    #[error("unknown consistency level: 0x{0:04x}")]
    UnknownConsistency(u16),

    #[error("reserved order flags set: 0x{0:02x}")]
    ReservedFlags(u8),

    #[error("invalid UTF-8 in statement")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("too many {what}: {count} (limit {limit})")]
    TooMany {
        what: &'static str,
        count: usize,
        limit: usize,
    },

    #[error("blob of {0} bytes exceeds the frame limit")]
    BlobTooLarge(usize),

    #[error("message body of {0} bytes exceeds the frame limit")]
    BodyTooLarge(usize),
}
