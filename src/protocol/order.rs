use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::codec::{ensure_remaining, get_blob, get_string, put_blob};
use crate::protocol::{Consistency, OrderKind, ProtocolError};

const FLAG_CLEAR_SCHEMA_CACHE: u8 = 0x01;
const FLAG_HAS_TIMESTAMP: u8 = 0x02;
const KNOWN_FLAGS: u8 = FLAG_CLEAR_SCHEMA_CACHE | FLAG_HAS_TIMESTAMP;

/// kind(1) + flags(1) + consistency(2) + timestamp(8) + paging size(4)
/// + timeout(8) + cursor index(4) + column count(2)
const FIXED_PART_SIZE: usize = 30;

/// One client request.
///
/// Orders are decoded from a `CQLP` frame, handled once and dropped after
/// their result has been written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub kind: OrderKind,
    /// Statement text, passed through to the cluster as is.
    pub statement: String,
    /// Values bound positionally to the statement markers.
    pub parameters: Vec<Bytes>,
    pub consistency: Consistency,
    /// Client-supplied write timestamp in microseconds.
    pub timestamp: Option<i64>,
    /// Rows per page; zero or negative leaves paging to the driver.
    pub paging_size: i32,
    /// Request timeout in milliseconds; zero or negative uses the session default.
    pub timeout_ms: i64,
    /// Cursor addressed by Fetch-Cursor and Close-Cursor orders.
    pub cursor_index: i32,
    /// Number of columns the client expects in each returned row.
    pub column_count: u16,
    /// The statement may change the schema, drop the cached description.
    pub clears_schema_cache: bool,
}

impl Order {
    pub fn new(kind: OrderKind, statement: impl Into<String>) -> Self {
        Self {
            kind,
            statement: statement.into(),
            parameters: Vec::new(),
            consistency: Consistency::Quorum,
            timestamp: None,
            paging_size: 0,
            timeout_ms: 0,
            cursor_index: 0,
            column_count: 0,
            clears_schema_cache: false,
        }
    }

    pub fn execute(statement: impl Into<String>) -> Self {
        Self::new(OrderKind::Execute, statement)
    }

    pub fn rows(statement: impl Into<String>, column_count: u16) -> Self {
        Self::new(OrderKind::Rows, statement).with_column_count(column_count)
    }

    pub fn declare_cursor(statement: impl Into<String>, column_count: u16, paging_size: i32) -> Self {
        let mut order = Self::new(OrderKind::DeclareCursor, statement).with_column_count(column_count);
        order.paging_size = paging_size;
        order
    }

    pub fn fetch_cursor(cursor_index: i32) -> Self {
        let mut order = Self::new(OrderKind::FetchCursor, "");
        order.cursor_index = cursor_index;
        order
    }

    pub fn close_cursor(cursor_index: i32) -> Self {
        let mut order = Self::new(OrderKind::CloseCursor, "");
        order.cursor_index = cursor_index;
        order
    }

    pub fn describe_cluster() -> Self {
        Self::new(OrderKind::DescribeCluster, "")
    }

    pub fn with_parameter(mut self, value: impl Into<Bytes>) -> Self {
        self.parameters.push(value.into());
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_column_count(mut self, column_count: u16) -> Self {
        self.column_count = column_count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        self
    }

    pub fn clearing_schema_cache(mut self) -> Self {
        self.clears_schema_cache = true;
        self
    }

    /// Timeout overriding the session default, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms as u64))
    }

    /// Page size requested by the client, if any.
    pub fn paging_size(&self) -> Option<u32> {
        (self.paging_size > 0).then_some(self.paging_size as u32)
    }

    /// Appends the order body (without frame header) to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.parameters.len() > u16::MAX as usize {
            return Err(ProtocolError::TooMany {
                what: "parameters",
                count: self.parameters.len(),
                limit: u16::MAX as usize,
            });
        }

        let mut flags = 0;
        if self.clears_schema_cache {
            flags |= FLAG_CLEAR_SCHEMA_CACHE;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_HAS_TIMESTAMP;
        }

        dst.reserve(FIXED_PART_SIZE + 4 + self.statement.len() + 2);
        dst.put_u8(self.kind.as_u8());
        dst.put_u8(flags);
        dst.put_u16(self.consistency.as_u16());
        dst.put_i64(self.timestamp.unwrap_or(0));
        dst.put_i32(self.paging_size);
        dst.put_i64(self.timeout_ms);
        dst.put_i32(self.cursor_index);
        dst.put_u16(self.column_count);
        put_blob(dst, self.statement.as_bytes())?;
        dst.put_u16(self.parameters.len() as u16);
        for parameter in &self.parameters {
            put_blob(dst, parameter)?;
        }
        Ok(())
    }

    /// Decodes a complete order body. The whole buffer must be consumed.
    pub fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        ensure_remaining!(src, FIXED_PART_SIZE);

        let kind = OrderKind::try_from(src.get_u8()).map_err(ProtocolError::UnknownOrderKind)?;
        let flags = src.get_u8();
        if flags & !KNOWN_FLAGS != 0 {
            return Err(ProtocolError::ReservedFlags(flags));
        }
        let consistency =
            Consistency::try_from(src.get_u16()).map_err(ProtocolError::UnknownConsistency)?;
        let timestamp = src.get_i64();
        let paging_size = src.get_i32();
        let timeout_ms = src.get_i64();
        let cursor_index = src.get_i32();
        let column_count = src.get_u16();
        let statement = get_string(src)?;

        ensure_remaining!(src, 2);
        let parameter_count = src.get_u16() as usize;
        let mut parameters = Vec::with_capacity(parameter_count);
        for _ in 0..parameter_count {
            parameters.push(get_blob(src)?);
        }

        if !src.is_empty() {
            return Err(ProtocolError::TrailingBytes(src.len()));
        }

        Ok(Self {
            kind,
            statement,
            parameters,
            consistency,
            timestamp: (flags & FLAG_HAS_TIMESTAMP != 0).then_some(timestamp),
            paging_size,
            timeout_ms,
            cursor_index,
            column_count,
            clears_schema_cache: flags & FLAG_CLEAR_SCHEMA_CACHE != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(order: &Order) -> BytesMut {
        let mut buf = BytesMut::new();
        order.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_order_roundtrip_with_all_fields() {
        let order = Order::declare_cursor("SELECT k, v FROM t WHERE p = ?", 2, 100)
            .with_parameter(Bytes::from_static(b"\x00\x01"))
            .with_parameter(Bytes::new())
            .with_parameter(vec![0xAB; 70_000])
            .with_consistency(Consistency::LocalQuorum)
            .with_timestamp(1_700_000_000_000_000)
            .with_timeout(Duration::from_secs(30))
            .clearing_schema_cache();

        let mut buf = encoded(&order);
        let decoded = Order::decode(&mut buf).unwrap();
        assert_eq!(decoded, order);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_order_fixed_layout() {
        let order = Order::fetch_cursor(7);
        let buf = encoded(&order);

        assert_eq!(buf[0], OrderKind::FetchCursor.as_u8());
        assert_eq!(buf[1], 0); // no flags
        assert_eq!(&buf[2..4], &[0x00, 0x04]); // QUORUM
        assert_eq!(&buf[24..28], &[0, 0, 0, 7]); // cursor index
        assert_eq!(&buf[30..34], &[0, 0, 0, 0]); // empty statement
        assert_eq!(&buf[34..36], &[0, 0]); // no parameters
        assert_eq!(buf.len(), 36);
    }

    #[test]
    fn test_timestamp_absent_unless_flagged() {
        let mut buf = encoded(&Order::execute("INSERT"));
        assert_eq!(Order::decode(&mut buf).unwrap().timestamp, None);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let mut buf = encoded(&Order::execute("x"));
        buf[0] = 42;
        assert!(matches!(
            Order::decode(&mut buf),
            Err(ProtocolError::UnknownOrderKind(42))
        ));
    }

    #[test]
    fn test_decode_reserved_flags() {
        let mut buf = encoded(&Order::execute("x"));
        buf[1] = 0x80;
        assert!(matches!(
            Order::decode(&mut buf),
            Err(ProtocolError::ReservedFlags(0x80))
        ));
    }

    #[test]
    fn test_decode_truncated_parameter() {
        let buf = encoded(&Order::execute("x").with_parameter(Bytes::from_static(b"hello")));
        let mut truncated = BytesMut::from(&buf[..buf.len() - 2]);
        assert!(matches!(
            Order::decode(&mut truncated),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut buf = encoded(&Order::describe_cluster());
        buf.put_u8(0);
        assert!(matches!(
            Order::decode(&mut buf),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_timeout_and_paging_helpers() {
        let mut order = Order::execute("x");
        assert_eq!(order.timeout(), None);
        assert_eq!(order.paging_size(), None);

        order.timeout_ms = 1500;
        order.paging_size = -1;
        assert_eq!(order.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(order.paging_size(), None);
    }
}
