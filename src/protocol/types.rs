/// What an order asks the proxy to do.
///
/// The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OrderKind {
    /// Release a paging cursor.
    CloseCursor = 0,
    /// Run a paged query and keep it open as a cursor.
    DeclareCursor = 1,
    /// Return the cached cluster schema description.
    DescribeCluster = 2,
    /// Read the next page of an open cursor.
    FetchCursor = 3,
    /// Run a statement and return its first row.
    Rows = 4,
    /// Run a statement, no rows returned.
    Execute = 5,
}

impl TryFrom<u8> for OrderKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OrderKind::CloseCursor),
            1 => Ok(OrderKind::DeclareCursor),
            2 => Ok(OrderKind::DescribeCluster),
            3 => Ok(OrderKind::FetchCursor),
            4 => Ok(OrderKind::Rows),
            5 => Ok(OrderKind::Execute),
            _ => Err(value),
        }
    }
}

impl OrderKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this kind sends its statement to the cluster.
    pub fn runs_statement(self) -> bool {
        matches!(
            self,
            OrderKind::Execute | OrderKind::Rows | OrderKind::DeclareCursor
        )
    }
}

/// Per-query consistency level, passed through to the cluster untouched.
///
/// Codes follow the CQL native protocol; `Default` (0xFFFF) lets the driver
/// pick its configured level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Consistency {
    #[default]
    Default,
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl TryFrom<u16> for Consistency {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(Consistency::Any),
            0x0001 => Ok(Consistency::One),
            0x0002 => Ok(Consistency::Two),
            0x0003 => Ok(Consistency::Three),
            0x0004 => Ok(Consistency::Quorum),
            0x0005 => Ok(Consistency::All),
            0x0006 => Ok(Consistency::LocalQuorum),
            0x0007 => Ok(Consistency::EachQuorum),
            0x0008 => Ok(Consistency::Serial),
            0x0009 => Ok(Consistency::LocalSerial),
            0x000A => Ok(Consistency::LocalOne),
            0xFFFF => Ok(Consistency::Default),
            _ => Err(value),
        }
    }
}

impl Consistency {
    pub fn as_u16(self) -> u16 {
        match self {
            Consistency::Any => 0x0000,
            Consistency::One => 0x0001,
            Consistency::Two => 0x0002,
            Consistency::Three => 0x0003,
            Consistency::Quorum => 0x0004,
            Consistency::All => 0x0005,
            Consistency::LocalQuorum => 0x0006,
            Consistency::EachQuorum => 0x0007,
            Consistency::Serial => 0x0008,
            Consistency::LocalSerial => 0x0009,
            Consistency::LocalOne => 0x000A,
            Consistency::Default => 0xFFFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_kind_codes() {
        assert_eq!(OrderKind::try_from(5), Ok(OrderKind::Execute));
        assert_eq!(OrderKind::CloseCursor.as_u8(), 0);
        assert_eq!(OrderKind::try_from(6), Err(6));
    }

    #[test]
    fn test_consistency_codes() {
        for code in (0x0000..=0x000A).chain([0xFFFF]) {
            let level = Consistency::try_from(code).unwrap();
            assert_eq!(level.as_u16(), code);
        }
        assert_eq!(Consistency::try_from(0x000B), Err(0x000B));
    }
}
