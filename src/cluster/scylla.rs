//! Cluster backend over the `scylla` driver.

use std::net::IpAddr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use scylla::execution_profile::ExecutionProfile;
use scylla::frame::response::result::CqlValue;
use scylla::query::Query;
use scylla::statement::{PagingState, PagingStateResponse};
use scylla::transport::errors::QueryError;
use scylla::{Session, SessionBuilder};

use crate::cluster::{Cluster, ClusterError, Row, Statement};
use crate::protocol::Consistency;
use crate::protocol::codec::put_blob;

const SCHEMA_QUERY: &str = "SELECT keyspace_name, table_name, column_name, kind, position, type \
                            FROM system_schema.columns";

/// A driver session plus what is needed to open another one like it.
pub struct ScyllaCluster {
    session: Session,
    known_nodes: Vec<String>,
    timeout: Option<Duration>,
}

/// Statement and driver paging state of an open cursor.
pub struct ScyllaPager {
    query: Query,
    values: Vec<CqlValue>,
    state: Option<PagingState>,
}

impl ScyllaCluster {
    /// Connects to the cluster through the given contact points.
    pub async fn connect(hosts: &[String], port: u16) -> Result<Self, ClusterError> {
        let known_nodes = hosts.iter().map(|h| format!("{h}:{port}")).collect();
        Self::build(known_nodes, None).await
    }

    async fn build(known_nodes: Vec<String>, timeout: Option<Duration>) -> Result<Self, ClusterError> {
        let mut builder = SessionBuilder::new().known_nodes(&known_nodes);
        if let Some(timeout) = timeout {
            let profile = ExecutionProfile::builder()
                .request_timeout(Some(timeout))
                .build();
            builder = builder.default_execution_profile_handle(profile.into_handle());
        }

        let session = builder
            .build()
            .await
            .map_err(|e| ClusterError::Connect(e.to_string()))?;
        tracing::info!(nodes = ?known_nodes, ?timeout, "connected to cluster");

        Ok(Self {
            session,
            known_nodes,
            timeout,
        })
    }

    fn query_error(&self, e: QueryError) -> ClusterError {
        match e {
            QueryError::RequestTimeout(_) => ClusterError::Timeout(self.timeout.unwrap_or_default()),
            other => ClusterError::Query(other.to_string()),
        }
    }
}

fn prepare(statement: &Statement) -> (Query, Vec<CqlValue>) {
    use scylla::statement::Consistency as Cl;

    let mut query = Query::new(statement.cql.clone());
    let consistency = match statement.consistency {
        Consistency::Default => None,
        Consistency::Any => Some(Cl::Any),
        Consistency::One => Some(Cl::One),
        Consistency::Two => Some(Cl::Two),
        Consistency::Three => Some(Cl::Three),
        Consistency::Quorum => Some(Cl::Quorum),
        Consistency::All => Some(Cl::All),
        Consistency::LocalQuorum => Some(Cl::LocalQuorum),
        Consistency::EachQuorum => Some(Cl::EachQuorum),
        Consistency::Serial => Some(Cl::Serial),
        Consistency::LocalSerial => Some(Cl::LocalSerial),
        Consistency::LocalOne => Some(Cl::LocalOne),
    };
    if let Some(consistency) = consistency {
        query.set_consistency(consistency);
    }
    query.set_timestamp(statement.timestamp);
    if let Some(page_size) = statement.paging_size {
        query.set_page_size(i32::try_from(page_size).unwrap_or(i32::MAX));
    }

    // Parameters arrive already encoded; they bind as blobs.
    let values = statement
        .parameters
        .iter()
        .map(|p| CqlValue::Blob(p.to_vec()))
        .collect();
    (query, values)
}

/// Native CQL serialization of one cell; a null cell becomes an empty blob.
fn cell_bytes(value: Option<&CqlValue>) -> Result<Bytes, ClusterError> {
    let mut buf = BytesMut::new();
    if let Some(value) = value {
        put_value(&mut buf, value)?;
    }
    Ok(buf.freeze())
}

fn put_value(dst: &mut BytesMut, value: &CqlValue) -> Result<(), ClusterError> {
    match value {
        CqlValue::Empty => {}
        CqlValue::Blob(b) => dst.put_slice(b),
        CqlValue::Ascii(s) | CqlValue::Text(s) => dst.put_slice(s.as_bytes()),
        CqlValue::Boolean(b) => dst.put_u8(u8::from(*b)),
        CqlValue::TinyInt(v) => dst.put_i8(*v),
        CqlValue::SmallInt(v) => dst.put_i16(*v),
        CqlValue::Int(v) => dst.put_i32(*v),
        CqlValue::BigInt(v) => dst.put_i64(*v),
        CqlValue::Counter(c) => dst.put_i64(c.0),
        CqlValue::Float(v) => dst.put_f32(*v),
        CqlValue::Double(v) => dst.put_f64(*v),
        CqlValue::Timestamp(t) => dst.put_i64(t.0),
        CqlValue::Date(d) => dst.put_u32(d.0),
        CqlValue::Time(t) => dst.put_i64(t.0),
        CqlValue::Uuid(u) => dst.put_slice(u.as_bytes()),
        CqlValue::Timeuuid(u) => dst.put_slice(u.as_bytes()),
        CqlValue::Inet(IpAddr::V4(ip)) => dst.put_slice(&ip.octets()),
        CqlValue::Inet(IpAddr::V6(ip)) => dst.put_slice(&ip.octets()),
        CqlValue::Varint(v) => dst.put_slice(v.as_signed_bytes_be_slice()),
        CqlValue::Decimal(d) => {
            let (digits, scale) = d.as_signed_be_bytes_slice_and_exponent();
            dst.put_i32(scale);
            dst.put_slice(digits);
        }
        CqlValue::Duration(d) => {
            put_vint(dst, i64::from(d.months));
            put_vint(dst, i64::from(d.days));
            put_vint(dst, d.nanoseconds);
        }
        CqlValue::List(items) | CqlValue::Set(items) => {
            put_count(dst, items.len())?;
            for item in items {
                put_element(dst, Some(item))?;
            }
        }
        CqlValue::Map(entries) => {
            put_count(dst, entries.len())?;
            for (key, value) in entries {
                put_element(dst, Some(key))?;
                put_element(dst, Some(value))?;
            }
        }
        CqlValue::Tuple(fields) => {
            for field in fields {
                put_element(dst, field.as_ref())?;
            }
        }
        CqlValue::UserDefinedType { fields, .. } => {
            for (_, field) in fields {
                put_element(dst, field.as_ref())?;
            }
        }
    }
    Ok(())
}

fn put_count(dst: &mut BytesMut, count: usize) -> Result<(), ClusterError> {
    let count = i32::try_from(count)
        .map_err(|_| ClusterError::Value(format!("{count} collection elements")))?;
    dst.put_i32(count);
    Ok(())
}

/// Length-prefixed element of a collection, tuple or UDT; `-1` marks null.
fn put_element(dst: &mut BytesMut, value: Option<&CqlValue>) -> Result<(), ClusterError> {
    let Some(value) = value else {
        dst.put_i32(-1);
        return Ok(());
    };
    let mut element = BytesMut::new();
    put_value(&mut element, value)?;
    let len = i32::try_from(element.len())
        .map_err(|_| ClusterError::Value(format!("element of {} bytes", element.len())))?;
    dst.put_i32(len);
    dst.put_slice(&element);
    Ok(())
}

/// Zigzag-encoded variable length integer, as used by `duration`.
fn put_vint(dst: &mut BytesMut, value: i64) {
    let zigzag = ((value << 1) ^ (value >> 63)) as u64;
    let magnitude = (zigzag | 1).leading_zeros() as usize;
    let size = (639 - magnitude * 9) >> 6;
    if size == 9 {
        dst.put_u8(0xff);
        dst.put_u64(zigzag);
        return;
    }
    // The first byte announces the number of extra bytes with leading ones.
    let be = zigzag.to_be_bytes();
    let extra = size - 1;
    dst.put_u8(be[8 - size] | !(0xffu8 >> extra));
    dst.put_slice(&be[9 - size..]);
}

fn convert_rows(rows: Vec<scylla::frame::response::result::Row>) -> Result<Vec<Row>, ClusterError> {
    rows.iter()
        .map(|row| row.columns.iter().map(|c| cell_bytes(c.as_ref())).collect())
        .collect()
}

impl Cluster for ScyllaCluster {
    type Pager = ScyllaPager;

    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>, ClusterError> {
        let (query, values) = prepare(statement);
        let result = self
            .session
            .query_unpaged(query, values)
            .await
            .map_err(|e| self.query_error(e))?;
        convert_rows(result.rows_or_empty())
    }

    async fn start_paged(&self, statement: &Statement) -> Result<(ScyllaPager, Vec<Row>), ClusterError> {
        let (query, values) = prepare(statement);
        let mut pager = ScyllaPager {
            query,
            values,
            state: Some(PagingState::start()),
        };
        let first = self.next_page(&mut pager).await?.unwrap_or_default();
        Ok((pager, first))
    }

    async fn next_page(&self, pager: &mut ScyllaPager) -> Result<Option<Vec<Row>>, ClusterError> {
        let Some(state) = pager.state.take() else {
            return Ok(None);
        };
        let (result, response) = self
            .session
            .query_single_page(pager.query.clone(), &pager.values, state)
            .await
            .map_err(|e| self.query_error(e))?;
        pager.state = match response {
            PagingStateResponse::HasMorePages { state } => Some(state),
            PagingStateResponse::NoMorePages => None,
        };
        convert_rows(result.rows_or_empty()).map(Some)
    }

    async fn describe_schema(&self) -> Result<Bytes, ClusterError> {
        let result = self
            .session
            .query_unpaged(SCHEMA_QUERY, &[])
            .await
            .map_err(|e| ClusterError::Schema(e.to_string()))?;
        let rows = convert_rows(result.rows_or_empty())?;

        let mut blob = BytesMut::new();
        blob.put_u32(rows.len() as u32);
        for row in &rows {
            blob.put_u16(row.len() as u16);
            for cell in row {
                put_blob(&mut blob, cell).map_err(|e| ClusterError::Schema(e.to_string()))?;
            }
        }
        tracing::debug!(columns = rows.len(), bytes = blob.len(), "schema introspected");
        Ok(blob.freeze())
    }

    async fn connect_with_timeout(&self, timeout: Duration) -> Result<Self, ClusterError> {
        Self::build(self.known_nodes.clone(), Some(timeout)).await
    }
}
