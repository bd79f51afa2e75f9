
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use dbproxy::client::ClientError;
use dbproxy::cluster::MemoryCluster;
use dbproxy::protocol::{Consistency, Order, OrderKind};
use dbproxy::wire;

use proxy_test_support::{ProxyTestServer, key_value_rows, row};

const SELECT_KV: &str = "SELECT k, v FROM ks.kv";

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_create_returns_empty_success() {
    let server = ProxyTestServer::start(MemoryCluster::new()).await;
    let mut client = server.client().await;

    let order = Order::execute("CREATE TABLE ks.kv (k text PRIMARY KEY, v text)")
        .with_consistency(Consistency::Quorum);
    let result = client.send(&order).await.unwrap();

    assert!(result.succeeded());
    assert!(result.is_empty());

    let executed = server.cluster.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].statement.consistency, Consistency::Quorum);
    assert_eq!(executed[0].timeout, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cursor_pages_through_result() {
    let cluster = MemoryCluster::new().with_result(SELECT_KV, key_value_rows(5));
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    let declared = client
        .send(&Order::declare_cursor(SELECT_KV, 2, 2))
        .await
        .unwrap();
    assert!(declared.succeeded());
    assert_eq!(declared.cursor_index(), Some(0));
    assert_eq!(declared.len(), 1 + 4);
    assert_eq!(declared.cursor_rows(2).next().unwrap(), &row(&["k0", "v0"])[..]);

    let page = client.fetch_cursor(0, 2).await.unwrap();
    assert_eq!(page, vec![row(&["k2", "v2"]), row(&["k3", "v3"])]);

    let page = client.fetch_cursor(0, 2).await.unwrap();
    assert_eq!(page, vec![row(&["k4", "v4"])]);

    let end = client.send(&Order::fetch_cursor(0)).await.unwrap();
    assert!(end.succeeded());
    assert!(end.is_empty());

    client.close_cursor(0).await.unwrap();
    assert!(matches!(
        client.fetch_cursor(0, 2).await,
        Err(ClientError::Failed(OrderKind::FetchCursor))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cursor_indices_are_never_reassigned() {
    let cluster = MemoryCluster::new().with_result(SELECT_KV, key_value_rows(1));
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    for expected in 0..3 {
        let (index, _) = client.declare_cursor(SELECT_KV, 2, 1).await.unwrap();
        assert_eq!(index, expected);
    }

    // A closed slot in the middle stays closed.
    client.close_cursor(1).await.unwrap();
    let (index, _) = client.declare_cursor(SELECT_KV, 2, 1).await.unwrap();
    assert_eq!(index, 3);
    assert!(client.fetch_cursor(1, 2).await.is_err());
    assert!(client.fetch_cursor(2, 2).await.is_ok());

    // Closing the highest open cursor gives its index back.
    client.close_cursor(3).await.unwrap();
    let (index, _) = client.declare_cursor(SELECT_KV, 2, 1).await.unwrap();
    assert_eq!(index, 3);

    // Never issued.
    assert!(client.close_cursor(17).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_declare_takes_no_index() {
    let cluster = MemoryCluster::new().with_result(SELECT_KV, key_value_rows(40_000));
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    assert!(matches!(
        client.declare_cursor(SELECT_KV, 2, 40_000).await,
        Err(ClientError::Failed(OrderKind::DeclareCursor))
    ));
    let (index, first) = client.declare_cursor(SELECT_KV, 2, 3).await.unwrap();
    assert_eq!(index, 0);
    assert_eq!(first.len(), 3);
    assert!(client.fetch_cursor(1, 2).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connections_have_separate_cursors() {
    let cluster = MemoryCluster::new()
        .with_result("SELECT a", vec![row(&["a1"]), row(&["a2"])])
        .with_result("SELECT b", vec![row(&["b1"]), row(&["b2"])]);
    let server = ProxyTestServer::start(cluster).await;
    let mut a = server.client().await;
    let mut b = server.client().await;

    let (index_a, first_a) = a.declare_cursor("SELECT a", 1, 1).await.unwrap();
    let (index_b, first_b) = b.declare_cursor("SELECT b", 1, 1).await.unwrap();
    assert_eq!((index_a, index_b), (0, 0));
    assert_eq!(first_a, vec![row(&["a1"])]);
    assert_eq!(first_b, vec![row(&["b1"])]);

    b.close_cursor(0).await.unwrap();
    assert_eq!(a.fetch_cursor(0, 1).await.unwrap(), vec![row(&["a2"])]);
    assert!(b.fetch_cursor(0, 1).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hang_up_mid_frame_leaves_others_untouched() {
    let cluster = MemoryCluster::new().with_result(SELECT_KV, key_value_rows(4));
    let server = ProxyTestServer::start(cluster).await;

    let mut survivor = server.client().await;
    survivor.declare_cursor(SELECT_KV, 2, 2).await.unwrap();
    let schema = survivor.describe_cluster().await.unwrap();

    let mut frame = Vec::new();
    wire::write_order(&mut frame, &Order::declare_cursor(SELECT_KV, 2, 2))
        .await
        .unwrap();
    let mut quitter = server.connect_raw().await;
    quitter.write_all(&frame[..frame.len() / 2]).await.unwrap();
    drop(quitter);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let page = survivor.fetch_cursor(0, 2).await.unwrap();
    assert_eq!(page, vec![row(&["k2", "v2"]), row(&["k3", "v3"])]);
    assert!(server.schema_cache.is_populated().await);
    assert_eq!(survivor.describe_cluster().await.unwrap(), schema);
    assert_eq!(server.cluster.describe_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schema_cache_shared_and_invalidated() {
    let server = ProxyTestServer::start(MemoryCluster::new()).await;
    let mut a = server.client().await;
    let mut b = server.client().await;

    let first = a.describe_cluster().await.unwrap();
    assert_eq!(b.describe_cluster().await.unwrap(), first);
    assert_eq!(server.cluster.describe_calls(), 1);

    let alter = Order::execute("ALTER TABLE ks.kv ADD extra text").clearing_schema_cache();
    assert!(b.send(&alter).await.unwrap().succeeded());

    let second = a.describe_cluster().await.unwrap();
    assert_ne!(second, first);
    assert_eq!(server.cluster.describe_calls(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_describe_introspects_once() {
    let cluster = MemoryCluster::new()
        .with_schema(Bytes::from_static(b"keyspaces"))
        .with_describe_delay(Duration::from_millis(50));
    let server = ProxyTestServer::start(cluster).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let mut client = server.client().await;
        tasks.push(tokio::spawn(async move {
            client.describe_cluster().await.unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), "keyspaces");
    }
    assert_eq!(server.cluster.describe_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_order_keeps_connection() {
    let cluster = MemoryCluster::new().fail_on("INSERT INTO missing (k) VALUES (1)", "unconfigured table");
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    assert!(matches!(
        client.execute("INSERT INTO missing (k) VALUES (1)").await,
        Err(ClientError::Failed(OrderKind::Execute))
    ));
    assert!(client.fetch_cursor(0, 1).await.is_err());
    client.execute("INSERT INTO ks.kv (k, v) VALUES ('a', 'b')").await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rows_with_parameters() {
    let cluster = MemoryCluster::new().with_result(
        "SELECT v FROM ks.kv WHERE k = ?",
        vec![row(&["value"])],
    );
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    let order = Order::rows("SELECT v FROM ks.kv WHERE k = ?", 1)
        .with_parameter(Bytes::from_static(b"key"))
        .with_timestamp(1_234);
    let result = client.send(&order).await.unwrap();
    assert_eq!(result.blobs(), &[Bytes::from_static(b"value")]);

    let statement = &server.cluster.executed()[0].statement;
    assert_eq!(statement.parameters, vec![Bytes::from_static(b"key")]);
    assert_eq!(statement.timestamp, Some(1_234));

    assert_eq!(client.rows("SELECT nothing", 1).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_custom_timeout_uses_ephemeral_session() {
    let cluster = MemoryCluster::new().with_delay("SELECT slow", Duration::from_millis(300));
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    let order = Order::rows("SELECT slow", 1).with_timeout(Duration::from_millis(20));
    assert!(!client.send(&order).await.unwrap().succeeded());

    let quick = Order::execute("SELECT quick").with_timeout(Duration::from_secs(5));
    assert!(client.send(&quick).await.unwrap().succeeded());

    assert_eq!(
        server.cluster.derived_timeouts(),
        vec![Duration::from_millis(20), Duration::from_secs(5)]
    );
    let executed = server.cluster.executed();
    assert!(executed.iter().all(|e| e.timeout.is_some()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cursor_with_timeout_keeps_its_session() {
    let cluster = MemoryCluster::new().with_result(SELECT_KV, key_value_rows(3));
    let server = ProxyTestServer::start(cluster).await;
    let mut client = server.client().await;

    let declare = Order::declare_cursor(SELECT_KV, 2, 2).with_timeout(Duration::from_secs(2));
    let declared = client.send(&declare).await.unwrap();
    assert_eq!(declared.cursor_index(), Some(0));

    assert_eq!(client.fetch_cursor(0, 2).await.unwrap(), vec![row(&["k2", "v2"])]);
    assert_eq!(server.cluster.derived_timeouts(), vec![Duration::from_secs(2)]);
    assert_eq!(
        server.cluster.page_fetch_timeouts(),
        vec![Some(Duration::from_secs(2))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_disconnects_idle_clients() {
    let mut server = ProxyTestServer::start(MemoryCluster::new()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    wire::write_order(&mut stream, &Order::execute("USE ks")).await.unwrap();
    assert!(wire::read_result(&mut stream).await.unwrap().succeeded());

    server.stop().await;

    let err = wire::read_result(&mut stream).await.unwrap_err();
    assert!(err.is_clean_disconnect(), "unexpected error: {err}");
    assert!(TcpStream::connect(server.addr).await.is_err());
}
