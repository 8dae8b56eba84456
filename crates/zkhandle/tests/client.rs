//! Integration tests for the zkhandle client: builder validation, the four
//! namespace operations with their sentinel and diagnostic forms, and the
//! close/drop lifecycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use zkhandle::prelude::*;
use zkhandle_testkit::MockServer;

// =========================================================================
// Helpers
// =========================================================================

async fn client_for(server: &MockServer) -> NamespaceClient {
    NamespaceClient::builder()
        .connect_string(server.connect_string())
        .session_timeout_ms(5_000)
        .build()
        .await
        .expect("client should build")
}

type Seen = Arc<Mutex<Vec<SessionState>>>;

fn recorder() -> (impl StateListener, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (move |state: SessionState| sink.lock().unwrap().push(state), seen)
}

async fn wait_for(seen: &Seen, state: SessionState) {
    for _ in 0..200 {
        if seen.lock().unwrap().contains(&state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("never saw {state}; saw {:?}", seen.lock().unwrap());
}

// =========================================================================
// Builder
// =========================================================================

#[tokio::test]
async fn test_build_rejects_blank_connect_strings() {
    for blank in ["", " ", "\t\n"] {
        let result = NamespaceClient::builder()
            .connect_string(blank)
            .session_timeout_ms(1_000)
            .build()
            .await;

        assert!(
            matches!(
                result,
                Err(ClientError::Config(ConfigError::BlankConnectString))
            ),
            "{blank:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_build_rejects_non_positive_timeouts() {
    for timeout in [0, -1, i32::MIN] {
        let result = NamespaceClient::builder()
            .connect_string("127.0.0.1:2181")
            .session_timeout_ms(timeout)
            .build()
            .await;

        assert!(
            matches!(
                result,
                Err(ClientError::Config(ConfigError::NonPositiveTimeout(t))) if t == timeout
            ),
            "{timeout} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_build_rejects_malformed_connect_string() {
    let result = NamespaceClient::builder()
        .connect_string("zk1:2181,,zk2:2181")
        .build()
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Config(ConfigError::InvalidConnectString(_)))
    ));
}

#[tokio::test]
async fn test_build_without_server_is_session_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = NamespaceClient::builder()
        .connect_string(addr)
        .session_timeout_ms(1_000)
        .build()
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Session(SessionError::NoReachableHost { .. }))
    ));
}

#[tokio::test]
async fn test_build_from_deserialized_config() {
    let server = MockServer::start().await;
    let json = format!(r#"{{ "connect_string": "{}" }}"#, server.connect_string());
    let config: SessionConfig = serde_json::from_str(&json).unwrap();

    let mut client = NamespaceClient::builder()
        .from_config(config)
        .build()
        .await
        .unwrap();

    assert!(client.state().is_connected());
    client.close().await;
}

#[tokio::test]
async fn test_close_without_operations_succeeds() {
    let server = MockServer::start().await;
    let mut client = client_for(&server).await;

    client.close().await;

    assert!(client.is_closed());
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.session_id(), None);
    assert_eq!(server.closed_session_count(), 1);
}

// =========================================================================
// Operations
// =========================================================================

#[tokio::test]
async fn test_list_directory() {
    let server = MockServer::start().await;
    server.seed("/empty", b"");
    server.seed("/dir/a", b"");
    server.seed("/dir/b", b"");
    server.seed("/dir/c", b"");
    let client = client_for(&server).await;

    assert!(client.list_directory("/empty").await.is_empty());
    assert_eq!(client.list_directory("/dir").await, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_list_directory_missing_path_is_empty() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;

    assert!(client.list_directory("/missing").await.is_empty());
    let err = client.try_list_directory("/missing").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoNode));
}

#[tokio::test]
async fn test_create_then_get_node_data() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;

    let created = client.create_node("/t", "hello").await;
    let data = client.get_node_data("/t").await;

    assert_eq!(created.as_deref(), Some("/t"));
    assert_eq!(data.as_deref(), Some("hello"));
    assert_eq!(server.node_data("/t"), Some(b"hello".to_vec()));
}

#[tokio::test]
async fn test_get_node_data_decodes_invalid_utf8_lossily() {
    let server = MockServer::start().await;
    server.seed("/bin", &[b'o', b'k', 0xff]);
    let client = client_for(&server).await;

    let data = client.get_node_data("/bin").await;

    assert_eq!(data.as_deref(), Some("ok\u{fffd}"));
}

#[tokio::test]
async fn test_get_node_data_missing_is_none() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;

    assert_eq!(client.get_node_data("/nope").await, None);
}

#[tokio::test]
async fn test_create_under_missing_parent_is_none() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;

    assert_eq!(client.create_node("/no/parent", "x").await, None);
    let err = client.try_create_node("/no/parent", "x").await.unwrap_err();
    assert!(err.is_no_node());
}

#[tokio::test]
async fn test_create_existing_node_reports_node_exists() {
    let server = MockServer::start().await;
    server.seed("/taken", b"old");
    let client = client_for(&server).await;

    assert_eq!(client.create_node("/taken", "new").await, None);
    let err = client.try_create_node("/taken", "new").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NodeExists));
    assert_eq!(server.node_data("/taken"), Some(b"old".to_vec()));
}

#[tokio::test]
async fn test_delete_node() {
    let server = MockServer::start().await;
    server.seed("/gone", b"");
    let client = client_for(&server).await;

    client.delete_node("/gone").await;

    assert!(!server.exists("/gone"));
}

#[tokio::test]
async fn test_delete_missing_node_does_not_fail() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;

    client.delete_node("/missing").await;

    let err = client.try_delete_node("/missing").await.unwrap_err();
    assert!(err.is_no_node());
    assert!(client.state().is_connected());
}

#[tokio::test]
async fn test_delete_non_empty_node_reports_not_empty() {
    let server = MockServer::start().await;
    server.seed("/parent/child", b"");
    let client = client_for(&server).await;

    client.delete_node("/parent").await;
    let err = client.try_delete_node("/parent").await.unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::NotEmpty));
    assert!(server.exists("/parent"));
}

#[tokio::test]
async fn test_chroot_is_transparent_to_callers() {
    let server = MockServer::start().await;
    server.seed("/app", b"");
    let mut client = NamespaceClient::builder()
        .connect_string(server.connect_string_with_chroot("/app"))
        .session_timeout_ms(5_000)
        .build()
        .await
        .unwrap();

    let created = client.create_node("/cfg", "on").await;

    assert_eq!(created.as_deref(), Some("/cfg"));
    assert_eq!(client.list_directory("/").await, ["cfg"]);
    assert_eq!(server.node_data("/app/cfg"), Some(b"on".to_vec()));
    client.close().await;
}

#[tokio::test]
async fn test_chroot_rejects_relative_and_empty_paths() {
    let server = MockServer::start().await;
    server.seed("/app/inside", b"");
    let mut client = NamespaceClient::builder()
        .connect_string(server.connect_string_with_chroot("/app"))
        .session_timeout_ms(5_000)
        .build()
        .await
        .unwrap();

    assert_eq!(client.create_node("x", "leak").await, None);
    assert!(client.list_directory("").await.is_empty());
    assert_eq!(client.get_node_data("").await, None);
    client.delete_node("x").await;

    let err = client.try_create_node("x", "leak").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidPath { .. }));
    assert_eq!(err.code(), Some(ErrorCode::BadArguments));
    assert!(matches!(
        client.try_list_directory("").await,
        Err(SessionError::InvalidPath { .. })
    ));

    assert!(!server.exists("/appx"));
    assert!(!server.exists("/app/x"));
    assert_eq!(server.children("/app"), ["inside"]);
    assert!(client.state().is_connected());
    client.close().await;
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_close_twice_is_a_no_op() {
    let server = MockServer::start().await;
    let mut client = client_for(&server).await;

    client.close().await;
    client.close().await;

    assert_eq!(server.closed_session_count(), 1);
}

#[tokio::test]
async fn test_operations_after_close_report_closed() {
    let server = MockServer::start().await;
    server.seed("/a", b"data");
    let mut client = client_for(&server).await;
    client.close().await;

    assert!(client.list_directory("/").await.is_empty());
    assert_eq!(client.get_node_data("/a").await, None);
    assert_eq!(client.create_node("/b", "x").await, None);
    client.delete_node("/a").await;

    assert!(matches!(
        client.try_get_node_data("/a").await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(
        client.try_delete_node("/a").await,
        Err(SessionError::Closed)
    ));
    assert!(server.exists("/a"));
}

#[tokio::test]
async fn test_listener_sees_connected_then_closed() {
    let server = MockServer::start().await;
    let (listener, seen) = recorder();
    let mut client = NamespaceClient::builder()
        .connect_string(server.connect_string())
        .state_listener(listener)
        .build()
        .await
        .unwrap();

    client.close().await;
    wait_for(&seen, SessionState::Closed).await;

    assert_eq!(
        *seen.lock().unwrap(),
        [SessionState::Connected, SessionState::Closed]
    );
}

#[tokio::test]
async fn test_connection_loss_gives_sentinels_and_disconnected() {
    let server = MockServer::start().await;
    server.seed("/a", b"x");
    let (listener, seen) = recorder();
    let mut client = NamespaceClient::builder()
        .connect_string(server.connect_string())
        .state_listener(listener)
        .build()
        .await
        .unwrap();

    server.drop_connections();
    wait_for(&seen, SessionState::Disconnected).await;

    assert_eq!(client.get_node_data("/a").await, None);
    assert!(client.list_directory("/").await.is_empty());
    assert_eq!(
        client.try_get_node_data("/a").await.unwrap_err().code(),
        Some(ErrorCode::ConnectionLoss)
    );
    assert_eq!(client.state(), SessionState::Disconnected);

    // Closing a client whose connection is gone still succeeds.
    client.close().await;
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_drop_closes_session_in_background() {
    let server = MockServer::start().await;
    let client = client_for(&server).await;

    drop(client);

    for _ in 0..200 {
        if server.closed_session_count() == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("dropped client never closed its session");
}

#[test]
fn test_drop_outside_runtime_releases_session() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let (server, client) = runtime.block_on(async {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        (server, client)
    });

    // No runtime context here: the IO task is aborted instead.
    drop(client);

    runtime.block_on(async {
        drop(server);
    });
}
