//! In-process mock coordination server for zkhandle tests.
//!
//! [`MockServer`] listens on a random loopback port and speaks enough of
//! the wire protocol for the client crates to be tested end to end:
//! session handshake, children listing, data reads, create, delete, ping,
//! and close. It keeps its namespace in memory and gives the same result
//! codes a real server would (`NoNode`, `NodeExists`, `NotEmpty`, ...).
//!
//! Tests steer failure scenarios through the handle:
//!
//! - [`MockServer::drop_connections`]: close every socket, as a crashed
//!   server would
//! - [`MockServer::expire_sessions`]: answer later requests with
//!   `SessionExpired`
//! - [`MockServer::stall`]: stop answering entirely, so only the client's
//!   own timeouts can notice
//!
//! ```rust,no_run
//! # async fn demo() {
//! use zkhandle_testkit::MockServer;
//!
//! let server = MockServer::start().await;
//! server.seed("/app/config", b"v1");
//! let connect_string = server.connect_string();
//! # }
//! ```

mod tree;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use zkhandle_protocol::{
    ConnectRequest, ConnectResponse, CreateMode, CreateRequest, CreateResponse,
    DeleteRequest, ErrorCode, GetChildrenResponse, GetDataResponse, OpCode,
    PING_XID, PathWatchRequest, ProtocolError, Record, RecordReader,
    RecordWriter, ReplyHeader, RequestHeader, SESSION_PASSWORD_LEN,
};
use zkhandle_transport::{Connection, TcpConnection, TransportError};

use crate::tree::Tree;

/// Behaviour fixed when the server starts.
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Timeout to grant every session. `None` grants what was requested.
    pub negotiated_timeout_ms: Option<i32>,
    /// Mark sessions as read-only in the handshake reply.
    pub read_only: bool,
    /// Answer handshakes with a zero timeout, which clients read as an
    /// expired session.
    pub refuse_sessions: bool,
    /// Never answer handshakes.
    pub silent_handshake: bool,
    /// Hang up on a close-session request without replying to it.
    pub hang_up_on_close: bool,
}

struct Shared {
    options: MockOptions,
    tree: Mutex<Tree>,
    next_session_id: AtomicI64,
    expired: AtomicBool,
    stalled: AtomicBool,
    /// Bumped to make every connection handler hang up.
    kill: watch::Sender<u64>,
    handshakes: AtomicUsize,
    pings: AtomicUsize,
    closed_sessions: AtomicUsize,
}

impl Shared {
    fn tree(&self) -> MutexGuard<'_, Tree> {
        // A panic in one handler must not wedge every later assertion.
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A running mock server. Shuts down when dropped.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server with default options.
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    /// Starts a server with the given options.
    ///
    /// # Panics
    /// If no loopback port can be bound.
    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener has local addr");

        let (kill, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            options,
            tree: Mutex::new(Tree::default()),
            next_session_id: AtomicI64::new(0x100),
            expired: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            kill,
            handshakes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            closed_sessions: AtomicUsize::new(0),
        });

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        tracing::debug!(%addr, "mock server listening");

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port` of this server.
    pub fn connect_string(&self) -> String {
        self.addr.to_string()
    }

    /// `host:port` followed by `chroot`, e.g. `127.0.0.1:4000/app`.
    pub fn connect_string_with_chroot(&self, chroot: &str) -> String {
        format!("{}{chroot}", self.addr)
    }

    /// Creates `path` and any missing ancestors, then sets its data.
    pub fn seed(&self, path: &str, data: &[u8]) {
        self.shared.tree().seed(path, data);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.shared.tree().contains(path)
    }

    /// Data stored at `path`, or `None` if there is no such node.
    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.tree().get(path).ok().map(|(data, _)| data)
    }

    /// Child names of `path` in creation order (empty if missing).
    pub fn children(&self, path: &str) -> Vec<String> {
        self.shared.tree().children(path).unwrap_or_default()
    }

    /// Closes every open connection. New connections are still accepted.
    pub fn drop_connections(&self) {
        self.shared.kill.send_modify(|generation| *generation += 1);
    }

    /// Answers every later request (except pings) with `SessionExpired`.
    pub fn expire_sessions(&self) {
        self.shared.expired.store(true, Ordering::SeqCst);
    }

    /// Stops or resumes answering requests and pings.
    pub fn stall(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Number of sessions handed out so far.
    pub fn handshake_count(&self) -> usize {
        self.shared.handshakes.load(Ordering::SeqCst)
    }

    /// Number of pings received so far.
    pub fn ping_count(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Number of close-session requests received so far.
    pub fn closed_session_count(&self) -> usize {
        self.shared.closed_sessions.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "mock server accept failed");
                continue;
            }
        };
        let conn = match TcpConnection::from_stream(stream) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "mock server could not wrap stream");
                continue;
            }
        };
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let conn_id = conn.id();
            if let Err(e) = serve(conn, shared).await {
                tracing::debug!(%conn_id, error = %e, "mock connection ended with error");
            }
        });
    }
}

#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Handles one connection from handshake to hang-up.
async fn serve(conn: TcpConnection, shared: Arc<Shared>) -> Result<(), ServeError> {
    let mut kill = shared.kill.subscribe();

    let Some(frame) = conn.recv().await? else {
        return Ok(());
    };
    let request: ConnectRequest = zkhandle_protocol::from_bytes(&frame)?;

    if shared.options.silent_handshake {
        // Hold the socket open without answering until told to hang up.
        tokio::select! {
            _ = kill.changed() => {}
            _ = conn.recv() => {}
        }
        return Ok(());
    }

    let session_id = shared.next_session_id.fetch_add(1, Ordering::SeqCst);
    let timeout_ms = if shared.options.refuse_sessions {
        0
    } else {
        shared
            .options
            .negotiated_timeout_ms
            .unwrap_or(request.timeout_ms)
    };
    let response = ConnectResponse {
        protocol_version: 0,
        timeout_ms,
        session_id,
        password: vec![0; SESSION_PASSWORD_LEN],
        read_only: shared.options.read_only,
    };
    conn.send(&zkhandle_protocol::to_bytes(&response)).await?;
    if shared.options.refuse_sessions {
        return Ok(());
    }
    shared.handshakes.fetch_add(1, Ordering::SeqCst);

    loop {
        let frame = tokio::select! {
            _ = kill.changed() => {
                tracing::debug!(session_id, "mock server hanging up");
                return Ok(());
            }
            frame = conn.recv() => frame?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        let mut r = RecordReader::new(&frame);
        let header: RequestHeader = r.read_record()?;
        let op = OpCode::from_i32(header.op);

        if op == Some(OpCode::Ping) {
            shared.pings.fetch_add(1, Ordering::SeqCst);
        }
        if shared.stalled.load(Ordering::SeqCst) {
            continue;
        }

        match op {
            Some(OpCode::Ping) => {
                let zxid = shared.tree().zxid();
                reply(&conn, PING_XID, zxid, Ok(Vec::new())).await?;
            }
            Some(OpCode::CloseSession) => {
                let zxid = {
                    let mut tree = shared.tree();
                    tree.remove_ephemerals(session_id);
                    tree.zxid()
                };
                shared.closed_sessions.fetch_add(1, Ordering::SeqCst);
                if !shared.options.hang_up_on_close {
                    reply(&conn, header.xid, zxid, Ok(Vec::new())).await?;
                }
                return Ok(());
            }
            _ if shared.expired.load(Ordering::SeqCst) => {
                let zxid = shared.tree().zxid();
                reply(&conn, header.xid, zxid, Err(ErrorCode::SessionExpired)).await?;
            }
            Some(op) => {
                let result = execute(&shared, session_id, op, &mut r)?;
                let zxid = shared.tree().zxid();
                reply(&conn, header.xid, zxid, result).await?;
            }
            None => {
                let zxid = shared.tree().zxid();
                reply(&conn, header.xid, zxid, Err(ErrorCode::Unimplemented)).await?;
            }
        }
    }
}

/// Runs one namespace operation against the tree and encodes its reply
/// body.
fn execute(
    shared: &Shared,
    session_id: i64,
    op: OpCode,
    r: &mut RecordReader<'_>,
) -> Result<Result<Vec<u8>, ErrorCode>, ProtocolError> {
    let mut tree = shared.tree();
    Ok(match op {
        OpCode::GetChildren => {
            let request: PathWatchRequest = r.read_record()?;
            tree.children(&request.path)
                .map(|children| encode(&GetChildrenResponse { children }))
        }
        OpCode::GetData => {
            let request: PathWatchRequest = r.read_record()?;
            tree.get(&request.path)
                .map(|(data, stat)| encode(&GetDataResponse { data, stat }))
        }
        OpCode::Create => {
            let request: CreateRequest = r.read_record()?;
            match CreateMode::from_flags(request.flags) {
                Some(mode) => tree
                    .create(&request.path, &request.data, mode, session_id)
                    .map(|path| encode(&CreateResponse { path })),
                None => Err(ErrorCode::BadArguments),
            }
        }
        OpCode::Delete => {
            let request: DeleteRequest = r.read_record()?;
            tree.delete(&request.path, request.version).map(|()| Vec::new())
        }
        OpCode::Ping | OpCode::CloseSession => Ok(Vec::new()),
    })
}

fn encode<T: Record>(value: &T) -> Vec<u8> {
    zkhandle_protocol::to_bytes(value)
}

async fn reply(
    conn: &TcpConnection,
    xid: i32,
    zxid: i64,
    result: Result<Vec<u8>, ErrorCode>,
) -> Result<(), TransportError> {
    let (err, body) = match result {
        Ok(body) => (0, body),
        Err(code) => (code.as_i32(), Vec::new()),
    };
    let mut w = RecordWriter::new();
    w.write_record(&ReplyHeader { xid, zxid, err });
    let mut frame = w.into_bytes();
    frame.extend_from_slice(&body);
    conn.send(&frame).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use zkhandle_protocol::{from_bytes, to_bytes};

    use super::*;

    async fn open(server: &MockServer, timeout_ms: i32) -> (TcpConnection, ConnectResponse) {
        let conn = TcpConnection::connect(&server.connect_string(), Duration::from_secs(1))
            .await
            .unwrap();
        conn.send(&to_bytes(&ConnectRequest::new_session(timeout_ms)))
            .await
            .unwrap();
        let frame = conn.recv().await.unwrap().unwrap();
        (conn, from_bytes(&frame).unwrap())
    }

    async fn call<T: Record>(
        conn: &TcpConnection,
        xid: i32,
        op: OpCode,
        body: &T,
    ) -> (ReplyHeader, Vec<u8>) {
        let mut w = RecordWriter::new();
        w.write_record(&RequestHeader { xid, op: op.as_i32() });
        w.write_record(body);
        conn.send(&w.into_bytes()).await.unwrap();

        let frame = conn.recv().await.unwrap().unwrap();
        let mut r = RecordReader::new(&frame);
        let header: ReplyHeader = r.read_record().unwrap();
        (header, r.read_rest().to_vec())
    }

    #[tokio::test]
    async fn test_handshake_echoes_requested_timeout() {
        let server = MockServer::start().await;

        let (_conn, response) = open(&server, 4000).await;

        assert_eq!(response.timeout_ms, 4000);
        assert_ne!(response.session_id, 0);
        assert_eq!(server.handshake_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_uses_configured_timeout() {
        let server = MockServer::start_with(MockOptions {
            negotiated_timeout_ms: Some(1234),
            read_only: true,
            ..MockOptions::default()
        })
        .await;

        let (_conn, response) = open(&server, 4000).await;

        assert_eq!(response.timeout_ms, 1234);
        assert!(response.read_only);
    }

    #[tokio::test]
    async fn test_get_children_and_missing_node() {
        let server = MockServer::start().await;
        server.seed("/a/x", b"");
        server.seed("/a/y", b"");
        let (conn, _) = open(&server, 4000).await;

        let (header, body) = call(
            &conn,
            1,
            OpCode::GetChildren,
            &PathWatchRequest { path: "/a".into(), watch: false },
        )
        .await;
        assert_eq!(header.xid, 1);
        assert_eq!(header.err, 0);
        let listing: GetChildrenResponse = from_bytes(&body).unwrap();
        assert_eq!(listing.children, ["x", "y"]);

        let (header, _) = call(
            &conn,
            2,
            OpCode::GetChildren,
            &PathWatchRequest { path: "/nope".into(), watch: false },
        )
        .await;
        assert_eq!(header.error(), Some(ErrorCode::NoNode));
    }

    #[tokio::test]
    async fn test_expired_sessions_get_session_expired() {
        let server = MockServer::start().await;
        let (conn, _) = open(&server, 4000).await;
        server.expire_sessions();

        let (header, _) = call(
            &conn,
            1,
            OpCode::GetData,
            &PathWatchRequest { path: "/".into(), watch: false },
        )
        .await;

        assert_eq!(header.error(), Some(ErrorCode::SessionExpired));
    }

    #[tokio::test]
    async fn test_drop_connections_closes_socket() {
        let server = MockServer::start().await;
        let (conn, _) = open(&server, 4000).await;

        server.drop_connections();

        let next = tokio::time::timeout(Duration::from_secs(1), conn.recv())
            .await
            .expect("hang-up should be prompt");
        assert!(matches!(next, Ok(None)));
    }
}
