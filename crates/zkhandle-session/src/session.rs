//! The session handle: opening a session and issuing requests on it.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use zkhandle_protocol::{
    Acl, ConnectRequest, ConnectResponse, CreateMode, CreateRequest,
    CreateResponse, DeleteRequest, GetChildrenResponse, GetDataResponse,
    OpCode, PathWatchRequest, Record, Stat, from_bytes, to_bytes,
};
use zkhandle_transport::{Connection, TcpConnection};

use crate::io::{IoTask, Request};
use crate::state::StateNotifier;
use crate::{
    ConnectString, SessionConfig, SessionError, SessionId, SessionState,
    StateListener,
};

/// An open session with a coordination server.
///
/// Cheap to share by reference: every request method takes `&self`, and
/// concurrent requests are pipelined over the single connection. Requests
/// are sent in call order and answered in the same order.
///
/// Dropping a `Session` without calling [`close`](Self::close) aborts its
/// IO task and releases the socket, leaving the server to expire the
/// session on its own.
pub struct Session {
    id: SessionId,
    timeout: Duration,
    chroot: Option<String>,
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<SessionState>,
    io_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("chroot", &self.chroot)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Session {
    /// Validates `config` and opens a session on the first host that
    /// accepts one.
    ///
    /// Hosts are tried in random order, each with an equal share of the
    /// session timeout. `listener` receives every state change from
    /// `Connected` onward; it is not called if no session could be opened.
    ///
    /// # Errors
    /// - [`SessionError::Config`]: the configuration is invalid
    /// - [`SessionError::NoReachableHost`]: every host failed; the last
    ///   failure is attached
    pub async fn connect(
        config: &SessionConfig,
        listener: Arc<dyn StateListener>,
    ) -> Result<Self, SessionError> {
        let connect_string = config.validate()?;

        let mut hosts = connect_string.hosts().to_vec();
        hosts.shuffle(&mut rand::rng());
        let shares = u32::try_from(hosts.len().max(1)).unwrap_or(u32::MAX);
        let per_host = config.session_timeout() / shares;

        let mut last_error = None;
        for host in &hosts {
            match handshake(host, config.session_timeout_ms, per_host).await {
                Ok((conn, response)) => {
                    return Ok(Self::start(conn, response, &connect_string, listener));
                }
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "could not open session");
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::NoReachableHost {
            tried: hosts.len(),
            last: Box::new(last_error.unwrap_or(SessionError::ConnectionLoss)),
        })
    }

    fn start(
        conn: TcpConnection,
        response: ConnectResponse,
        connect_string: &ConnectString,
        listener: Arc<dyn StateListener>,
    ) -> Self {
        let id = SessionId(response.session_id);
        let timeout = Duration::from_millis(response.timeout_ms as u64);
        let initial = if response.read_only {
            SessionState::ConnectedReadOnly
        } else {
            SessionState::Connected
        };

        tracing::info!(
            session_id = %id,
            server = %conn.peer_addr(),
            negotiated_timeout_ms = response.timeout_ms,
            "session established"
        );

        let notifier = StateNotifier::spawn(listener);
        notifier.notify(initial);

        let (state_tx, state_rx) = watch::channel(initial);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let io = IoTask::new(conn, id, timeout, request_rx, state_tx, notifier);

        Self {
            id,
            timeout,
            chroot: connect_string.chroot().map(str::to_string),
            requests: request_tx,
            state: state_rx,
            io_task: Some(tokio::spawn(io.run())),
        }
    }

    /// The server-assigned session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session timeout the server agreed to.
    pub fn negotiated_timeout(&self) -> Duration {
        self.timeout
    }

    /// The current connection state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Lists the names of the immediate children of `path`, in the order
    /// the server returns them.
    pub async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>, SessionError> {
        let request = PathWatchRequest {
            path: self.server_path(path, false)?,
            watch: false,
        };
        let response: GetChildrenResponse =
            self.call(OpCode::GetChildren, &request).await?;
        Ok(response.children)
    }

    /// Reads the data and metadata of the node at `path`.
    pub async fn get_data(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat), SessionError> {
        let request = PathWatchRequest {
            path: self.server_path(path, false)?,
            watch: false,
        };
        let response: GetDataResponse =
            self.call(OpCode::GetData, &request).await?;
        Ok((response.data, response.stat))
    }

    /// Creates a node and returns its actual path, which differs from
    /// `path` for sequential modes.
    pub async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, SessionError> {
        let sequential = matches!(
            mode,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        );
        let request = CreateRequest {
            path: self.server_path(path, sequential)?,
            data: data.to_vec(),
            acl: acl.to_vec(),
            flags: mode.flags(),
        };
        let response: CreateResponse =
            self.call(OpCode::Create, &request).await?;
        Ok(self.client_path(response.path))
    }

    /// Deletes the node at `path` if its version matches; `-1` matches any
    /// version.
    pub async fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<(), SessionError> {
        let request = DeleteRequest {
            path: self.server_path(path, false)?,
            version,
        };
        self.submit(OpCode::Delete, to_bytes(&request)).await?;
        Ok(())
    }

    /// Ends the session on the server and waits for the IO task to finish.
    ///
    /// The IO task is gone by the time this returns, whatever the result,
    /// so the socket is always released.
    ///
    /// # Errors
    /// Returns the reason the close request could not be acknowledged, for
    /// example [`SessionError::ConnectionLoss`] if the connection was
    /// already gone.
    pub async fn close(mut self) -> Result<(), SessionError> {
        let result = self.submit(OpCode::CloseSession, Vec::new()).await;
        if let Some(io_task) = self.io_task.take() {
            if let Err(e) = io_task.await {
                tracing::debug!(session_id = %self.id, error = %e, "io task ended abnormally");
            }
        }
        result.map(drop)
    }

    async fn call<Req: Record, Resp: Record>(
        &self,
        op: OpCode,
        request: &Req,
    ) -> Result<Resp, SessionError> {
        let body = self.submit(op, to_bytes(request)).await?;
        Ok(from_bytes(&body)?)
    }

    /// Hands an encoded request to the IO task and waits for its reply.
    async fn submit(
        &self,
        op: OpCode,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request {
                op,
                body,
                reply: reply_tx,
            })
            .map_err(|_| SessionError::ConnectionLoss)?;
        reply_rx.await.map_err(|_| SessionError::Interrupted)?
    }

    /// Checks `path` and prefixes the chroot, if any. `/` maps to the
    /// chroot itself.
    fn server_path(
        &self,
        path: &str,
        sequential: bool,
    ) -> Result<String, SessionError> {
        crate::path::check(path, sequential).map_err(|reason| {
            SessionError::InvalidPath {
                path: path.to_string(),
                reason,
            }
        })?;
        Ok(match &self.chroot {
            Some(chroot) if path == "/" => chroot.clone(),
            Some(chroot) => format!("{chroot}{path}"),
            None => path.to_string(),
        })
    }

    /// Strips the chroot from a path returned by the server.
    fn client_path(&self, path: String) -> String {
        let Some(chroot) = &self.chroot else {
            return path;
        };
        match path.strip_prefix(chroot.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(io_task) = self.io_task.take() {
            io_task.abort();
        }
    }
}

/// Opens a TCP connection to `host` and performs the session handshake.
async fn handshake(
    host: &str,
    timeout_ms: i32,
    timeout: Duration,
) -> Result<(TcpConnection, ConnectResponse), SessionError> {
    let conn = TcpConnection::connect(host, timeout).await?;
    conn.send(&to_bytes(&ConnectRequest::new_session(timeout_ms)))
        .await?;

    let frame = tokio::time::timeout(timeout, conn.recv())
        .await
        .map_err(|_| SessionError::HandshakeTimeout {
            host: host.to_string(),
        })??
        .ok_or(SessionError::ConnectionLoss)?;

    let response: ConnectResponse = from_bytes(&frame)?;
    if response.timeout_ms <= 0 {
        return Err(SessionError::Expired);
    }
    Ok((conn, response))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A session value with no live connection, for exercising the path
    /// helpers. The request channel's receiver is dropped immediately.
    fn detached(chroot: Option<&str>) -> Session {
        let (requests, _) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(SessionState::Closed);
        Session {
            id: SessionId(1),
            timeout: Duration::from_secs(1),
            chroot: chroot.map(str::to_string),
            requests,
            state,
            io_task: None,
        }
    }

    #[test]
    fn test_server_path_without_chroot_is_unchanged() {
        let s = detached(None);
        assert_eq!(s.server_path("/a/b", false).unwrap(), "/a/b");
        assert_eq!(s.server_path("/", false).unwrap(), "/");
    }

    #[test]
    fn test_server_path_prefixes_chroot() {
        let s = detached(Some("/app/a"));
        assert_eq!(s.server_path("/foo/bar", false).unwrap(), "/app/a/foo/bar");
        assert_eq!(s.server_path("/", false).unwrap(), "/app/a");
        assert_eq!(s.server_path("/q/", true).unwrap(), "/app/a/q/");
    }

    #[test]
    fn test_server_path_rejects_paths_that_would_leave_chroot() {
        let s = detached(Some("/app"));
        for bad in ["x", "", "/../etc"] {
            assert!(
                matches!(
                    s.server_path(bad, false),
                    Err(SessionError::InvalidPath { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_path_fails_before_reaching_io_task() {
        let s = detached(None);

        let result = s.get_children("relative").await;

        assert!(matches!(result, Err(SessionError::InvalidPath { .. })));
    }

    #[test]
    fn test_client_path_strips_chroot() {
        let s = detached(Some("/app"));
        assert_eq!(s.client_path("/app/x".to_string()), "/x");
        assert_eq!(s.client_path("/app".to_string()), "/");
        // Shares a prefix but is not under the chroot.
        assert_eq!(s.client_path("/apple".to_string()), "/apple");
    }

    #[tokio::test]
    async fn test_request_on_dead_io_task_is_connection_loss() {
        let s = detached(None);

        let result = s.get_children("/").await;

        assert!(matches!(result, Err(SessionError::ConnectionLoss)));
    }

    #[tokio::test]
    async fn test_connect_with_invalid_config_fails_before_connecting() {
        let config = SessionConfig {
            connect_string: "  ".to_string(),
            session_timeout_ms: 1000,
        };

        let result =
            Session::connect(&config, Arc::new(crate::LoggingListener)).await;

        assert!(matches!(
            result,
            Err(SessionError::Config(crate::ConfigError::BlankConnectString))
        ));
    }
}
