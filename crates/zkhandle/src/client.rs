//! `NamespaceClient` builder and operations.
//!
//! This is the entry point for applications. It ties the layers together:
//! config → session → namespace operations, and owns the session for its
//! whole life.

use std::sync::Arc;

use zkhandle_protocol::{Acl, CreateMode};
use zkhandle_session::{
    LoggingListener, Session, SessionConfig, SessionError, SessionId,
    SessionState, StateListener,
};

use crate::ClientError;

/// Builder for configuring and opening a [`NamespaceClient`].
///
/// # Example
///
/// ```rust,no_run
/// use zkhandle::prelude::*;
///
/// # async fn demo() -> Result<(), ClientError> {
/// let mut client = NamespaceClient::builder()
///     .connect_string("10.0.0.1:2181,10.0.0.2:2181/app")
///     .session_timeout_ms(10_000)
///     .build()
///     .await?;
///
/// for name in client.list_directory("/").await {
///     println!("{name}");
/// }
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct NamespaceClientBuilder {
    config: SessionConfig,
    listener: Arc<dyn StateListener>,
}

impl NamespaceClientBuilder {
    /// Creates a builder with default settings and a [`LoggingListener`].
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            listener: Arc::new(LoggingListener),
        }
    }

    /// Sets the servers to connect to, with an optional chroot suffix.
    pub fn connect_string(mut self, connect_string: impl Into<String>) -> Self {
        self.config.connect_string = connect_string.into();
        self
    }

    /// Sets the requested session timeout in milliseconds.
    pub fn session_timeout_ms(mut self, timeout_ms: i32) -> Self {
        self.config.session_timeout_ms = timeout_ms;
        self
    }

    /// Replaces every setting with those of `config`.
    pub fn from_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the listener that receives connection-state changes.
    pub fn state_listener(mut self, listener: impl StateListener) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Validates the configuration and opens the session.
    ///
    /// # Errors
    /// - [`ClientError::Config`]: blank connect string, non-positive
    ///   timeout, or a malformed connect string; nothing is contacted
    /// - [`ClientError::Session`]: no server accepted a session
    pub async fn build(self) -> Result<NamespaceClient, ClientError> {
        let connect_string = self.config.validate()?;
        tracing::debug!(
            %connect_string,
            session_timeout_ms = self.config.session_timeout_ms,
            "opening session"
        );

        let session = Session::connect(&self.config, self.listener).await?;
        Ok(NamespaceClient {
            session: Some(session),
        })
    }
}

impl Default for NamespaceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A client for one coordination session.
///
/// Every operation comes in two forms. The plain form never fails: a fault
/// is logged and replaced by a sentinel (an empty list, `None`, or nothing).
/// The `try_` form returns the underlying [`SessionError`], whose
/// [`code`](SessionError::code) tells "no such node" apart from
/// connectivity trouble.
///
/// Close the client with [`close`](Self::close). A client dropped without
/// closing closes its session in the background.
pub struct NamespaceClient {
    session: Option<Session>,
}

impl NamespaceClient {
    /// Creates a new builder.
    pub fn builder() -> NamespaceClientBuilder {
        NamespaceClientBuilder::new()
    }

    /// The server-assigned session id, or `None` once closed.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(Session::id)
    }

    /// The session's connection state; `Closed` once the client is closed.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Closed, Session::state)
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    fn session(&self) -> Result<&Session, SessionError> {
        self.session.as_ref().ok_or(SessionError::Closed)
    }

    // -----------------------------------------------------------------------
    // Sentinel forms
    // -----------------------------------------------------------------------

    /// Names of the immediate children of `path`, in server order.
    ///
    /// Returns an empty list on any fault, including a missing `path`.
    pub async fn list_directory(&self, path: &str) -> Vec<String> {
        self.try_list_directory(path).await.unwrap_or_else(|e| {
            tracing::error!(path, error = %e, "failed to list directory");
            Vec::new()
        })
    }

    /// The data of the node at `path` as text, or `None` on any fault.
    pub async fn get_node_data(&self, path: &str) -> Option<String> {
        match self.try_get_node_data(path).await {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::error!(path, error = %e, "failed to read node");
                None
            }
        }
    }

    /// Creates a persistent node with open permissions and returns its
    /// path, or `None` on any fault.
    pub async fn create_node(&self, path: &str, data: &str) -> Option<String> {
        match self.try_create_node(path, data).await {
            Ok(created) => Some(created),
            Err(e) => {
                tracing::error!(path, error = %e, "failed to create node");
                None
            }
        }
    }

    /// Deletes the node at `path` whatever its version. Faults are logged
    /// and otherwise ignored.
    pub async fn delete_node(&self, path: &str) {
        if let Err(e) = self.try_delete_node(path).await {
            tracing::error!(path, error = %e, "failed to delete node");
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostic forms
    // -----------------------------------------------------------------------

    /// Like [`list_directory`](Self::list_directory), but returns the fault.
    pub async fn try_list_directory(
        &self,
        path: &str,
    ) -> Result<Vec<String>, SessionError> {
        self.session()?.get_children(path).await
    }

    /// Like [`get_node_data`](Self::get_node_data), but returns the fault.
    ///
    /// Data that is not valid UTF-8 is decoded lossily.
    pub async fn try_get_node_data(
        &self,
        path: &str,
    ) -> Result<String, SessionError> {
        let (data, _stat) = self.session()?.get_data(path).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Like [`create_node`](Self::create_node), but returns the fault.
    pub async fn try_create_node(
        &self,
        path: &str,
        data: &str,
    ) -> Result<String, SessionError> {
        self.session()?
            .create(
                path,
                data.as_bytes(),
                &Acl::open_unsafe(),
                CreateMode::Persistent,
            )
            .await
    }

    /// Like [`delete_node`](Self::delete_node), but returns the fault.
    pub async fn try_delete_node(&self, path: &str) -> Result<(), SessionError> {
        self.session()?.delete(path, -1).await?;
        tracing::info!(path, "deleted node");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Closes the session. Never fails; later calls do nothing.
    ///
    /// A fault while closing is logged. The connection is released either
    /// way.
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let session_id = session.id();
        match session.close().await {
            Ok(()) => tracing::info!(%session_id, "client closed"),
            Err(e) => {
                tracing::error!(%session_id, error = %e, "error while closing session");
            }
        }
    }
}

impl Drop for NamespaceClient {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let session_id = session.id();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(%session_id, "client dropped without close; closing in background");
                runtime.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::debug!(%session_id, error = %e, "background close failed");
                    }
                });
            }
            // Without a runtime the session's own drop aborts its IO task
            // and the server expires the session.
            Err(_) => drop(session),
        }
    }
}
