//! Error types for the session layer.

use zkhandle_protocol::{ErrorCode, ProtocolError};
use zkhandle_transport::TransportError;

/// A configuration value was rejected before any connection was attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The connect string was empty or whitespace only.
    #[error("connect string must not be blank")]
    BlankConnectString,

    /// The session timeout was zero or negative.
    #[error("session timeout must be greater than 0, got {0} ms")]
    NonPositiveTimeout(i32),

    /// The connect string could not be parsed into hosts and a chroot.
    #[error("invalid connect string: {0}")]
    InvalidConnectString(String),
}

/// Errors that can occur while opening a session or running a request on it.
///
/// Only [`Keeper`](Self::Keeper) comes from the server's own verdict on a
/// request; every other variant describes the session or the connection
/// underneath it.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The configuration was rejected before connecting.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The TCP connection could not be opened or broke during the handshake.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame from the server could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server processed the request and answered with an error code,
    /// e.g. [`ErrorCode::NoNode`] or [`ErrorCode::NotEmpty`].
    #[error("server rejected request: {0}")]
    Keeper(ErrorCode),

    /// The path is not a valid absolute node path. Rejected before
    /// anything is sent.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The connection to the server was lost before a reply arrived.
    #[error("connection to the server was lost")]
    ConnectionLoss,

    /// The server reports that the session no longer exists.
    #[error("session expired")]
    Expired,

    /// The server accepted the TCP connection but never answered the
    /// handshake.
    #[error("no handshake reply from {host}")]
    HandshakeTimeout { host: String },

    /// The request was abandoned because the session's IO task went away
    /// without answering it.
    #[error("request interrupted")]
    Interrupted,

    /// The client holding this session has been closed.
    #[error("client is closed")]
    Closed,

    /// No host in the connect string accepted a session.
    #[error("no reachable host among {tried} tried: {last}")]
    NoReachableHost {
        tried: usize,
        #[source]
        last: Box<SessionError>,
    },
}

impl SessionError {
    /// The server result code behind this error, when there is one.
    ///
    /// Connection loss and expiry map onto their result-code equivalents
    /// so callers can branch on a single value.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Keeper(code) => Some(*code),
            Self::InvalidPath { .. } => Some(ErrorCode::BadArguments),
            Self::ConnectionLoss => Some(ErrorCode::ConnectionLoss),
            Self::Expired => Some(ErrorCode::SessionExpired),
            _ => None,
        }
    }

    /// Returns `true` if the server said the node does not exist.
    pub fn is_no_node(&self) -> bool {
        self.code() == Some(ErrorCode::NoNode)
    }
}
