//! Numeric codes shared with the server: request op codes, reserved
//! transaction ids, and reply result codes.

use std::fmt;

/// Transaction id the server uses for watch notifications.
pub const NOTIFICATION_XID: i32 = -1;

/// Transaction id reserved for keep-alive pings.
pub const PING_XID: i32 = -2;

/// Request type carried in every [`RequestHeader`](crate::RequestHeader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Create,
    Delete,
    GetData,
    GetChildren,
    Ping,
    CloseSession,
}

impl OpCode {
    /// The value written on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Create => 1,
            Self::Delete => 2,
            Self::GetData => 4,
            Self::GetChildren => 8,
            Self::Ping => 11,
            Self::CloseSession => -11,
        }
    }

    /// Maps a wire value back to an op code, if it is one this client uses.
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            1 => Self::Create,
            2 => Self::Delete,
            4 => Self::GetData,
            8 => Self::GetChildren,
            11 => Self::Ping,
            -11 => Self::CloseSession,
            _ => return None,
        })
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::GetData => "getData",
            Self::GetChildren => "getChildren",
            Self::Ping => "ping",
            Self::CloseSession => "closeSession",
        };
        f.write_str(name)
    }
}

/// A non-zero result code from a reply header.
///
/// Zero means success and never becomes an `ErrorCode`; see
/// [`ReplyHeader::error`](crate::ReplyHeader::error). Codes this client
/// does not know are kept as [`ErrorCode::Unknown`] so nothing is lost in
/// the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    #[error("system error")]
    SystemError,
    #[error("runtime inconsistency")]
    RuntimeInconsistency,
    #[error("data inconsistency")]
    DataInconsistency,
    #[error("connection loss")]
    ConnectionLoss,
    #[error("marshalling error")]
    MarshallingError,
    #[error("unimplemented")]
    Unimplemented,
    #[error("operation timeout")]
    OperationTimeout,
    #[error("bad arguments")]
    BadArguments,
    #[error("unknown session")]
    UnknownSession,
    #[error("new config has no quorum")]
    NewConfigNoQuorum,
    #[error("reconfig in progress")]
    ReconfigInProgress,
    #[error("api error")]
    ApiError,
    #[error("node does not exist")]
    NoNode,
    #[error("not authenticated")]
    NoAuth,
    #[error("bad version")]
    BadVersion,
    #[error("ephemeral nodes may not have children")]
    NoChildrenForEphemerals,
    #[error("node already exists")]
    NodeExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid callback")]
    InvalidCallback,
    #[error("invalid acl")]
    InvalidAcl,
    #[error("authentication failed")]
    AuthFailed,
    #[error("session moved")]
    SessionMoved,
    #[error("not a read-only call")]
    NotReadOnly,
    #[error("ephemeral node on local session")]
    EphemeralOnLocalSession,
    #[error("no such watcher")]
    NoWatcher,
    #[error("reconfig disabled")]
    ReconfigDisabled,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("request throttled")]
    Throttled,
    #[error("unknown error code {0}")]
    Unknown(i32),
}

impl ErrorCode {
    /// Maps a non-zero wire value to an error code.
    pub fn from_i32(v: i32) -> Self {
        match v {
            -1 => Self::SystemError,
            -2 => Self::RuntimeInconsistency,
            -3 => Self::DataInconsistency,
            -4 => Self::ConnectionLoss,
            -5 => Self::MarshallingError,
            -6 => Self::Unimplemented,
            -7 => Self::OperationTimeout,
            -8 => Self::BadArguments,
            -12 => Self::UnknownSession,
            -13 => Self::NewConfigNoQuorum,
            -14 => Self::ReconfigInProgress,
            -100 => Self::ApiError,
            -101 => Self::NoNode,
            -102 => Self::NoAuth,
            -103 => Self::BadVersion,
            -108 => Self::NoChildrenForEphemerals,
            -110 => Self::NodeExists,
            -111 => Self::NotEmpty,
            -112 => Self::SessionExpired,
            -113 => Self::InvalidCallback,
            -114 => Self::InvalidAcl,
            -115 => Self::AuthFailed,
            -118 => Self::SessionMoved,
            -119 => Self::NotReadOnly,
            -120 => Self::EphemeralOnLocalSession,
            -121 => Self::NoWatcher,
            -123 => Self::ReconfigDisabled,
            -125 => Self::QuotaExceeded,
            -127 => Self::Throttled,
            other => Self::Unknown(other),
        }
    }

    /// The value written on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::SystemError => -1,
            Self::RuntimeInconsistency => -2,
            Self::DataInconsistency => -3,
            Self::ConnectionLoss => -4,
            Self::MarshallingError => -5,
            Self::Unimplemented => -6,
            Self::OperationTimeout => -7,
            Self::BadArguments => -8,
            Self::UnknownSession => -12,
            Self::NewConfigNoQuorum => -13,
            Self::ReconfigInProgress => -14,
            Self::ApiError => -100,
            Self::NoNode => -101,
            Self::NoAuth => -102,
            Self::BadVersion => -103,
            Self::NoChildrenForEphemerals => -108,
            Self::NodeExists => -110,
            Self::NotEmpty => -111,
            Self::SessionExpired => -112,
            Self::InvalidCallback => -113,
            Self::InvalidAcl => -114,
            Self::AuthFailed => -115,
            Self::SessionMoved => -118,
            Self::NotReadOnly => -119,
            Self::EphemeralOnLocalSession => -120,
            Self::NoWatcher => -121,
            Self::ReconfigDisabled => -123,
            Self::QuotaExceeded => -125,
            Self::Throttled => -127,
            Self::Unknown(v) => v,
        }
    }
}
