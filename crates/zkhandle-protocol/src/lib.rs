//! Wire protocol for zkhandle.
//!
//! This crate defines the "language" a coordination client and server
//! speak once a TCP connection is up:
//!
//! - **Records** ([`ConnectRequest`], [`RequestHeader`], [`CreateRequest`],
//!   [`Stat`], etc.): the structures carried inside each frame.
//! - **Codec** ([`Record`], [`RecordWriter`], [`RecordReader`]): how those
//!   records become bytes and back.
//! - **Codes** ([`OpCode`], [`ErrorCode`]): request types and the
//!   server's result codes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (whole frames) and session
//! (request correlation and lifecycle). It never touches a socket.
//!
//! ```text
//! Transport (frames) → Protocol (records) → Session (requests, state)
//! ```

mod codec;
mod codes;
mod error;
mod types;

pub use codec::{Record, RecordReader, RecordWriter, from_bytes, to_bytes};
pub use codes::{ErrorCode, NOTIFICATION_XID, OpCode, PING_XID};
pub use error::ProtocolError;
pub use types::{
    Acl, ConnectRequest, ConnectResponse, CreateMode, CreateRequest,
    CreateResponse, DeleteRequest, GetChildrenResponse, GetDataResponse, Id,
    PathWatchRequest, ReplyHeader, RequestHeader, SESSION_PASSWORD_LEN, Stat,
    WatcherEvent, perms,
};
