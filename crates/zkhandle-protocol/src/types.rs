//! Wire records exchanged with a coordination server.
//!
//! Every type here implements [`Record`], listing its fields in the exact
//! order the server writes or expects them. Requests are encoded by the
//! client and decoded by servers (and by the test server in this
//! workspace); responses go the other way.

use std::fmt;

use crate::codec::{Record, RecordReader, RecordWriter};
use crate::{ErrorCode, ProtocolError};

/// Length of the session password sent in a fresh handshake.
pub const SESSION_PASSWORD_LEN: usize = 16;

fn read_required_string(
    r: &mut RecordReader<'_>,
) -> Result<String, ProtocolError> {
    Ok(r.read_string()?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Access control and node modes
// ---------------------------------------------------------------------------

/// Permission bits of an [`Acl`] entry.
pub mod perms {
    pub const READ: i32 = 1 << 0;
    pub const WRITE: i32 = 1 << 1;
    pub const CREATE: i32 = 1 << 2;
    pub const DELETE: i32 = 1 << 3;
    pub const ADMIN: i32 = 1 << 4;
    pub const ALL: i32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// An authentication identity, e.g. `world:anyone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id {
    pub scheme: String,
    pub id: String,
}

impl Record for Id {
    fn write(&self, w: &mut RecordWriter) {
        w.write_string(Some(&self.scheme));
        w.write_string(Some(&self.id));
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            scheme: read_required_string(r)?,
            id: read_required_string(r)?,
        })
    }
}

/// One access-control entry attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: i32,
    pub id: Id,
}

impl Acl {
    /// The fully open policy: anyone may do anything.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl {
            perms: perms::ALL,
            id: Id {
                scheme: "world".to_string(),
                id: "anyone".to_string(),
            },
        }]
    }
}

impl Record for Acl {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.perms);
        w.write_record(&self.id);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            perms: r.read_i32()?,
            id: r.read_record()?,
        })
    }
}

/// How a created node behaves. Encoded as the `flags` field of a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Survives the session that created it.
    #[default]
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
    /// Persistent, with a monotonically increasing suffix appended.
    PersistentSequential,
    /// Ephemeral, with a monotonically increasing suffix appended.
    EphemeralSequential,
}

impl CreateMode {
    pub fn flags(self) -> i32 {
        match self {
            Self::Persistent => 0,
            Self::Ephemeral => 1,
            Self::PersistentSequential => 2,
            Self::EphemeralSequential => 3,
        }
    }

    pub fn from_flags(flags: i32) -> Option<Self> {
        Some(match flags {
            0 => Self::Persistent,
            1 => Self::Ephemeral,
            2 => Self::PersistentSequential,
            3 => Self::EphemeralSequential,
            _ => return None,
        })
    }
}

/// Node metadata returned alongside data reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

impl Record for Stat {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i64(self.czxid);
        w.write_i64(self.mzxid);
        w.write_i64(self.ctime);
        w.write_i64(self.mtime);
        w.write_i32(self.version);
        w.write_i32(self.cversion);
        w.write_i32(self.aversion);
        w.write_i64(self.ephemeral_owner);
        w.write_i32(self.data_length);
        w.write_i32(self.num_children);
        w.write_i64(self.pzxid);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            czxid: r.read_i64()?,
            mzxid: r.read_i64()?,
            ctime: r.read_i64()?,
            mtime: r.read_i64()?,
            version: r.read_i32()?,
            cversion: r.read_i32()?,
            aversion: r.read_i32()?,
            ephemeral_owner: r.read_i64()?,
            data_length: r.read_i32()?,
            num_children: r.read_i32()?,
            pzxid: r.read_i64()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Session handshake
// ---------------------------------------------------------------------------

/// First frame a client sends on a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub protocol_version: i32,
    pub last_zxid_seen: i64,
    pub timeout_ms: i32,
    /// `0` asks the server for a brand-new session.
    pub session_id: i64,
    pub password: Vec<u8>,
    pub read_only: bool,
}

impl ConnectRequest {
    /// A handshake for a brand-new session with the requested timeout.
    pub fn new_session(timeout_ms: i32) -> Self {
        Self {
            protocol_version: 0,
            last_zxid_seen: 0,
            timeout_ms,
            session_id: 0,
            password: vec![0; SESSION_PASSWORD_LEN],
            read_only: false,
        }
    }
}

impl Record for ConnectRequest {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.protocol_version);
        w.write_i64(self.last_zxid_seen);
        w.write_i32(self.timeout_ms);
        w.write_i64(self.session_id);
        w.write_buffer(Some(&self.password));
        w.write_bool(self.read_only);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: r.read_i32()?,
            last_zxid_seen: r.read_i64()?,
            timeout_ms: r.read_i32()?,
            session_id: r.read_i64()?,
            password: r.read_buffer()?.unwrap_or_default(),
            // Pre-3.4 clients stop after the password.
            read_only: if r.is_empty() { false } else { r.read_bool()? },
        })
    }
}

/// The server's answer to a [`ConnectRequest`].
///
/// A non-positive `timeout_ms` means the server refused to resume the
/// session because it has expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    pub timeout_ms: i32,
    pub session_id: i64,
    pub password: Vec<u8>,
    pub read_only: bool,
}

impl Record for ConnectResponse {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.protocol_version);
        w.write_i32(self.timeout_ms);
        w.write_i64(self.session_id);
        w.write_buffer(Some(&self.password));
        w.write_bool(self.read_only);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: r.read_i32()?,
            timeout_ms: r.read_i32()?,
            session_id: r.read_i64()?,
            password: r.read_buffer()?.unwrap_or_default(),
            // Older servers do not send the read-only flag.
            read_only: if r.is_empty() { false } else { r.read_bool()? },
        })
    }
}

// ---------------------------------------------------------------------------
// Request / reply headers
// ---------------------------------------------------------------------------

/// Prefix of every request after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub xid: i32,
    /// Raw op code; see [`OpCode`](crate::OpCode).
    pub op: i32,
}

impl Record for RequestHeader {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.xid);
        w.write_i32(self.op);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            xid: r.read_i32()?,
            op: r.read_i32()?,
        })
    }
}

/// Prefix of every reply after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl ReplyHeader {
    /// The reply's result code, or `None` on success.
    pub fn error(&self) -> Option<ErrorCode> {
        (self.err != 0).then(|| ErrorCode::from_i32(self.err))
    }
}

impl Record for ReplyHeader {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.xid);
        w.write_i64(self.zxid);
        w.write_i32(self.err);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            xid: r.read_i32()?,
            zxid: r.read_i64()?,
            err: r.read_i32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Operation bodies
// ---------------------------------------------------------------------------

/// Body of a children listing. Also used for data reads, which have the
/// same `{path, watch}` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWatchRequest {
    pub path: String,
    pub watch: bool,
}

impl Record for PathWatchRequest {
    fn write(&self, w: &mut RecordWriter) {
        w.write_string(Some(&self.path));
        w.write_bool(self.watch);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            path: read_required_string(r)?,
            watch: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetChildrenResponse {
    pub children: Vec<String>,
}

impl Record for GetChildrenResponse {
    fn write(&self, w: &mut RecordWriter) {
        w.write_vec(Some(self.children.as_slice()), |w, c| w.write_string(Some(c)));
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            children: r.read_vec(read_required_string)?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetDataResponse {
    pub data: Vec<u8>,
    pub stat: Stat,
}

impl Record for GetDataResponse {
    fn write(&self, w: &mut RecordWriter) {
        w.write_buffer(Some(&self.data));
        w.write_record(&self.stat);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            // A node created with null data reads back as empty.
            data: r.read_buffer()?.unwrap_or_default(),
            stat: r.read_record()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub path: String,
    pub data: Vec<u8>,
    pub acl: Vec<Acl>,
    pub flags: i32,
}

impl Record for CreateRequest {
    fn write(&self, w: &mut RecordWriter) {
        w.write_string(Some(&self.path));
        w.write_buffer(Some(&self.data));
        w.write_vec(Some(self.acl.as_slice()), |w, acl| w.write_record(acl));
        w.write_i32(self.flags);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            path: read_required_string(r)?,
            data: r.read_buffer()?.unwrap_or_default(),
            acl: r.read_vec(RecordReader::read_record)?.unwrap_or_default(),
            flags: r.read_i32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponse {
    pub path: String,
}

impl Record for CreateResponse {
    fn write(&self, w: &mut RecordWriter) {
        w.write_string(Some(&self.path));
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            path: read_required_string(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub path: String,
    /// Expected node version; `-1` deletes whatever version is there.
    pub version: i32,
}

impl Record for DeleteRequest {
    fn write(&self, w: &mut RecordWriter) {
        w.write_string(Some(&self.path));
        w.write_i32(self.version);
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            path: read_required_string(r)?,
            version: r.read_i32()?,
        })
    }
}

/// A watch notification. This client never sets watches, but servers may
/// still push events (for example when a session state changes), so the
/// record is decoded and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub event_type: i32,
    pub state: i32,
    pub path: String,
}

impl Record for WatcherEvent {
    fn write(&self, w: &mut RecordWriter) {
        w.write_i32(self.event_type);
        w.write_i32(self.state);
        w.write_string(Some(&self.path));
    }

    fn read(r: &mut RecordReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            event_type: r.read_i32()?,
            state: r.read_i32()?,
            path: read_required_string(r)?,
        })
    }
}

impl fmt::Display for WatcherEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} state={} path={}",
            self.event_type, self.state, self.path
        )
    }
}
