//! Session management for zkhandle.
//!
//! This crate owns the lifecycle of one coordination-server session:
//!
//! 1. **Configuration**: validating a [`SessionConfig`] and parsing its
//!    connect string into hosts and a chroot ([`ConnectString`])
//! 2. **Establishment**: trying hosts until one completes the handshake
//!    ([`Session::connect`])
//! 3. **Requests**: pipelining list/read/create/delete requests over the
//!    connection and matching replies to callers
//! 4. **Liveness**: keep-alive pings, loss detection, and state reports to
//!    a [`StateListener`]
//!
//! # How it fits in the stack
//!
//! ```text
//! Client Layer (above)  ← sentinel-on-fault namespace operations
//!     ↕
//! Session Layer (this crate)  ← session handshake, request pipeline, state
//!     ↕
//! Protocol Layer (below)  ← record encoding, op and error codes
//! ```
//!
//! A session is never re-established: once the connection is lost the
//! session reports `Disconnected` and every later request fails with
//! [`SessionError::ConnectionLoss`].

mod config;
mod error;
mod io;
mod path;
mod session;
mod state;

pub use config::{ConnectString, DEFAULT_PORT, SessionConfig};
pub use error::{ConfigError, SessionError};
pub use session::Session;
pub use state::{LoggingListener, SessionId, SessionState, StateListener};
