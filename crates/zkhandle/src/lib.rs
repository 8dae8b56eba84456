//! # zkhandle
//!
//! Managed client handle for a ZooKeeper-compatible coordination namespace.
//!
//! zkhandle opens one long-lived session and exposes four namespace
//! operations: list children, read node data, create a node, and delete a
//! node. Configuration is validated before anything is contacted, faults
//! after that point are logged and turned into sentinel results, and the
//! session is closed exactly once, either by [`NamespaceClient::close`] or
//! when the client is dropped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zkhandle::prelude::*;
//!
//! # async fn demo() -> Result<(), ClientError> {
//! let mut client = NamespaceClient::builder()
//!     .connect_string("127.0.0.1:2181")
//!     .session_timeout_ms(5_000)
//!     .build()
//!     .await?;
//!
//! client.create_node("/greeting", "hello").await;
//! assert_eq!(client.get_node_data("/greeting").await.as_deref(), Some("hello"));
//! client.delete_node("/greeting").await;
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;

pub use client::{NamespaceClient, NamespaceClientBuilder};
pub use error::ClientError;

/// Everything an application usually needs, in one import.
pub mod prelude {
    pub use crate::{ClientError, NamespaceClient, NamespaceClientBuilder};
    pub use zkhandle_protocol::ErrorCode;
    pub use zkhandle_session::{
        ConfigError, LoggingListener, SessionConfig, SessionError, SessionId,
        SessionState, StateListener,
    };
}
