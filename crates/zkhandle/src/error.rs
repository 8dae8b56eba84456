//! Unified error type for building a zkhandle client.

use zkhandle_session::{ConfigError, SessionError};

/// Why a [`NamespaceClient`](crate::NamespaceClient) could not be built.
///
/// This is the only error the facade propagates: once a client exists,
/// operation faults are logged and turned into sentinel values instead
/// (see the `try_*` methods for the underlying errors). The `#[from]`
/// attributes let `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The configuration was rejected before any connection was attempted.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// No session could be opened with the configured servers.
    #[error("could not open session: {0}")]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_error() {
        let err: ClientError = ConfigError::BlankConnectString.into();
        assert!(matches!(
            err,
            ClientError::Config(ConfigError::BlankConnectString)
        ));
        assert_eq!(
            err.to_string(),
            "invalid configuration: connect string must not be blank"
        );
    }

    #[test]
    fn test_from_session_error() {
        let err: ClientError = SessionError::ConnectionLoss.into();
        assert!(matches!(err, ClientError::Session(_)));
        assert!(err.to_string().contains("connection to the server was lost"));
    }
}
