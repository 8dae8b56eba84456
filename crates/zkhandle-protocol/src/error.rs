//! Error types for the protocol layer.
//!
//! Each crate in zkhandle defines its own error enum. A `ProtocolError`
//! always means the bytes on the wire did not form the record we expected;
//! it never describes a networking problem or a server-side failure.

/// Errors that can occur while encoding or decoding wire records.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame ended before the record was complete.
    ///
    /// `needed` is the number of bytes the next field required and
    /// `remaining` what was left in the frame.
    #[error("unexpected end of frame: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A length prefix was negative but not the `-1` null marker.
    #[error("negative length {0}")]
    NegativeLength(i32),

    /// A string field did not hold valid UTF-8.
    #[error("invalid utf-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The record was decoded but bytes were left over in the frame.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// The record decoded cleanly but violates the protocol.
    ///
    /// For example a reply whose transaction id does not match the
    /// oldest outstanding request.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
