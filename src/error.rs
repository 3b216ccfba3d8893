//! Error types for ESL operations

use crate::connection::DisconnectReason;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Framing failures raised by the frame decoder.
///
/// Every variant is fatal to the connection that produced it: once the byte
/// stream is out of step there is no reliable way to find the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FramingError {
    /// A header line without a `:` separator.
    #[error("malformed header line: {line:?}")]
    MalformedHeader { line: String },

    /// `Content-Length` is not a non-negative integer.
    #[error("invalid Content-Length: {value:?}")]
    InvalidContentLength { value: String },

    /// `Content-Length` exceeds the configured body limit.
    #[error("Content-Length {length} exceeds limit {limit}")]
    BodyTooLarge { length: usize, limit: usize },

    /// No blank-line delimiter within the configured header block limit.
    #[error("header block exceeds {limit} bytes without a terminator")]
    HeaderBlockTooLarge { limit: usize },

    /// Header bytes are not valid UTF-8.
    #[error("invalid UTF-8 in header block")]
    InvalidUtf8,
}

/// Errors surfaced by the ESL engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EslError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The peer broke a protocol rule (reply with no pending command,
    /// bgapi acknowledgement without `Job-UUID`, missing `Content-Type`).
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("unknown Content-Type: {content_type}")]
    UnknownContentType { content_type: String },

    /// Inbound authentication was rejected or never completed.
    #[error("authentication failed: {reply_text}")]
    AuthenticationFailed { reply_text: String },

    /// The connection ended before (or while) the operation completed.
    #[error("connection closed: {0}")]
    ConnectionClosed(DisconnectReason),

    /// The connection is not in a state that accepts commands.
    #[error("not connected")]
    NotConnected,

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Reply-Text started with `-ERR`.
    #[error("command failed: {reply_text}")]
    CommandFailed { reply_text: String },

    /// Reply-Text matched neither `+OK` nor `-ERR`.
    #[error("unexpected reply: {reply_text}")]
    UnexpectedReply { reply_text: String },

    /// A caller-supplied value cannot be put on the wire.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl EslError {
    pub(crate) fn protocol_violation(message: impl Into<String>) -> Self {
        EslError::ProtocolViolation {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(reply_text: impl Into<String>) -> Self {
        EslError::AuthenticationFailed {
            reply_text: reply_text.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        EslError::InvalidArgument {
            message: message.into(),
        }
    }

    /// `true` for errors that end the whole connection rather than one call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EslError::Io(_)
                | EslError::Framing(_)
                | EslError::ProtocolViolation { .. }
                | EslError::ConnectionClosed(_)
        )
    }
}
