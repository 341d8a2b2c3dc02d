//! Error types for the WebService test proxy.

use thiserror::Error;

/// Failures surfaced by the library, split so that callers can tell a
/// misconfigured operation from "nothing arrived on the wire".
#[derive(Error, Debug)]
pub enum WsError {
    /// Invalid or missing configuration (message template, action arguments).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An XML message could not be parsed into a document.
    #[error("XML message invalid: {0}")]
    InvalidMessage(String),

    /// A path expression failed in strict mode (unmatched target or missing
    /// value). Lenient mode never produces this variant.
    #[error("path expression failed: {0}")]
    PathExpression(String),

    /// `receive` was called on a server that is not started.
    #[error("HTTP server is not started")]
    NotStarted,

    /// No request arrived within the receive timeout.
    #[error("no request received within {0} ms")]
    ReceiveTimeout(u64),

    /// An inbound request was dropped because the hand-off queue stayed full
    /// for the whole backpressure window.
    #[error("request dropped: hand-off queue full")]
    RequestDropped,

    /// Connection-level failure while receiving or responding.
    #[error("transport error: {0}")]
    Transport(String),

    /// A blocked `receive` was interrupted by `stop()`.
    #[error("operation cancelled")]
    Cancelled,
}

impl WsError {
    /// True for failures of the transport layer ("nothing arrived", dropped
    /// request, connection I/O), as opposed to misconfiguration.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            WsError::NotStarted
                | WsError::ReceiveTimeout(_)
                | WsError::RequestDropped
                | WsError::Transport(_)
        )
    }

    /// True for failures that are fatal to the current operation regardless
    /// of what the wire does.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WsError::Configuration(_) | WsError::InvalidMessage(_) | WsError::PathExpression(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(WsError::ReceiveTimeout(1000).is_transport());
        assert!(WsError::NotStarted.is_transport());
        assert!(!WsError::ReceiveTimeout(1000).is_configuration());

        assert!(WsError::Configuration("missing message".into()).is_configuration());
        assert!(WsError::InvalidMessage("bad xml".into()).is_configuration());

        // Cancellation is neither: callers must treat it as its own signal.
        assert!(!WsError::Cancelled.is_transport());
        assert!(!WsError::Cancelled.is_configuration());
    }

    #[test]
    fn test_timeout_message_names_duration() {
        let err = WsError::ReceiveTimeout(2500);
        assert!(err.to_string().contains("2500 ms"));
    }
}
