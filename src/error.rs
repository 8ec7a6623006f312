//! Public error taxonomy for bridge construction and channel operations.
//!
//! Frame-level failures (corrupt packets, sink write errors) never appear
//! here; they are absorbed on the audio path and show up only as counters
//! and log lines.

use crate::transport::ChannelId;
use std::fmt;
use std::io;

/// Errors surfaced to the synchronous caller.
#[derive(Debug)]
pub enum BridgeError {
    /// Session authentication did not complete within the startup timeout.
    StartupTimeout { waited_ms: u64 },
    /// The transport reported that authentication failed outright.
    AuthFailed(String),
    /// FIFO creation or another filesystem operation failed at startup.
    Resource(io::Error),
    /// The requested channel id did not resolve on the session.
    ChannelNotFound(ChannelId),
    /// A voice connection already exists; disconnect before reconnecting.
    AlreadyConnected,
    /// Transport-level connect failure; the caller may retry.
    ConnectFailed(String),
    /// The background loop did not answer within the request timeout.
    /// The loop may still complete the operation after the caller gave up.
    RequestTimeout(&'static str),
    /// The controller loop has shut down and accepts no further requests.
    ControllerClosed,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::StartupTimeout { waited_ms } => {
                write!(f, "session authentication timed out after {waited_ms}ms")
            }
            BridgeError::AuthFailed(reason) => {
                write!(f, "session authentication failed: {reason}")
            }
            BridgeError::Resource(err) => write!(f, "pipe resource error: {err}"),
            BridgeError::ChannelNotFound(id) => write!(f, "channel {id} not found"),
            BridgeError::AlreadyConnected => {
                write!(f, "a voice connection is already active; disconnect first")
            }
            BridgeError::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            BridgeError::RequestTimeout(op) => {
                write!(f, "{op} request timed out waiting on the session loop")
            }
            BridgeError::ControllerClosed => write!(f, "session controller is closed"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        BridgeError::Resource(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_channel() {
        let err = BridgeError::ChannelNotFound(834);
        assert!(err.to_string().contains("834"));
    }

    #[test]
    fn resource_error_keeps_its_source() {
        let err = BridgeError::Resource(io::Error::new(io::ErrorKind::PermissionDenied, "mkfifo"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
