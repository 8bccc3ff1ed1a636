//! Error values surfaced by the SDK.
//!
//! None of these are fatal to the host process. Start attempts report them to
//! the caller; the poll loop absorbs them and degrades to a stopped run.

/// How a request failed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The per-request timeout elapsed.
    Timeout,
    /// The TCP/TLS connection could not be established (client not listening).
    Connect,
    /// Any other I/O, status or body error.
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Timeout => f.write_str("timed out"),
            TransportKind::Connect => f.write_str("connection refused"),
            TransportKind::Other => f.write_str("transport error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccepterError {
    /// The lockfile is missing or could not be parsed.
    #[error("client credentials unavailable: {0}")]
    CredentialUnavailable(String),
    /// No connection info has been loaded yet, or it was dropped.
    #[error("not connected to the client")]
    ConnectionUnestablished,
    /// A session could not be created or is not open.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
    #[error("{method} {endpoint} {kind}: {message}")]
    Transport {
        method: String,
        endpoint: String,
        kind: TransportKind,
        message: String,
    },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AccepterError {
    /// Whether the error means the client process is no longer listening.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            AccepterError::Transport {
                kind: TransportKind::Connect,
                ..
            }
        )
    }
}

/// Lockfile parse failures. All of them collapse to "unavailable" for callers
/// of [`crate::lockfile::CredentialSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockfileError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid process id {0:?}")]
    InvalidPid(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("unknown protocol {0:?}")]
    InvalidProtocol(String),
}
