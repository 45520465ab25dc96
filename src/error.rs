//! Error taxonomy for the RESP codec, connection pipeline, and pool.
//!
//! Mirrors the kinds enumerated in the design: transport/protocol errors are
//! fatal to a connection, server errors surface per-command, conversion
//! errors come from a response mapper, and pool errors never cross
//! connections.

use std::fmt;
use std::io;

/// Coarse classification of a [`RedisError`], independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TCP failure, EOF, DNS failure. Fatal to the connection.
    Transport,
    /// Malformed RESP or an unexpected frame. Fatal to the connection.
    Protocol,
    /// The server replied with `-ERR ...`. Does not kill the connection.
    Server,
    /// A response mapper could not produce the requested type.
    Conversion,
    /// The pool has been closed.
    PoolClosed,
    /// No candidate address was available to satisfy a lease.
    NoAvailableConnectionTarget,
    /// The pending-lease queue is already at its configured bound.
    LeaseQueueFull,
    /// Authentication (AUTH/handshake) failed.
    AuthenticationFailed,
    /// Caller misuse: subscribing on a leased-only connection, empty
    /// argument list where one is required, etc.
    Usage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Server => "server error",
            ErrorKind::Conversion => "conversion error",
            ErrorKind::PoolClosed => "pool closed",
            ErrorKind::NoAvailableConnectionTarget => "no available connection target",
            ErrorKind::LeaseQueueFull => "lease queue full",
            ErrorKind::AuthenticationFailed => "authentication failed",
            ErrorKind::Usage => "usage error",
        };
        f.write_str(s)
    }
}

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct RedisError {
    kind: ErrorKind,
    detail: String,
}

impl RedisError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        RedisError {
            kind,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// A connection-fatal error: transport failure or unrecoverable codec state.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport | ErrorKind::Protocol)
    }
}

impl From<io::Error> for RedisError {
    fn from(e: io::Error) -> Self {
        RedisError::new(ErrorKind::Transport, e.to_string())
    }
}

pub type RedisResult<T> = Result<T, RedisError>;
