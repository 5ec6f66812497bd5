//! Error types for the media relay core.

use std::fmt;

/// Errors that can occur in the relay core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Startup**: [`ConfigInvalid`](Self::ConfigInvalid), [`SocketUnavailable`](Self::SocketUnavailable).
/// - **Forwarding plane**: [`Io`](Self::Io) — transient UDP I/O, never surfaced past the reactor.
/// - **Registry**: [`PortExhausted`](Self::PortExhausted), [`SessionNotFound`](Self::SessionNotFound),
///   [`AllocFailure`](Self::AllocFailure).
#[derive(Debug, thiserror::Error)]
pub enum RtpProxyError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Startup configuration failed validation (port range, bridging mode, etc).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A `bind`/`listen`/`socket` call failed during startup.
    #[error("socket unavailable: {0}")]
    SocketUnavailable(String),

    /// The port allocator has no even ports left in `[port_min, port_max]`.
    #[error("port range exhausted")]
    PortExhausted,

    /// No session with the given id exists in the [`SessionSlab`](crate::registry::SessionSlab).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Failed to record the peer address for an incoming packet (OOM on the hot path).
    #[error("can't allocate memory for remote address")]
    AllocFailure,
}

/// Specific kind of recoverable, per-packet receive failure.
///
/// These never propagate past the reactor: both cause it to move on to the
/// next socket without logging above `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvErrorKind {
    /// The socket had no datagram queued (`EAGAIN`/`EWOULDBLOCK`).
    WouldBlock,
    /// Any other recoverable I/O error (e.g. `ECONNRESET` on a UDP socket from
    /// a prior ICMP port-unreachable).
    Transient,
}

impl fmt::Display for RecvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "would block"),
            Self::Transient => write!(f, "transient I/O error"),
        }
    }
}

/// Convenience alias for `Result<T, RtpProxyError>`.
pub type Result<T> = std::result::Result<T, RtpProxyError>;
