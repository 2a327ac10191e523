//! Error types for mimic.
//!
//! Every error reports the [`Phase`] it was raised in so callers can tell a
//! rejected request (nothing written) from a broken connection.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of a round trip an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// TCP connect or proxy negotiation.
    Dial,
    /// TLS handshake with the target or a proxy.
    Tls,
    /// Building or compressing the request head; nothing has been written.
    Encode,
    /// Writing request bytes.
    Write,
    /// Reading or waiting for the response.
    Read,
    /// Configuration or local failures outside a round trip.
    Other,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::Tls => "tls",
            Self::Encode => "encode",
            Self::Write => "write",
            Self::Read => "read",
            Self::Other => "other",
        }
    }
}

/// Hop of a dial chain that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// TCP connect to the proxy, or the SOCKS5 / CONNECT negotiation with it.
    ProxyConnect,
    /// TLS handshake with an HTTPS proxy.
    ProxyTls,
    /// TCP connect to the target (direct routes only).
    TargetConnect,
    /// TLS handshake with the target through the established path.
    TargetTls,
}

impl std::fmt::Display for Hop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ProxyConnect => "proxy-connect",
            Self::ProxyTls => "proxy-tls",
            Self::TargetConnect => "target-connect",
            Self::TargetTls => "target-tls",
        })
    }
}

/// Errors that can occur while sending a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `:path` could not be derived as path-absolute or `*`.
    #[error("invalid request :path {0:?}")]
    InvalidPath(String),

    /// Header name or value violates field grammar.
    #[error("invalid HTTP header field {name:?}: {reason}")]
    InvalidHeaderField { name: String, reason: &'static str },

    /// Encoded header list larger than the peer accepts.
    #[error("max header list size exceeded ({size} > {limit})")]
    MaxHeaderListSizeExceeded { size: u64, limit: u64 },

    /// TLS handshake did not complete in time.
    #[error("TLS handshake timeout after {0:?}")]
    TlsHandshakeTimeout(Duration),

    /// TLS handshake failed at the protocol level.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// A later dial negotiated a different ALPN than the bootstrap dial.
    #[error("unexpected switch from ALPN {expected:?} to {actual:?}")]
    AlpnMismatch { expected: String, actual: String },

    /// Dial chain failed at the given hop.
    #[error("dial failed at {hop}: {reason}")]
    DialFailed { hop: Hop, reason: String },

    /// Peer reset the stream.
    #[error("stream {stream_id} reset by peer (error code {code:#x})")]
    PeerReset { stream_id: u32, code: u32 },

    /// Peer sent GOAWAY; the connection accepts no new streams.
    #[error("connection closed by GOAWAY (last stream {last_stream_id}, error code {code:#x})")]
    GoAway { last_stream_id: u32, code: u32 },

    /// Connection is no longer usable (transport break or idle close).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Request was canceled by the caller.
    #[error("request canceled")]
    Canceled,

    /// Writing to the connection failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Reading from the connection failed.
    #[error("read failed: {0}")]
    Read(String),

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Proxy URL could not be used.
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),

    /// Target URL scheme is neither http nor https.
    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    /// TLS configuration error (building the context, not the handshake).
    #[error("TLS error: {0}")]
    Tls(String),

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Generic timeout error.
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Create an invalid header field error.
    pub fn invalid_header(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidHeaderField {
            name: name.into(),
            reason,
        }
    }

    /// Create a hop-tagged dial error.
    pub fn dial(hop: Hop, reason: impl std::fmt::Display) -> Self {
        Self::DialFailed {
            hop,
            reason: reason.to_string(),
        }
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection-closed error.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    /// Create a write error.
    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::Write(err.to_string())
    }

    /// Create a read error.
    pub fn read(err: impl std::fmt::Display) -> Self {
        Self::Read(err.to_string())
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a TLS configuration error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Phase of the round trip this error belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::InvalidPath(_)
            | Self::InvalidHeaderField { .. }
            | Self::MaxHeaderListSizeExceeded { .. } => Phase::Encode,
            Self::TlsHandshakeTimeout(_) | Self::TlsHandshakeFailed(_) | Self::AlpnMismatch { .. } => {
                Phase::Tls
            }
            Self::DialFailed { hop, .. } => match hop {
                Hop::ProxyTls | Hop::TargetTls => Phase::Tls,
                Hop::ProxyConnect | Hop::TargetConnect => Phase::Dial,
            },
            Self::Write(_) => Phase::Write,
            Self::PeerReset { .. }
            | Self::GoAway { .. }
            | Self::ConnectionClosed(_)
            | Self::Read(_)
            | Self::HttpProtocol(_)
            | Self::Decompression(_)
            | Self::Timeout(_) => Phase::Read,
            Self::Canceled
            | Self::InvalidProxy(_)
            | Self::UnsupportedScheme(_)
            | Self::Tls(_)
            | Self::UrlParse(_)
            | Self::Json(_)
            | Self::Io(_) => Phase::Other,
        }
    }

    /// Whether the request was rejected before any byte reached the wire.
    pub fn is_pre_write(&self) -> bool {
        self.phase() == Phase::Encode
    }

    /// Offending header name, for header validation errors.
    pub fn header_name(&self) -> Option<&str> {
        match self {
            Self::InvalidHeaderField { name, .. } => Some(name),
            _ => None,
        }
    }
}
