//! Timeout configuration.
//!
//! All timeouts are optional. When `None`, no timeout is applied for that phase.
//!
//! - **connect**: TCP connect to the first hop (proxy or target). Does not reset.
//! - **tls_handshake**: each TLS handshake (proxy hop and target hop separately).
//! - **response_header**: request written until response head received.
//! - **idle_connection**: how long a pooled connection with no requests in flight
//!   is kept before it is closed.

use std::time::Duration;

/// Timeout configuration for a transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect timeout.
    ///
    /// Default: 30s
    pub connect: Option<Duration>,

    /// TLS handshake timeout. On expiry the partially established connection
    /// is dropped and the dial fails with `TlsHandshakeTimeout`.
    ///
    /// Default: 10s
    pub tls_handshake: Option<Duration>,

    /// Time from request written to response headers received.
    ///
    /// Default: none
    pub response_header: Option<Duration>,

    /// Idle time after which a pooled connection is closed.
    ///
    /// Default: 90s
    pub idle_connection: Option<Duration>,
}

impl Timeouts {
    /// Defaults mirroring a standard HTTP client transport.
    pub fn transport_defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(30)),
            tls_handshake: Some(Duration::from_secs(10)),
            response_header: None,
            idle_connection: Some(Duration::from_secs(90)),
        }
    }

    /// No timeouts at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn connect(mut self, d: Duration) -> Self {
        self.connect = Some(d);
        self
    }

    pub fn tls_handshake(mut self, d: Duration) -> Self {
        self.tls_handshake = Some(d);
        self
    }

    pub fn response_header(mut self, d: Duration) -> Self {
        self.response_header = Some(d);
        self
    }

    pub fn idle_connection(mut self, d: Duration) -> Self {
        self.idle_connection = Some(d);
        self
    }
}
