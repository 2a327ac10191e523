//! Transport configuration.
//!
//! One explicit structure consumed at construction and never mutated
//! afterwards. The proxy hop and the target hop each get their own clone.

use url::Url;

use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintProfile, Http2Settings};
use crate::timeouts::Timeouts;

/// Default User-Agent sent when the caller supplies none.
pub const DEFAULT_USER_AGENT: &str = concat!("mimic/", env!("CARGO_PKG_VERSION"));

/// Default cap on a buffered response body (256MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// ClientHello profile for https targets and HTTPS proxies.
    pub profile: FingerprintProfile,
    /// Forward proxy: `http://`, `https://` or `socks5://`, credentials in userinfo.
    pub proxy: Option<Url>,
    pub timeouts: Timeouts,
    /// SETTINGS sent in the HTTP/2 preface.
    pub http2: Http2Settings,
    /// User-Agent used when the request carries none. An empty string sends none.
    pub user_agent: String,
    /// Send header values the field grammar rejects (CR/LF/NUL excepted on HTTP/1).
    /// Names are always checked on HTTP/2.
    pub allow_invalid_header_values: bool,
    /// Add `Accept-Encoding: gzip` and decode responses transparently.
    pub transparent_compression: bool,
    /// Extra trust anchors (DER or PEM) for target and proxy TLS.
    pub root_certs: Vec<Vec<u8>>,
    /// Skip certificate verification. Testing only.
    pub danger_accept_invalid_certs: bool,
    /// Max idle HTTP/1.1 connections kept per target.
    pub max_idle_per_host: usize,
    /// Responses with a larger body fail instead of being buffered.
    pub max_response_body_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            profile: FingerprintProfile::default(),
            proxy: None,
            timeouts: Timeouts::transport_defaults(),
            http2: Http2Settings::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allow_invalid_header_values: false,
            transparent_compression: true,
            root_certs: Vec::new(),
            danger_accept_invalid_certs: false,
            max_idle_per_host: 8,
            max_response_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl TransportConfig {
    /// Parse and set the proxy URL.
    pub fn with_proxy(mut self, proxy: &str) -> Result<Self> {
        let url = Url::parse(proxy).map_err(|e| Error::InvalidProxy(format!("{proxy}: {e}")))?;
        self.proxy = Some(url);
        Ok(self)
    }

    /// Copy used for the TLS hop to an HTTPS proxy.
    pub(crate) fn for_proxy_hop(&self) -> Self {
        Self {
            proxy: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TransportConfig::default();
        assert!(!cfg.allow_invalid_header_values);
        assert!(cfg.user_agent.starts_with("mimic/"));
        assert_eq!(cfg.profile, FingerprintProfile::Chrome83);
    }

    #[test]
    fn test_proxy_hop_clone_drops_proxy() {
        let cfg = TransportConfig::default()
            .with_proxy("https://user:pw@proxy.example:8443")
            .unwrap();
        let hop = cfg.for_proxy_hop();
        assert!(hop.proxy.is_none());
        assert_eq!(hop.profile, cfg.profile);
    }

    #[test]
    fn test_bad_proxy_url() {
        let err = TransportConfig::default().with_proxy("::nope").unwrap_err();
        assert!(matches!(err, Error::InvalidProxy(_)));
    }
}
