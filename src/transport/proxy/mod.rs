//! Proxy-aware dialing.
//!
//! The proxy URL is parsed into a [`ProxyRoute`] once, when the transport is
//! built. Every dial then walks the same chain: TCP to the first hop, TLS to
//! the proxy for `https://` proxies, then SOCKS5 or CONNECT negotiation.
//! Failures carry the [`Hop`] they happened at.

mod http_connect;
mod socks5;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use percent_encoding::percent_decode_str;
use tokio::net::TcpStream;
use url::Url;

use crate::config::TransportConfig;
use crate::error::{Error, Hop, Result};
use crate::transport::connector::{BoringConnector, BoxedIo};
use crate::version::HttpVersion;

/// Kind of forward proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

/// Parsed forward proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    scheme: ProxyScheme,
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
}

impl ProxyRoute {
    /// Parse `http://`, `https://` or `socks5://` URLs. Userinfo becomes the
    /// proxy credentials.
    pub fn parse(url: &Url) -> Result<Self> {
        let (scheme, default_port) = match url.scheme() {
            "http" => (ProxyScheme::Http, 80),
            "https" => (ProxyScheme::Https, 443),
            "socks5" | "socks5h" => (ProxyScheme::Socks5, 1080),
            other => {
                return Err(Error::InvalidProxy(format!(
                    "unsupported proxy scheme {other:?}"
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidProxy(format!("proxy URL has no host: {url}")))?
            .to_string();
        let port = url.port().unwrap_or(default_port);

        let credentials = if url.username().is_empty() {
            None
        } else {
            let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
            Some((
                decode(url.username()),
                decode(url.password().unwrap_or_default()),
            ))
        };

        Ok(Self {
            scheme,
            host,
            port,
            credentials,
        })
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(user, pass)| (user.as_str(), pass.as_str()))
    }

    /// `Proxy-Authorization` value for HTTP and HTTPS proxies.
    pub fn basic_auth(&self) -> Option<String> {
        self.credentials
            .as_ref()
            .map(|(user, pass)| format!("Basic {}", BASE64.encode(format!("{user}:{pass}"))))
    }

    /// Whether plain-HTTP requests are sent to this proxy in absolute form
    /// rather than tunneled.
    pub fn forwards_plain_http(&self) -> bool {
        matches!(self.scheme, ProxyScheme::Http | ProxyScheme::Https)
    }
}

/// Dials targets directly or through the configured proxy.
#[derive(Debug, Clone)]
pub struct Dialer {
    route: Option<ProxyRoute>,
    connect_timeout: Option<Duration>,
    /// TLS to an HTTPS proxy for CONNECT, built from the proxy-hop copy of
    /// the config.
    proxy_tls: BoringConnector,
    /// TLS to an HTTPS proxy for absolute-form requests, default ClientHello.
    forward_tls: BoringConnector,
}

impl Dialer {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let route = config.proxy.as_ref().map(ProxyRoute::parse).transpose()?;
        // both proxy hops speak HTTP/1.1 inside the TLS session
        let proxy_tls = BoringConnector::from_config(&config.for_proxy_hop()).http1_only();
        Ok(Self {
            route,
            connect_timeout: config.timeouts.connect,
            forward_tls: proxy_tls.default_path().http1_only(),
            proxy_tls,
        })
    }

    pub fn route(&self) -> Option<&ProxyRoute> {
        self.route.as_ref()
    }

    /// Byte stream that reaches `host:port`, ready for the target's TLS
    /// handshake or for plain HTTP/1.1.
    pub async fn connect(&self, host: &str, port: u16) -> Result<BoxedIo> {
        let Some(route) = &self.route else {
            let tcp = tcp_connect(host, port, self.connect_timeout, Hop::TargetConnect).await?;
            tracing::debug!(host, port, "direct connection established");
            return Ok(Box::new(tcp));
        };

        match route.scheme {
            ProxyScheme::Socks5 => {
                let mut tcp =
                    tcp_connect(&route.host, route.port, self.connect_timeout, Hop::ProxyConnect)
                        .await?;
                socks5::handshake(&mut tcp, host, port, route.credentials()).await?;
                Ok(Box::new(tcp))
            }
            ProxyScheme::Http | ProxyScheme::Https => {
                let mut stream = self.open_proxy(route, &self.proxy_tls).await?;
                let authority = format!("{host}:{port}");
                http_connect::handshake(&mut stream, &authority, route.basic_auth().as_deref())
                    .await?;
                tracing::debug!(
                    proxy = %route.host,
                    target = %authority,
                    "CONNECT tunnel established"
                );
                Ok(stream)
            }
        }
    }

    /// Connection to the proxy itself, for absolute-form plain-HTTP
    /// requests. HTTPS proxies are reached with the default ClientHello.
    pub async fn connect_forward_proxy(&self, route: &ProxyRoute) -> Result<BoxedIo> {
        self.open_proxy(route, &self.forward_tls).await
    }

    async fn open_proxy(&self, route: &ProxyRoute, tls: &BoringConnector) -> Result<BoxedIo> {
        let tcp =
            tcp_connect(&route.host, route.port, self.connect_timeout, Hop::ProxyConnect).await?;
        if route.scheme != ProxyScheme::Https {
            return Ok(Box::new(tcp));
        }
        let (stream, info) = tls
            .handshake(Box::new(tcp), &route.host)
            .await
            .map_err(|e| match e {
                Error::TlsHandshakeFailed(reason) => Error::dial(Hop::ProxyTls, reason),
                other => other,
            })?;
        if info.http_version() != HttpVersion::Http1_1 {
            return Err(Error::dial(
                Hop::ProxyTls,
                format!("proxy negotiated {:?}, expected http/1.1", info.alpn_str()),
            ));
        }
        Ok(Box::new(stream))
    }
}

async fn tcp_connect(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
    hop: Hop,
) -> Result<TcpStream> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let connect = TcpStream::connect((host, port));
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| Error::dial(hop, format!("connect to {host}:{port} timed out after {limit:?}")))?,
        None => connect.await,
    }
    .map_err(|e| Error::dial(hop, format!("connect to {host}:{port}: {e}")))?;

    let _ = stream.set_nodelay(true);
    Ok(stream)
}
