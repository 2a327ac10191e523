//! Caller-facing round tripper.
//!
//! `https://` targets get one codec per (host, port), chosen by the ALPN of
//! the first dial: a shared HTTP/2 connection or pooled HTTP/1.1
//! connections. `http://` targets always use pooled HTTP/1.1 and never go
//! through the fingerprinted connector.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use tokio_boring::SslStream;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::{Error, Hop, Result};
use crate::fingerprint::{FingerprintProfile, Http2Settings};
use crate::pool::{ConnectionPool, PoolKey, PoolStats};
use crate::request::Request;
use crate::response::Response;
use crate::timeouts::Timeouts;
use crate::transport::connector::{BoringConnector, BoxedIo, MaybeHttpsStream, TlsInfo};
use crate::transport::h1::{self, H1Connection, H1Options, TargetForm};
use crate::transport::h2::{
    request_headers, trailer_fields, EncodeOptions, H2Connection, H2Options,
};
use crate::transport::proxy::Dialer;
use crate::version::HttpVersion;

/// Codec cached for an `https://` target after its bootstrap dial.
enum Codec {
    /// Requests use pooled HTTP/1.1 connections.
    Http1,
    /// Requests share one multiplexed connection.
    Http2 { conn: H2Connection, tls: TlsInfo },
}

impl Codec {
    fn version(&self) -> HttpVersion {
        match self {
            Self::Http1 => HttpVersion::Http1_1,
            Self::Http2 { .. } => HttpVersion::Http2,
        }
    }
}

/// Connection picked for one request.
enum Acquired {
    Http1(H1Connection),
    Http2 { conn: H2Connection, tls: TlsInfo },
}

type Slot = Arc<tokio::sync::Mutex<Option<Codec>>>;

struct Inner {
    config: TransportConfig,
    dialer: Dialer,
    tls: BoringConnector,
    pool: ConnectionPool,
    targets: Mutex<HashMap<PoolKey, Slot>>,
}

/// HTTP transport with ordered headers and a fingerprinted ClientHello.
///
/// Cheap to clone; clones share connections.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("profile", &self.inner.config.profile)
            .field("proxy", &self.inner.dialer.route())
            .finish()
    }
}

impl Transport {
    /// Build a transport. The proxy URL is parsed here, once.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let dialer = Dialer::new(&config)?;
        let tls = BoringConnector::from_config(&config);
        let pool = ConnectionPool::new(config.timeouts.idle_connection, config.max_idle_per_host);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                dialer,
                tls,
                pool,
                targets: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Send a request and buffer the full response.
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.round_trip(&request, None).await
    }

    /// Like [`send`](Self::send), but gives up with [`Error::Canceled`] once
    /// `cancel` fires. An open HTTP/2 stream is reset; an HTTP/1.1
    /// connection in use is closed.
    pub async fn send_with_cancel(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Response> {
        self.round_trip(&request, Some(&cancel)).await
    }

    /// Close expired idle HTTP/1.1 connections, forget dead HTTP/2 ones and
    /// drop the bookkeeping for targets left without a live connection. Such
    /// a target starts over with a fresh bootstrap dial.
    pub async fn close_idle_connections(&self) {
        self.inner.pool.cleanup().await;
        let slots: Vec<(PoolKey, Slot)> = match self.inner.targets.lock() {
            Ok(targets) => targets.iter().map(|(k, s)| (k.clone(), s.clone())).collect(),
            Err(_) => return,
        };
        let mut unused = Vec::new();
        for (key, slot) in slots {
            let mut codec = slot.lock().await;
            let live = match &*codec {
                Some(Codec::Http2 { conn, .. }) => conn.is_usable(),
                Some(Codec::Http1) => self.inner.pool.has_idle(&key).await,
                None => false,
            };
            if !live {
                *codec = None;
                unused.push(key);
            }
        }

        let Ok(mut targets) = self.inner.targets.lock() else {
            return;
        };
        for key in unused {
            // a caller between slot() and dialing still holds a clone
            let idle = targets.get(&key).is_some_and(|slot| {
                Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|codec| codec.is_none())
            });
            if idle {
                targets.remove(&key);
            }
        }
        tracing::trace!(targets = targets.len(), "idle targets pruned");
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats().await
    }

    async fn round_trip(&self, req: &Request, cancel: Option<&CancellationToken>) -> Result<Response> {
        let is_https = match req.url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };
        let key = PoolKey::new(req.host()?, req.port()?, is_https);

        let config = &self.inner.config;
        let add_gzip = config.transparent_compression
            && req.method != Method::HEAD
            && !req.headers.contains("accept-encoding")
            && !req.headers.contains("range");

        tracing::debug!(method = %req.method, target = %key, "sending request");
        let response = if is_https {
            self.send_https(req, &key, add_gzip, cancel).await?
        } else {
            self.send_plain(req, &key, add_gzip, cancel).await?
        };

        if add_gzip {
            response.decode_transparent_gzip()
        } else {
            Ok(response)
        }
    }

    async fn send_plain(
        &self,
        req: &Request,
        key: &PoolKey,
        add_gzip: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let inner = &self.inner;
        let forward = inner.dialer.route().filter(|r| r.forwards_plain_http());
        let proxy_auth = forward.and_then(|r| r.basic_auth());
        let opts = H1Options {
            default_user_agent: &inner.config.user_agent,
            allow_invalid_header_values: inner.config.allow_invalid_header_values,
            add_gzip,
            target_form: if forward.is_some() {
                TargetForm::Absolute
            } else {
                TargetForm::Origin
            },
            proxy_authorization: proxy_auth.as_deref(),
        };
        let head = h1::encode_request(req, &opts)?;

        let conn = match inner.pool.checkout(key).await {
            Some(conn) => conn,
            None => {
                let io = cancellable(cancel, async {
                    match forward {
                        Some(route) => inner.dialer.connect_forward_proxy(route).await,
                        None => inner.dialer.connect(&key.host, key.port).await,
                    }
                })
                .await?;
                H1Connection::new(MaybeHttpsStream::Http(io), None)
                    .with_max_body_size(inner.config.max_response_body_size)
            }
        };
        self.exchange_h1(key, conn, &head, &req.method, cancel).await
    }

    async fn send_https(
        &self,
        req: &Request,
        key: &PoolKey,
        add_gzip: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let config = &self.inner.config;
        match cancellable(cancel, self.acquire(key)).await? {
            Acquired::Http2 { conn, tls } => {
                let opts = EncodeOptions {
                    default_user_agent: &config.user_agent,
                    allow_invalid_header_values: config.allow_invalid_header_values,
                    add_gzip,
                };
                let fields = request_headers(req, &opts)?;
                let trailers = (!req.trailers.is_empty()).then(|| trailer_fields(req));
                let resp = conn
                    .send(
                        fields,
                        req.body.clone(),
                        trailers,
                        cancel,
                        config.timeouts.response_header,
                    )
                    .await?;
                Ok(
                    Response::new(resp.status, resp.headers, resp.body, HttpVersion::Http2)
                        .with_trailers(resp.trailers)
                        .with_tls(Some(tls)),
                )
            }
            Acquired::Http1(conn) => {
                let opts = H1Options {
                    default_user_agent: &config.user_agent,
                    allow_invalid_header_values: config.allow_invalid_header_values,
                    add_gzip,
                    target_form: TargetForm::Origin,
                    proxy_authorization: None,
                };
                let head = match h1::encode_request(req, &opts) {
                    Ok(head) => head,
                    Err(e) => {
                        // nothing was written, the connection is still clean
                        self.inner.pool.checkin(key.clone(), conn).await;
                        return Err(e);
                    }
                };
                self.exchange_h1(key, conn, &head, &req.method, cancel).await
            }
        }
    }

    /// Pick the connection for an `https://` target.
    ///
    /// The first caller dials under the target's lock and fixes the codec
    /// from the negotiated ALPN. Later dials must negotiate the same
    /// protocol.
    async fn acquire(&self, key: &PoolKey) -> Result<Acquired> {
        let slot = self.slot(key)?;
        let mut codec = slot.lock().await;

        let pooled_h1 = match &*codec {
            Some(Codec::Http2 { conn, tls }) if conn.is_usable() => {
                return Ok(Acquired::Http2 {
                    conn: conn.clone(),
                    tls: tls.clone(),
                })
            }
            Some(Codec::Http1) => true,
            _ => false,
        };

        if pooled_h1 {
            drop(codec);
            if let Some(conn) = self.inner.pool.checkout(key).await {
                return Ok(Acquired::Http1(conn));
            }
            let (stream, tls) = self.dial_tls(key).await?;
            expect_alpn(HttpVersion::Http1_1, &tls)?;
            return Ok(Acquired::Http1(self.h1_connection(stream, tls)));
        }

        // Bootstrap, or replacement of a closed HTTP/2 connection.
        let expected = codec.as_ref().map(Codec::version);
        let (stream, tls) = self.dial_tls(key).await?;
        if let Some(expected) = expected {
            expect_alpn(expected, &tls)?;
        }
        tracing::debug!(target = %key, alpn = tls.alpn_str(), "codec selected");

        match tls.http_version() {
            HttpVersion::Http2 => {
                let options = H2Options {
                    idle_timeout: self.inner.config.timeouts.idle_connection,
                    max_body_size: self.inner.config.max_response_body_size,
                };
                let conn =
                    H2Connection::handshake(stream, self.inner.config.http2.clone(), options);
                *codec = Some(Codec::Http2 {
                    conn: conn.clone(),
                    tls: tls.clone(),
                });
                Ok(Acquired::Http2 { conn, tls })
            }
            HttpVersion::Http1_1 => {
                *codec = Some(Codec::Http1);
                Ok(Acquired::Http1(self.h1_connection(stream, tls)))
            }
        }
    }

    fn h1_connection(&self, stream: SslStream<BoxedIo>, tls: TlsInfo) -> H1Connection {
        H1Connection::new(MaybeHttpsStream::Https(stream), Some(tls))
            .with_max_body_size(self.inner.config.max_response_body_size)
    }

    fn slot(&self, key: &PoolKey) -> Result<Slot> {
        let mut targets = self
            .inner
            .targets
            .lock()
            .map_err(|_| Error::closed("target map poisoned"))?;
        Ok(targets.entry(key.clone()).or_default().clone())
    }

    async fn dial_tls(&self, key: &PoolKey) -> Result<(SslStream<BoxedIo>, TlsInfo)> {
        let inner = &self.inner;
        let io = inner.dialer.connect(&key.host, key.port).await?;
        let proxied = inner.dialer.route().is_some();
        inner
            .tls
            .handshake(io, &key.host)
            .await
            .map_err(|e| match e {
                Error::TlsHandshakeFailed(reason) if proxied => Error::dial(Hop::TargetTls, reason),
                other => other,
            })
    }

    async fn exchange_h1(
        &self,
        key: &PoolKey,
        mut conn: H1Connection,
        head: &[u8],
        method: &Method,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let limit = self.inner.config.timeouts.response_header;
        let response = cancellable(cancel, async {
            let exchange = conn.round_trip(head, method);
            match limit {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .map_err(|_| Error::timeout(format!("no response within {limit:?}")))?,
                None => exchange.await,
            }
        })
        .await?;
        self.inner.pool.checkin(key.clone(), conn).await;
        Ok(response)
    }
}

fn expect_alpn(expected: HttpVersion, tls: &TlsInfo) -> Result<()> {
    let actual = tls.http_version();
    if actual == expected {
        return Ok(());
    }
    tracing::warn!(expected = expected.alpn_id(), actual = actual.alpn_id(), "ALPN changed between dials");
    Err(Error::AlpnMismatch {
        expected: expected.alpn_id().to_string(),
        actual: actual.alpn_id().to_string(),
    })
}

async fn cancellable<T>(
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Canceled),
            res = fut => res,
        },
        None => fut.await,
    }
}

/// Builder for [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct TransportBuilder {
    config: TransportConfig,
    proxy: Option<String>,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: TransportConfig) -> Self {
        Self {
            config,
            proxy: None,
        }
    }

    /// ClientHello profile for https targets and HTTPS proxies.
    pub fn profile(mut self, profile: FingerprintProfile) -> Self {
        self.config.profile = profile;
        self
    }

    /// Forward proxy URL (`http://`, `https://` or `socks5://`).
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.connect = Some(timeout);
        self
    }

    pub fn tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.tls_handshake = Some(timeout);
        self
    }

    pub fn http2_settings(mut self, settings: Http2Settings) -> Self {
        self.config.http2 = settings;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn allow_invalid_header_values(mut self, allow: bool) -> Self {
        self.config.allow_invalid_header_values = allow;
        self
    }

    pub fn transparent_compression(mut self, enabled: bool) -> Self {
        self.config.transparent_compression = enabled;
        self
    }

    /// Trust an extra root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.config.root_certs.push(cert.into());
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.config.max_idle_per_host = max;
        self
    }

    /// Largest response body buffered before the request fails.
    pub fn max_response_body_size(mut self, max: usize) -> Self {
        self.config.max_response_body_size = max;
        self
    }

    pub fn build(self) -> Result<Transport> {
        let config = match self.proxy {
            Some(proxy) => self.config.with_proxy(&proxy)?,
            None => self.config,
        };
        Transport::new(config)
    }
}
