//! Outbound request representation.

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::headers::OrderedHeaders;

/// Request handed to [`Transport::send`](crate::Transport::send).
///
/// `headers` is the ordered view; [`Request::header_map`] is its
/// name-indexed projection. A `Host` field overrides the URL authority.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: OrderedHeaders,
    pub body: Bytes,
    /// Trailer fields sent after the body. Their names are announced up front.
    pub trailers: OrderedHeaders,
    /// Raw request-target sent instead of the URL's path and query
    /// (for example `*` with OPTIONS).
    pub target: Option<String>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: OrderedHeaders::new(),
            body: Bytes::new(),
            trailers: OrderedHeaders::new(),
            target: None,
        })
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(Method::POST, url)?.body(body))
    }

    /// Append a header after the existing ones.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn headers(mut self, headers: OrderedHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn trailer(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.trailers.add(name, value);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Name-indexed projection of the ordered headers.
    pub fn header_map(&self) -> http::HeaderMap {
        self.headers.to_header_map()
    }

    /// Host (IDNA/Punycode-normalized by the URL parser).
    pub fn host(&self) -> Result<&str> {
        self.url
            .host_str()
            .ok_or_else(|| Error::http_protocol(format!("URL has no host: {}", self.url)))
    }

    /// Port, falling back to the scheme default.
    pub fn port(&self) -> Result<u16> {
        self.url
            .port_or_known_default()
            .ok_or_else(|| Error::UnsupportedScheme(self.url.scheme().to_string()))
    }

    /// `host:port` authority from the URL, port omitted when default.
    pub fn url_authority(&self) -> Result<String> {
        let host = self.host()?;
        Ok(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Value for `Host` / `:authority`: caller override, else the URL authority.
    pub fn authority(&self) -> Result<String> {
        match self.headers.get("host") {
            Some(host) if !host.is_empty() => Ok(punycode_host_port(host)),
            _ => self.url_authority(),
        }
    }

    /// Origin-form target: path plus query, or the raw override.
    pub fn request_uri(&self) -> String {
        if let Some(target) = &self.target {
            return target.clone();
        }
        let mut target = self.url.path().to_string();
        if let Some(q) = self.url.query() {
            target.push('?');
            target.push_str(q);
        }
        target
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }
}

/// Normalize an internationalized `host[:port]` to ASCII.
pub(crate) fn punycode_host_port(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    match Url::parse(&format!("http://{value}/")) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => value.to_string(),
        },
        Err(_) => value.to_string(),
    }
}
