//! HTTP response with explicit decompression.

use bytes::Bytes;
use std::io::Read;

use crate::error::{Error, Result};
use crate::headers::OrderedHeaders;
use crate::transport::connector::TlsInfo;
use crate::version::HttpVersion;

/// Fully buffered response.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// Response headers in wire order.
    pub headers: OrderedHeaders,
    /// Trailer fields, empty when none were sent.
    pub trailers: OrderedHeaders,
    body: Bytes,
    version: HttpVersion,
    tls: Option<TlsInfo>,
}

impl Response {
    pub fn new(status: u16, headers: OrderedHeaders, body: Bytes, version: HttpVersion) -> Self {
        Self {
            status,
            headers,
            trailers: OrderedHeaders::new(),
            body,
            version,
            tls: None,
        }
    }

    pub fn with_trailers(mut self, trailers: OrderedHeaders) -> Self {
        self.trailers = trailers;
        self
    }

    pub fn with_tls(mut self, tls: Option<TlsInfo>) -> Self {
        self.tls = tls;
        self
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Handshake summary of the connection this response arrived on.
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn get_headers(&self, name: &str) -> Vec<&str> {
        self.headers.get_all(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("content-type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.get_header("content-encoding")
    }

    /// Body with its `Content-Encoding` removed. Supports gzip, deflate, br
    /// and zstd; anything else is returned as is.
    pub fn decoded_body(&self) -> Result<Bytes> {
        let Some(encoding) = self.content_encoding() else {
            return Ok(self.body.clone());
        };
        let data = &self.body[..];
        match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => read_all("gzip", flate2::read::GzDecoder::new(data)),
            // zlib-wrapped first, then raw deflate
            "deflate" => read_all("deflate", flate2::read::ZlibDecoder::new(data))
                .or_else(|_| read_all("deflate", flate2::read::DeflateDecoder::new(data))),
            "br" => read_all("brotli", brotli::Decompressor::new(data, 4096)),
            "zstd" => zstd::stream::decode_all(data)
                .map(Bytes::from)
                .map_err(|e| Error::Decompression(format!("zstd: {e}"))),
            _ => Ok(self.body.clone()),
        }
    }

    /// Replace a gzip body with its decoded form and drop the encoding headers.
    /// Used when the transport itself asked for gzip.
    pub(crate) fn decode_transparent_gzip(mut self) -> Result<Self> {
        let is_gzip = self
            .content_encoding()
            .is_some_and(|e| e.trim().eq_ignore_ascii_case("gzip"));
        if is_gzip && !self.body.is_empty() {
            self.body = read_all("gzip", flate2::read::GzDecoder::new(&self.body[..]))?;
            self.headers.remove("content-encoding");
            self.headers.remove("content-length");
        }
        Ok(self)
    }

    pub fn text(&self) -> Result<String> {
        let decoded = self.decoded_body()?;
        String::from_utf8(decoded.to_vec())
            .map_err(|e| Error::Decompression(format!("body is not UTF-8: {e}")))
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let text = self.text()?;
        serde_json::from_str(&text).map_err(Error::from)
    }
}

fn read_all(codec: &str, mut reader: impl Read) -> Result<Bytes> {
    let mut decoded = Vec::new();
    reader
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("{codec}: {e}")))?;
    Ok(Bytes::from(decoded))
}
