//! HTTP/1.1 request writer and response reader.
//!
//! The request head is written byte for byte from the caller's ordered
//! headers; only the transport-managed fields are placed by the writer.
//! Responses are parsed with httparse.

use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Position;

use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::error::{Error, Result};
use crate::headers::{breaks_framing, valid_field_name, valid_field_value, OrderedHeaders};
use crate::request::{punycode_host_port, Request};
use crate::response::Response;
use crate::transport::connector::{MaybeHttpsStream, TlsInfo};
use crate::transport::h2::encode::sends_content_length;
use crate::version::HttpVersion;

/// Maximum response head size (64KB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of response header fields.
const MAX_HEADERS_COUNT: usize = 128;

/// Fields the writer places itself; caller copies are dropped or replaced.
const TRANSPORT_MANAGED: &[&str] = &["content-length", "transfer-encoding", "trailer"];

/// Request-target form for the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetForm {
    /// `/path?query`
    Origin,
    /// `http://host/path?query`, used towards a plain-HTTP forward proxy.
    Absolute,
}

/// Per-request choices the transport makes for the writer.
#[derive(Debug, Clone, Copy)]
pub struct H1Options<'a> {
    pub default_user_agent: &'a str,
    pub allow_invalid_header_values: bool,
    /// Append `Accept-Encoding: gzip`.
    pub add_gzip: bool,
    pub target_form: TargetForm,
    /// Complete `Proxy-Authorization` value, appended last.
    pub proxy_authorization: Option<&'a str>,
}

fn push_field(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn validate(name: &str, value: &str, allow_invalid_values: bool) -> Result<()> {
    if !valid_field_name(name) {
        return Err(Error::invalid_header(name, "invalid header field name"));
    }
    if breaks_framing(value) {
        return Err(Error::invalid_header(name, "header value contains CR, LF or NUL"));
    }
    if !allow_invalid_values && !valid_field_value(value) {
        return Err(Error::invalid_header(name, "invalid header field value"));
    }
    Ok(())
}

/// Serialize the request head, plus the chunked body when trailers are set.
///
/// Field order on the wire:
/// 1. `Host` from the URL, unless the caller listed `Host` (then it stays at
///    the caller's position)
/// 2. the default `User-Agent`, when the caller listed none
/// 3. caller fields in order, with `Content-Length` recomputed in place and
///    `Transfer-Encoding` / `Trailer` dropped
/// 4. `Content-Length` or `Transfer-Encoding: chunked` + `Trailer`
/// 5. `Accept-Encoding: gzip`, then `Proxy-Authorization`
pub fn encode_request(req: &Request, opts: &H1Options<'_>) -> Result<Vec<u8>> {
    for field in req.headers.iter().chain(req.trailers.iter()) {
        validate(&field.name, &field.value, opts.allow_invalid_header_values)?;
    }

    let target = request_target(req, opts.target_form)?;
    if target.is_empty() || target.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(Error::InvalidPath(target));
    }

    let chunked = !req.trailers.is_empty();
    let send_length = !chunked && sends_content_length(&req.method, req.body.len());
    let mut out = Vec::with_capacity(512 + req.body.len());

    out.extend_from_slice(req.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let caller_host = req.headers.iter().any(|f| f.is("host") && !f.value.is_empty());
    if !caller_host {
        push_field(&mut out, "Host", &req.url_authority()?);
    }
    let caller_ua = req.headers.contains("user-agent");
    if !caller_ua && !opts.default_user_agent.is_empty() {
        push_field(&mut out, "User-Agent", opts.default_user_agent);
    }

    let mut did_host = false;
    let mut did_ua = false;
    let mut did_length = false;
    for field in &req.headers {
        let lower = field.name.to_ascii_lowercase();
        match lower.as_str() {
            "host" => {
                if did_host || field.value.is_empty() {
                    continue;
                }
                did_host = true;
                push_field(&mut out, &field.name, &punycode_host_port(&field.value));
            }
            "user-agent" => {
                if did_ua {
                    continue;
                }
                did_ua = true;
                if !field.value.is_empty() {
                    push_field(&mut out, &field.name, &field.value);
                }
            }
            "content-length" => {
                if send_length && !did_length {
                    did_length = true;
                    push_field(&mut out, &field.name, &req.body.len().to_string());
                }
            }
            name if TRANSPORT_MANAGED.contains(&name) => {}
            _ => push_field(&mut out, &field.name, &field.value),
        }
    }

    if send_length && !did_length {
        push_field(&mut out, "Content-Length", &req.body.len().to_string());
    }
    if chunked {
        push_field(&mut out, "Transfer-Encoding", "chunked");
        let names: Vec<&str> = req.trailers.iter().map(|f| f.name.as_str()).collect();
        push_field(&mut out, "Trailer", &names.join(", "));
    }
    if opts.add_gzip {
        push_field(&mut out, "Accept-Encoding", "gzip");
    }
    if let Some(auth) = opts.proxy_authorization {
        push_field(&mut out, "Proxy-Authorization", auth);
    }
    out.extend_from_slice(b"\r\n");

    if chunked {
        if !req.body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", req.body.len()).as_bytes());
            out.extend_from_slice(&req.body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n");
        for field in &req.trailers {
            push_field(&mut out, &field.name, &field.value);
        }
        out.extend_from_slice(b"\r\n");
    } else {
        out.extend_from_slice(&req.body);
    }
    Ok(out)
}

fn request_target(req: &Request, form: TargetForm) -> Result<String> {
    if req.is_connect() {
        return Ok(format!("{}:{}", req.host()?, req.port()?));
    }
    if let Some(target) = &req.target {
        return Ok(target.clone());
    }
    Ok(match form {
        TargetForm::Origin => req.request_uri(),
        TargetForm::Absolute => req.url[..Position::AfterQuery].to_string(),
    })
}

/// One HTTP/1.1 connection. Requests run strictly one after another.
#[derive(Debug)]
pub struct H1Connection {
    stream: MaybeHttpsStream,
    buf: BytesMut,
    reusable: bool,
    /// Peer closed its side while we read a close-delimited body.
    saw_eof: bool,
    tls: Option<TlsInfo>,
    max_body: usize,
}

impl H1Connection {
    pub fn new(stream: MaybeHttpsStream, tls: Option<TlsInfo>) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(8192),
            reusable: true,
            saw_eof: false,
            tls,
            max_body: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Cap on the buffered response body; larger bodies fail the request.
    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body = max;
        self
    }

    fn body_too_large(&self) -> Error {
        Error::http_protocol(format!("response body exceeds {} bytes", self.max_body))
    }

    /// Whether another request may follow on this connection.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    /// Write an encoded request and read its response.
    pub async fn round_trip(&mut self, request: &[u8], method: &Method) -> Result<Response> {
        // an error part way leaves the connection in an unknown state
        self.reusable = false;
        self.stream.write_all(request).await.map_err(Error::write)?;
        self.stream.flush().await.map_err(Error::write)?;
        let response = self.read_response(method).await?;
        if !self.buf.is_empty() {
            tracing::debug!(extra = self.buf.len(), "unexpected bytes after response");
            self.reusable = false;
        }
        Ok(response.with_tls(self.tls.clone()))
    }

    async fn fill(&mut self) -> Result<usize> {
        self.stream.read_buf(&mut self.buf).await.map_err(Error::read)
    }

    async fn read_response(&mut self, method: &Method) -> Result<Response> {
        loop {
            let head = loop {
                if let Some(head) = parse_head(&self.buf)? {
                    break head;
                }
                if self.buf.len() >= MAX_HEAD_SIZE {
                    return Err(Error::http_protocol("response head too large"));
                }
                if self.fill().await? == 0 {
                    return Err(Error::closed("connection closed before response head"));
                }
            };
            self.buf.advance(head.len);

            // 101 is not expected on this path; treat every 1xx as interim
            if (100..200).contains(&head.status) {
                tracing::trace!(status = head.status, "informational response skipped");
                continue;
            }

            let keep_alive = head.keep_alive();
            let (body, trailers) = self.read_body(&head, method).await?;
            self.reusable = keep_alive && !self.saw_eof;
            return Ok(Response::new(head.status, head.headers, body, HttpVersion::Http1_1)
                .with_trailers(trailers));
        }
    }

    async fn read_body(&mut self, head: &Head, method: &Method) -> Result<(Bytes, OrderedHeaders)> {
        if *method == Method::HEAD || matches!(head.status, 204 | 304) {
            return Ok((Bytes::new(), OrderedHeaders::new()));
        }
        if let Some(te) = head.headers.get("transfer-encoding") {
            let chunked = te
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
            if chunked {
                return self.read_chunked().await;
            }
            return Ok((self.read_to_close().await?, OrderedHeaders::new()));
        }
        match content_length(&head.headers)? {
            Some(len) => Ok((self.read_exact_body(len).await?, OrderedHeaders::new())),
            None => Ok((self.read_to_close().await?, OrderedHeaders::new())),
        }
    }

    async fn read_exact_body(&mut self, len: usize) -> Result<Bytes> {
        if len > self.max_body {
            return Err(self.body_too_large());
        }
        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(Error::read(format!(
                    "connection closed after {} of {len} body bytes",
                    self.buf.len()
                )));
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_to_close(&mut self) -> Result<Bytes> {
        while self.fill().await? > 0 {
            if self.buf.len() > self.max_body {
                return Err(self.body_too_large());
            }
        }
        self.saw_eof = true;
        Ok(self.buf.split().freeze())
    }

    async fn read_line(&mut self) -> Result<BytesMut> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let mut line = self.buf.split_to(pos + 2);
                line.truncate(pos);
                return Ok(line);
            }
            if self.buf.len() >= MAX_HEAD_SIZE {
                return Err(Error::http_protocol("chunk line too long"));
            }
            if self.fill().await? == 0 {
                return Err(Error::read("connection closed inside chunked body"));
            }
        }
    }

    async fn read_chunked(&mut self) -> Result<(Bytes, OrderedHeaders)> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let size = std::str::from_utf8(&line)
                .ok()
                .and_then(|l| l.split(';').next())
                .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
                .ok_or_else(|| Error::http_protocol("invalid chunk size line"))?;
            if size == 0 {
                break;
            }
            if body.len().saturating_add(size) > self.max_body {
                return Err(self.body_too_large());
            }
            let framed = size
                .checked_add(2)
                .ok_or_else(|| Error::http_protocol("chunk size out of range"))?;
            let chunk = self.read_exact_body(framed).await?;
            if &chunk[size..] != b"\r\n" {
                return Err(Error::http_protocol("chunk not terminated by CRLF"));
            }
            body.extend_from_slice(&chunk[..size]);
        }

        let mut trailers = OrderedHeaders::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            let line = String::from_utf8_lossy(&line);
            if let Some((name, value)) = line.split_once(':') {
                trailers.add(name.trim(), value.trim());
            }
        }
        Ok((body.freeze(), trailers))
    }
}

/// Parsed response head.
struct Head {
    len: usize,
    status: u16,
    minor_version: u8,
    headers: OrderedHeaders,
}

impl Head {
    fn keep_alive(&self) -> bool {
        let connection = self.headers.get_all("connection");
        let has = |token: &str| {
            connection
                .iter()
                .flat_map(|v| v.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };
        if self.minor_version == 0 {
            has("keep-alive")
        } else {
            !has("close")
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>> {
    let mut fields = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut fields);
    let len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Error::http_protocol(format!("malformed response head: {e}"))),
    };
    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("missing status code"))?;
    let mut headers = OrderedHeaders::new();
    for field in response.headers.iter() {
        headers.add(field.name, String::from_utf8_lossy(field.value));
    }
    Ok(Some(Head {
        len,
        status,
        minor_version: response.version.unwrap_or(1),
        headers,
    }))
}

/// Content-Length, rejecting conflicting duplicates.
fn content_length(headers: &OrderedHeaders) -> Result<Option<usize>> {
    let mut found: Option<usize> = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let n = part
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::http_protocol(format!("invalid Content-Length {value:?}")))?;
            match found {
                Some(prev) if prev != n => {
                    return Err(Error::http_protocol("conflicting Content-Length values"));
                }
                _ => found = Some(n),
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const OPTS: H1Options<'static> = H1Options {
        default_user_agent: "mimic-test",
        allow_invalid_header_values: false,
        add_gzip: false,
        target_form: TargetForm::Origin,
        proxy_authorization: None,
    };

    fn head_lines(bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(bytes);
        let head = text.split("\r\n\r\n").next().unwrap_or_default().to_string();
        head.split("\r\n").map(str::to_string).collect()
    }

    #[test]
    fn test_caller_order_and_duplicates() {
        let req = Request::get("http://example.com/p?q=1")
            .unwrap()
            .header("X-Zulu", "1")
            .header("accept", "*/*")
            .header("X-Zulu", "2")
            .header("X-Alpha", "3");
        let lines = head_lines(&encode_request(&req, &OPTS).unwrap());
        assert_eq!(
            lines,
            [
                "GET /p?q=1 HTTP/1.1",
                "Host: example.com",
                "User-Agent: mimic-test",
                "X-Zulu: 1",
                "accept: */*",
                "X-Zulu: 2",
                "X-Alpha: 3",
            ]
        );
    }

    #[test]
    fn test_caller_host_and_ua_keep_position() {
        let req = Request::get("http://10.0.0.1:8080/")
            .unwrap()
            .header("Accept", "*/*")
            .header("Host", "bücher.example")
            .header("User-Agent", "custom");
        let lines = head_lines(&encode_request(&req, &OPTS).unwrap());
        assert_eq!(
            lines[1..],
            ["Accept: */*", "Host: xn--bcher-kva.example", "User-Agent: custom"]
        );
    }

    #[test]
    fn test_empty_user_agent_suppresses_header() {
        let req = Request::get("http://example.com/").unwrap().header("User-Agent", "");
        let lines = head_lines(&encode_request(&req, &OPTS).unwrap());
        assert!(!lines.iter().any(|l| l.to_ascii_lowercase().starts_with("user-agent")));
    }

    #[test]
    fn test_content_length_recomputed_in_place() {
        let req = Request::post("http://example.com/", "hello")
            .unwrap()
            .header("X-A", "1")
            .header("Content-Length", "999")
            .header("Transfer-Encoding", "gzip")
            .header("X-B", "2");
        let bytes = encode_request(&req, &OPTS).unwrap();
        let lines = head_lines(&bytes);
        assert_eq!(lines[3..], ["X-A: 1", "Content-Length: 5", "X-B: 2"]);
        assert!(bytes.ends_with(b"\r\n\r\nhello"));
    }

    #[test]
    fn test_empty_post_sends_zero_length() {
        let req = Request::new(Method::POST, "http://example.com/").unwrap();
        let lines = head_lines(&encode_request(&req, &OPTS).unwrap());
        assert!(lines.contains(&"Content-Length: 0".to_string()));
        let get = Request::get("http://example.com/").unwrap();
        let lines = head_lines(&encode_request(&get, &OPTS).unwrap());
        assert!(!lines.iter().any(|l| l.starts_with("Content-Length")));
    }

    #[test]
    fn test_trailers_use_chunked_encoding() {
        let req = Request::post("http://example.com/", "abc")
            .unwrap()
            .trailer("X-Sum", "42");
        let bytes = encode_request(&req, &OPTS).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\nTrailer: X-Sum\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n3\r\nabc\r\n0\r\nX-Sum: 42\r\n\r\n"));
    }

    #[test]
    fn test_absolute_form_with_proxy_auth_and_gzip() {
        let req = Request::get("http://example.com/a?b#frag").unwrap();
        let opts = H1Options {
            target_form: TargetForm::Absolute,
            add_gzip: true,
            proxy_authorization: Some("Basic dTpw"),
            ..OPTS
        };
        let lines = head_lines(&encode_request(&req, &opts).unwrap());
        assert_eq!(lines[0], "GET http://example.com/a?b HTTP/1.1");
        assert_eq!(
            lines[lines.len() - 2..],
            ["Accept-Encoding: gzip", "Proxy-Authorization: Basic dTpw"]
        );
    }

    #[test]
    fn test_value_bypass_still_rejects_line_breaks() {
        let odd = Request::get("http://example.com/").unwrap().header("X-Odd", "a\u{1}b");
        assert!(encode_request(&odd, &OPTS).is_err());
        let bypass = H1Options {
            allow_invalid_header_values: true,
            ..OPTS
        };
        assert!(encode_request(&odd, &bypass).is_ok());

        let split = Request::get("http://example.com/").unwrap().header("X-Split", "a\r\nb: c");
        let err = encode_request(&split, &bypass).unwrap_err();
        assert_eq!(err.header_name(), Some("X-Split"));
    }

    async fn respond(raw: &'static [u8], method: Method) -> (Result<Response>, bool) {
        respond_limited(raw, method, DEFAULT_MAX_BODY_SIZE).await
    }

    async fn respond_limited(
        raw: &'static [u8],
        method: Method,
        max_body: usize,
    ) -> (Result<Response>, bool) {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut sink = [0u8; 1024];
            let _ = server.read(&mut sink).await;
            let _ = server.write_all(raw).await;
        });
        let mut conn = H1Connection::new(MaybeHttpsStream::Http(Box::new(client)), None)
            .with_max_body_size(max_body);
        let resp = conn.round_trip(b"GET / HTTP/1.1\r\n\r\n", &method).await;
        (resp, conn.is_reusable())
    }

    #[tokio::test]
    async fn test_chunk_size_overflow_is_a_protocol_error() {
        let (resp, reusable) = respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab\r\n",
            Method::GET,
        )
        .await;
        assert!(matches!(resp, Err(Error::HttpProtocol(_))), "got {resp:?}");
        assert!(!reusable);
    }

    #[tokio::test]
    async fn test_oversized_bodies_are_refused() {
        let (resp, _) = respond_limited(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2147483647\r\n\r\nabc",
            Method::GET,
            1024,
        )
        .await;
        assert!(matches!(resp, Err(Error::HttpProtocol(_))), "got {resp:?}");

        let (resp, _) = respond_limited(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n7fffffff\r\nabc",
            Method::GET,
            1024,
        )
        .await;
        assert!(matches!(resp, Err(Error::HttpProtocol(_))), "got {resp:?}");

        let (resp, _) = respond_limited(
            b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n0123456789",
            Method::GET,
            4,
        )
        .await;
        assert!(matches!(resp, Err(Error::HttpProtocol(_))), "got {resp:?}");

        let (resp, _) = respond_limited(
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nfits",
            Method::GET,
            4,
        )
        .await;
        assert_eq!(resp.unwrap().body().as_ref(), b"fits");
    }

    #[tokio::test]
    async fn test_interim_responses_skipped() {
        let (resp, reusable) = respond(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
            Method::GET,
        )
        .await;
        let resp = resp.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body().as_ref(), b"ok");
        assert!(reusable);
    }

    #[tokio::test]
    async fn test_chunked_response_with_trailers() {
        let (resp, _) = respond(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5;x=y\r\npedia\r\n0\r\nX-Check: 1\r\n\r\n",
            Method::GET,
        )
        .await;
        let resp = resp.unwrap();
        assert_eq!(resp.body().as_ref(), b"wikipedia");
        assert_eq!(resp.trailers.get("x-check"), Some("1"));
    }

    #[tokio::test]
    async fn test_connection_close_and_head() {
        let (resp, reusable) = respond(
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 10\r\n\r\n",
            Method::HEAD,
        )
        .await;
        assert!(resp.unwrap().body().is_empty());
        assert!(!reusable);
    }

    #[tokio::test]
    async fn test_close_delimited_body() {
        let (resp, reusable) = respond(b"HTTP/1.1 200 OK\r\n\r\nuntil close", Method::GET).await;
        assert_eq!(resp.unwrap().body().as_ref(), b"until close");
        assert!(!reusable);
    }
}
