//! Request header list for HTTP/2.
//!
//! Builds the exact field sequence a HEADERS frame will carry: pseudo-headers
//! in fixed order, then the caller's fields in their recorded order with
//! connection-specific fields removed and cookies split. Everything here is
//! pure; the HPACK state is only touched once the list has passed validation
//! and the size check.

use http::Method;

use crate::error::{Error, Result};
use crate::headers::{valid_field_name, valid_field_value};
use crate::request::Request;

use super::hpack::field_size;

/// Fields that are meaningless or forbidden on an HTTP/2 stream.
const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
    "host",
    "content-length",
];

/// Per-request inputs the transport decides on.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions<'a> {
    /// Sent when the request carries no User-Agent. Empty sends none.
    pub default_user_agent: &'a str,
    pub allow_invalid_header_values: bool,
    /// Append `accept-encoding: gzip`.
    pub add_gzip: bool,
}

/// Lowercased `(name, value)` pairs in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    fields: Vec<(String, String)>,
}

impl HeaderList {
    fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// RFC 7541 Section 4.1 size: 32 octets of overhead plus name and value.
    pub fn wire_size(&self) -> u64 {
        self.fields
            .iter()
            .map(|(n, v)| field_size(n, v) as u64)
            .sum()
    }

    /// Reject the list if the peer would refuse it.
    pub fn check_size(&self, limit: u64) -> Result<()> {
        let size = self.wire_size();
        if size > limit {
            return Err(Error::MaxHeaderListSizeExceeded { size, limit });
        }
        Ok(())
    }
}

/// Build the HEADERS field list for a request.
pub fn request_headers(req: &Request, opts: &EncodeOptions<'_>) -> Result<HeaderList> {
    let authority = req.authority()?;
    if !valid_authority(&authority) {
        return Err(Error::invalid_header("host", "invalid authority"));
    }

    let is_connect = req.is_connect();
    let path = if is_connect {
        None
    } else {
        Some(pseudo_path(req, &authority)?)
    };

    for field in &req.headers {
        validate(&field.name, &field.value, opts.allow_invalid_header_values)?;
    }
    for field in &req.trailers {
        validate(&field.name, &field.value, opts.allow_invalid_header_values)?;
    }

    let mut list = HeaderList::default();
    list.push(":authority", authority);
    list.push(":method", req.method.as_str());
    if let Some(path) = path {
        list.push(":path", path);
        list.push(":scheme", req.url.scheme());
    }
    if let Some(announce) = trailer_announcement(req) {
        list.push("trailer", announce);
    }

    let mut did_ua = false;
    for field in &req.headers {
        let name = field.name.to_ascii_lowercase();
        if CONNECTION_SPECIFIC.contains(&name.as_str()) {
            continue;
        }
        match name.as_str() {
            "user-agent" => {
                // later occurrences are dropped
                if did_ua {
                    continue;
                }
                did_ua = true;
                if field.value.is_empty() {
                    continue;
                }
                list.push(name, field.value.as_str());
            }
            "cookie" => {
                for crumb in field.value.split(';') {
                    let crumb = crumb.trim_start_matches(' ');
                    if !crumb.is_empty() {
                        list.push("cookie", crumb);
                    }
                }
            }
            "trailer" if !req.trailers.is_empty() => {}
            _ => list.push(name, field.value.as_str()),
        }
    }

    if sends_content_length(&req.method, req.body.len()) {
        list.push("content-length", req.body.len().to_string());
    }
    if opts.add_gzip {
        list.push("accept-encoding", "gzip");
    }
    if !did_ua && !opts.default_user_agent.is_empty() {
        list.push("user-agent", opts.default_user_agent);
    }
    Ok(list)
}

/// Trailer block sent after the body. Pseudo and connection fields are dropped.
pub fn trailer_fields(req: &Request) -> HeaderList {
    let mut list = HeaderList::default();
    for field in &req.trailers {
        let name = field.name.to_ascii_lowercase();
        if name.starts_with(':') || CONNECTION_SPECIFIC.contains(&name.as_str()) {
            continue;
        }
        list.push(name, field.value.as_str());
    }
    list
}

/// Body length is announced for non-empty bodies and for methods that
/// normally carry one.
pub(crate) fn sends_content_length(method: &Method, len: usize) -> bool {
    len > 0 || matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn validate(name: &str, value: &str, allow_invalid_values: bool) -> Result<()> {
    if !valid_field_name(name) {
        return Err(Error::invalid_header(name, "invalid header field name"));
    }
    if !allow_invalid_values && !valid_field_value(value) {
        return Err(Error::invalid_header(name, "invalid header field value"));
    }
    Ok(())
}

fn valid_authority(authority: &str) -> bool {
    !authority.is_empty()
        && authority
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b'/' | b'?' | b'#' | b'\\'))
}

/// `:path` must be path-absolute or `*`. An absolute URI for the same origin
/// is cut down to its path.
fn pseudo_path(req: &Request, authority: &str) -> Result<String> {
    let raw = req.request_uri();
    if valid_pseudo_path(&raw) {
        return Ok(raw);
    }
    let prefix = format!("{}://{}", req.url.scheme(), authority);
    match raw.strip_prefix(&prefix) {
        Some(rest) if valid_pseudo_path(rest) => Ok(rest.to_string()),
        _ => Err(Error::InvalidPath(raw)),
    }
}

fn valid_pseudo_path(v: &str) -> bool {
    (v.starts_with('/') && !v.starts_with("//")) || v == "*"
}

/// Comma-joined trailer names in first-seen order.
fn trailer_announcement(req: &Request) -> Option<String> {
    if req.trailers.is_empty() {
        return None;
    }
    let names: Vec<&str> = req.trailers.names();
    Some(names.join(","))
}
