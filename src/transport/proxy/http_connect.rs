//! HTTP CONNECT tunnel negotiation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Hop, Result};

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

fn fail(reason: impl std::fmt::Display) -> Error {
    Error::dial(Hop::ProxyConnect, format!("CONNECT: {reason}"))
}

fn connect_head(authority: &str, proxy_authorization: Option<&str>) -> Vec<u8> {
    let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = proxy_authorization {
        head.push_str("Proxy-Authorization: ");
        head.push_str(auth);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

/// Ask the proxy on `stream` to open a tunnel to `authority` (`host:port`).
///
/// The response head is read one byte at a time so nothing sent through the
/// tunnel afterwards is consumed here.
pub async fn handshake<S>(
    stream: &mut S,
    authority: &str,
    proxy_authorization: Option<&str>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&connect_head(authority, proxy_authorization))
        .await
        .map_err(fail)?;
    stream.flush().await.map_err(fail)?;

    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(fail("response head too large"));
        }
        let n = stream.read(&mut byte).await.map_err(fail)?;
        if n == 0 {
            return Err(fail("proxy closed the connection before responding"));
        }
        head.push(byte[0]);
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(fail("incomplete response head")),
        Err(e) => return Err(fail(format!("malformed response: {e}"))),
    }

    let code = response.code.unwrap_or_default();
    tracing::debug!(authority, status = code, "CONNECT response");
    match code {
        200..=299 => Ok(()),
        407 => Err(fail("407 proxy authentication required")),
        _ => Err(fail(format!(
            "proxy refused tunnel: {code} {}",
            response.reason.unwrap_or_default()
        ))),
    }
}
