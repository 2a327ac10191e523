//! SOCKS5 client handshake (RFC 1928, username/password per RFC 1929).

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Hop, Result};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const AUTH_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

fn fail(reason: impl std::fmt::Display) -> Error {
    Error::dial(Hop::ProxyConnect, format!("socks5: {reason}"))
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Encode the CONNECT request for `host:port`.
///
/// IP literals use their own address type; anything else is sent as a
/// domain name so the proxy resolves it.
fn connect_request(host: &str, port: u16) -> Result<Vec<u8>> {
    let mut req = vec![VERSION, CMD_CONNECT, 0x00];
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len())
                .map_err(|_| fail(format!("host name too long ({} bytes)", host.len())))?;
            req.push(ATYP_DOMAIN);
            req.push(len);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

/// Negotiate a CONNECT tunnel to `host:port` over an established stream
/// to the SOCKS5 server.
pub async fn handshake<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = match credentials {
        Some(_) => &[VERSION, 2, METHOD_NO_AUTH, METHOD_USERNAME_PASSWORD],
        None => &[VERSION, 1, METHOD_NO_AUTH],
    };
    stream.write_all(greeting).await.map_err(fail)?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(fail)?;
    if choice[0] != VERSION {
        return Err(fail(format!("unexpected version {:#04x}", choice[0])));
    }
    tracing::trace!(method = choice[1], "socks5 method selected");

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USERNAME_PASSWORD, Some((user, pass))) => {
            let ulen = u8::try_from(user.len()).map_err(|_| fail("username too long"))?;
            let plen = u8::try_from(pass.len()).map_err(|_| fail("password too long"))?;
            let mut auth = Vec::with_capacity(3 + user.len() + pass.len());
            auth.push(AUTH_VERSION);
            auth.push(ulen);
            auth.extend_from_slice(user.as_bytes());
            auth.push(plen);
            auth.extend_from_slice(pass.as_bytes());
            stream.write_all(&auth).await.map_err(fail)?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await.map_err(fail)?;
            if status[1] != 0x00 {
                return Err(fail("username/password authentication rejected"));
            }
        }
        (METHOD_NONE_ACCEPTABLE, _) => return Err(fail("no acceptable authentication method")),
        (other, _) => return Err(fail(format!("unsolicited authentication method {other:#04x}"))),
    }

    stream
        .write_all(&connect_request(host, port)?)
        .await
        .map_err(fail)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(fail)?;
    if head[0] != VERSION {
        return Err(fail(format!("unexpected reply version {:#04x}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(fail(format!(
            "CONNECT rejected: {} ({:#04x})",
            reply_message(head[1]),
            head[1]
        )));
    }

    // Bound address, discarded.
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(fail)?;
            usize::from(len[0])
        }
        other => return Err(fail(format!("unknown bound address type {other:#04x}"))),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await.map_err(fail)?;

    tracing::debug!(host, port, "socks5 tunnel established");
    Ok(())
}
