//! ClientHello parsing for inspecting what a profile puts on the wire.
//!
//! Parses a single TLS handshake record holding a ClientHello and exposes the
//! fields JA3 is computed from.

use bytes::Buf;

use crate::error::{Error, Result};

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_ALPN: u16 = 0x0010;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;

/// Parsed ClientHello fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    /// `legacy_version` from the ClientHello body (0x0303 for TLS 1.2+).
    pub tls_version: u16,
    /// Cipher suite values in wire order, GREASE included.
    pub cipher_suites: Vec<u16>,
    /// Extension type codes in wire order, GREASE included.
    pub extensions: Vec<u16>,
    pub elliptic_curves: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub server_name: Option<String>,
    pub alpn_protocols: Vec<String>,
    pub supported_versions: Vec<u16>,
}

/// GREASE values (RFC 8701) have the form 0x?A?A with equal bytes.
pub fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 8) == (value & 0xff)
}

impl ClientHelloInfo {
    /// Parse a TLS record (5-byte record header included).
    pub fn parse_record(record: &[u8]) -> Result<Self> {
        let mut buf = record;
        if buf.remaining() < 5 || buf.get_u8() != 0x16 {
            return Err(Error::tls("not a TLS handshake record"));
        }
        let _record_version = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(Error::tls("truncated TLS record"));
        }
        Self::parse_handshake(&buf[..len])
    }

    /// Parse a handshake message (4-byte handshake header included).
    pub fn parse_handshake(msg: &[u8]) -> Result<Self> {
        let mut buf = msg;
        if buf.remaining() < 4 || buf.get_u8() != 0x01 {
            return Err(Error::tls("not a ClientHello"));
        }
        let body_len = read_u24(&mut buf)?;
        if buf.remaining() < body_len {
            return Err(Error::tls("truncated ClientHello"));
        }
        let mut body = &buf[..body_len];

        let mut info = ClientHelloInfo {
            tls_version: take_u16(&mut body)?,
            ..Default::default()
        };
        skip(&mut body, 32)?; // random
        let session_id_len = take_u8(&mut body)? as usize;
        skip(&mut body, session_id_len)?;

        let mut suites = take_vec16(&mut body)?;
        while suites.remaining() >= 2 {
            info.cipher_suites.push(suites.get_u16());
        }

        let compression_len = take_u8(&mut body)? as usize;
        skip(&mut body, compression_len)?;

        if body.remaining() == 0 {
            return Ok(info);
        }
        let mut extensions = take_vec16(&mut body)?;
        while extensions.remaining() >= 4 {
            let ext_type = extensions.get_u16();
            let mut data = take_vec16(&mut extensions)?;
            info.extensions.push(ext_type);
            info.parse_extension(ext_type, &mut data)?;
        }
        Ok(info)
    }

    fn parse_extension(&mut self, ext_type: u16, data: &mut &[u8]) -> Result<()> {
        match ext_type {
            EXT_SERVER_NAME => {
                let mut list = take_vec16(data)?;
                while list.remaining() >= 3 {
                    let name_type = list.get_u8();
                    let name = take_vec16(&mut list)?;
                    if name_type == 0 {
                        self.server_name = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
            }
            EXT_SUPPORTED_GROUPS => {
                let mut list = take_vec16(data)?;
                while list.remaining() >= 2 {
                    self.elliptic_curves.push(list.get_u16());
                }
            }
            EXT_EC_POINT_FORMATS => {
                let len = take_u8(data)? as usize;
                if data.remaining() < len {
                    return Err(Error::tls("truncated ec_point_formats"));
                }
                self.ec_point_formats.extend_from_slice(&data[..len]);
            }
            EXT_SIGNATURE_ALGORITHMS => {
                let mut list = take_vec16(data)?;
                while list.remaining() >= 2 {
                    self.signature_algorithms.push(list.get_u16());
                }
            }
            EXT_ALPN => {
                let mut list = take_vec16(data)?;
                while list.remaining() > 0 {
                    let len = take_u8(&mut list)? as usize;
                    if list.remaining() < len {
                        return Err(Error::tls("truncated ALPN"));
                    }
                    self.alpn_protocols
                        .push(String::from_utf8_lossy(&list[..len]).into_owned());
                    list.advance(len);
                }
            }
            EXT_SUPPORTED_VERSIONS => {
                let len = take_u8(data)? as usize;
                let mut list = &data[..len.min(data.len())];
                while list.remaining() >= 2 {
                    self.supported_versions.push(list.get_u16());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// JA3 input string: `version,ciphers,extensions,curves,point_formats`
    /// with GREASE values removed.
    pub fn ja3_string(&self) -> String {
        fn join<T: ToString + Copy>(values: &[T], keep: impl Fn(T) -> bool) -> String {
            values
                .iter()
                .copied()
                .filter(|&v| keep(v))
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("-")
        }
        format!(
            "{},{},{},{},{}",
            self.tls_version,
            join(&self.cipher_suites, |v| !is_grease(v)),
            join(&self.extensions, |v| !is_grease(v)),
            join(&self.elliptic_curves, |v| !is_grease(v)),
            join(&self.ec_point_formats, |_| true),
        )
    }

    /// Whether any GREASE value appears in suites, extensions or groups.
    pub fn has_grease(&self) -> bool {
        self.cipher_suites
            .iter()
            .chain(&self.extensions)
            .chain(&self.elliptic_curves)
            .any(|&v| is_grease(v))
    }
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(Error::tls("truncated ClientHello"));
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Error::tls("truncated ClientHello"));
    }
    Ok(buf.get_u16())
}

fn read_u24(buf: &mut &[u8]) -> Result<usize> {
    if buf.remaining() < 3 {
        return Err(Error::tls("truncated handshake header"));
    }
    let hi = buf.get_u8() as usize;
    Ok((hi << 16) | buf.get_u16() as usize)
}

fn skip(buf: &mut &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::tls("truncated ClientHello"));
    }
    buf.advance(n);
    Ok(())
}

fn take_vec16<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = take_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::tls("truncated ClientHello vector"));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}
