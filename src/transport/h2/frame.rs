//! HTTP/2 frame types and binary serialization (RFC 9113 Section 4 and 6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Frame header size (9 bytes per RFC 9113).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Default maximum frame size (16KB per RFC 9113).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Largest SETTINGS_MAX_FRAME_SIZE a peer may announce.
pub const MAX_ALLOWED_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Initial flow-control window per RFC 9113 Section 6.9.2.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// HTTP/2 connection preface (client must send this first).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame type identifiers per RFC 9113.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        match ft {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

/// Frame flags.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// SETTINGS parameter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl From<SettingsId> for u16 {
    fn from(id: SettingsId) -> Self {
        id as u16
    }
}

/// HTTP/2 error codes per RFC 9113 Section 7.
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32);
        // reserved bit is ignored on receipt
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        Self {
            length,
            frame_type: FrameType::from(buf[3]),
            flags: buf[4],
            stream_id,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.frame_type.into());
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A received frame with its payload decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        /// Payload length including padding, for flow control.
        flow_len: u32,
        end_stream: bool,
    },
    Headers {
        stream_id: u32,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        code: u32,
    },
    Settings {
        ack: bool,
        settings: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        code: u32,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Unknown,
}

impl Frame {
    /// Decode a payload. Errors here are connection errors.
    pub fn parse(header: FrameHeader, mut payload: Bytes) -> Result<Self> {
        let sid = header.stream_id;
        let require_stream = |name: &str| -> Result<()> {
            if sid == 0 {
                return Err(Error::http_protocol(format!("{name} frame on stream 0")));
            }
            Ok(())
        };

        Ok(match header.frame_type {
            FrameType::Data => {
                require_stream("DATA")?;
                let flow_len = payload.len() as u32;
                let data = strip_padding(&header, &mut payload)?;
                Frame::Data {
                    stream_id: sid,
                    data,
                    flow_len,
                    end_stream: header.has(flags::END_STREAM),
                }
            }
            FrameType::Headers => {
                require_stream("HEADERS")?;
                let mut body = strip_padding(&header, &mut payload)?;
                if header.has(flags::PRIORITY) {
                    if body.len() < 5 {
                        return Err(Error::http_protocol("HEADERS priority block truncated"));
                    }
                    body.advance(5);
                }
                Frame::Headers {
                    stream_id: sid,
                    fragment: body,
                    end_stream: header.has(flags::END_STREAM),
                    end_headers: header.has(flags::END_HEADERS),
                }
            }
            FrameType::Continuation => {
                require_stream("CONTINUATION")?;
                Frame::Continuation {
                    stream_id: sid,
                    fragment: payload,
                    end_headers: header.has(flags::END_HEADERS),
                }
            }
            FrameType::Priority => {
                require_stream("PRIORITY")?;
                Frame::Priority { stream_id: sid }
            }
            FrameType::RstStream => {
                require_stream("RST_STREAM")?;
                if payload.len() != 4 {
                    return Err(Error::http_protocol("RST_STREAM payload must be 4 bytes"));
                }
                Frame::RstStream {
                    stream_id: sid,
                    code: payload.get_u32(),
                }
            }
            FrameType::Settings => {
                if sid != 0 {
                    return Err(Error::http_protocol("SETTINGS frame on a stream"));
                }
                let ack = header.has(flags::ACK);
                if (ack && !payload.is_empty()) || payload.len() % 6 != 0 {
                    return Err(Error::http_protocol("malformed SETTINGS frame"));
                }
                let mut settings = Vec::with_capacity(payload.len() / 6);
                while payload.remaining() >= 6 {
                    settings.push((payload.get_u16(), payload.get_u32()));
                }
                Frame::Settings { ack, settings }
            }
            FrameType::PushPromise => {
                let mut body = strip_padding(&header, &mut payload)?;
                if body.len() < 4 {
                    return Err(Error::http_protocol("PUSH_PROMISE truncated"));
                }
                let promised_stream_id = body.get_u32() & 0x7fff_ffff;
                Frame::PushPromise {
                    stream_id: sid,
                    promised_stream_id,
                    fragment: body,
                    end_headers: header.has(flags::END_HEADERS),
                }
            }
            FrameType::Ping => {
                if sid != 0 || payload.len() != 8 {
                    return Err(Error::http_protocol("malformed PING frame"));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Frame::Ping {
                    ack: header.has(flags::ACK),
                    payload: data,
                }
            }
            FrameType::GoAway => {
                if sid != 0 || payload.len() < 8 {
                    return Err(Error::http_protocol("malformed GOAWAY frame"));
                }
                Frame::GoAway {
                    last_stream_id: payload.get_u32() & 0x7fff_ffff,
                    code: payload.get_u32(),
                    debug: payload,
                }
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(Error::http_protocol("WINDOW_UPDATE payload must be 4 bytes"));
                }
                Frame::WindowUpdate {
                    stream_id: sid,
                    increment: payload.get_u32() & 0x7fff_ffff,
                }
            }
            FrameType::Unknown(_) => Frame::Unknown,
        })
    }
}

fn strip_padding(header: &FrameHeader, payload: &mut Bytes) -> Result<Bytes> {
    if !header.has(flags::PADDED) {
        return Ok(std::mem::take(payload));
    }
    if payload.is_empty() {
        return Err(Error::http_protocol("padded frame without pad length"));
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(Error::http_protocol("padding exceeds frame payload"));
    }
    Ok(payload.split_to(payload.len() - pad))
}

fn put_header(out: &mut BytesMut, length: usize, frame_type: FrameType, flags: u8, stream_id: u32) {
    FrameHeader {
        length: length as u32,
        frame_type,
        flags,
        stream_id,
    }
    .encode(out);
}

/// SETTINGS with the given parameters in order.
pub fn write_settings(out: &mut BytesMut, settings: &[(u16, u32)]) {
    put_header(out, settings.len() * 6, FrameType::Settings, 0, 0);
    for &(id, value) in settings {
        out.put_u16(id);
        out.put_u32(value);
    }
}

pub fn write_settings_ack(out: &mut BytesMut) {
    put_header(out, 0, FrameType::Settings, flags::ACK, 0);
}

pub fn write_window_update(out: &mut BytesMut, stream_id: u32, increment: u32) {
    put_header(out, 4, FrameType::WindowUpdate, 0, stream_id);
    out.put_u32(increment & 0x7fff_ffff);
}

pub fn write_rst_stream(out: &mut BytesMut, stream_id: u32, code: u32) {
    put_header(out, 4, FrameType::RstStream, 0, stream_id);
    out.put_u32(code);
}

pub fn write_ping(out: &mut BytesMut, ack: bool, payload: [u8; 8]) {
    put_header(out, 8, FrameType::Ping, if ack { flags::ACK } else { 0 }, 0);
    out.put_slice(&payload);
}

pub fn write_goaway(out: &mut BytesMut, last_stream_id: u32, code: u32) {
    put_header(out, 8, FrameType::GoAway, 0, 0);
    out.put_u32(last_stream_id & 0x7fff_ffff);
    out.put_u32(code);
}

pub fn write_data(out: &mut BytesMut, stream_id: u32, data: &[u8], end_stream: bool) {
    let flags = if end_stream { flags::END_STREAM } else { 0 };
    put_header(out, data.len(), FrameType::Data, flags, stream_id);
    out.put_slice(data);
}

/// One header block as HEADERS followed by as many CONTINUATION frames as
/// `max_frame_size` requires. END_STREAM goes on the HEADERS frame only.
pub fn write_header_block(
    out: &mut BytesMut,
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
) {
    let max = max_frame_size.max(1);
    let mut chunks = block.chunks(max);
    let first = chunks.next().unwrap_or(&[]);
    let rest: Vec<&[u8]> = chunks.collect();

    let mut head_flags = if end_stream { flags::END_STREAM } else { 0 };
    if rest.is_empty() {
        head_flags |= flags::END_HEADERS;
    }
    put_header(out, first.len(), FrameType::Headers, head_flags, stream_id);
    out.put_slice(first);

    let last = rest.len().saturating_sub(1);
    for (i, chunk) in rest.iter().enumerate() {
        let f = if i == last { flags::END_HEADERS } else { 0 };
        put_header(out, chunk.len(), FrameType::Continuation, f, stream_id);
        out.put_slice(chunk);
    }
}
