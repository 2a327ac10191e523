//! HTTP/2 connection driver: the background task that owns the socket.
//!
//! Every write to the connection happens here, one command or frame at a
//! time, so a header block is always HPACK-encoded and written as one
//! contiguous HEADERS + CONTINUATION run in the order requests arrived.
//! Handles talk to the driver over an unbounded command channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::headers::OrderedHeaders;

use super::connection::{FlowSnapshot, H2Options, Shared, StreamResponse};
use super::encode::HeaderList;
use super::frame::{self, error_code, Frame, FrameHeader, FrameType, SettingsId};
use super::hpack::{Decoder, Encoder, DEFAULT_TABLE_SIZE};

const MAX_STREAM_ID: u32 = (1 << 31) - 1;
const MAX_WINDOW: i64 = (1 << 31) - 1;

/// Command sent from a handle to the driver.
pub(super) enum Command {
    Send {
        key: u64,
        fields: HeaderList,
        body: Bytes,
        trailers: Option<HeaderList>,
        tx: oneshot::Sender<Result<StreamResponse>>,
    },
    /// The caller stopped waiting for `key`.
    Cancel { key: u64 },
    Snapshot { tx: oneshot::Sender<FlowSnapshot> },
}

struct PendingSend {
    key: u64,
    fields: HeaderList,
    body: Bytes,
    trailers: Option<HeaderList>,
    tx: oneshot::Sender<Result<StreamResponse>>,
}

/// Where an open client stream is in its lifecycle. Idle streams never
/// enter the table and closed ones leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Request body or trailers still to send.
    Open,
    /// END_STREAM sent, waiting on the response.
    HalfClosedLocal,
}

struct Stream {
    key: u64,
    state: StreamState,
    tx: Option<oneshot::Sender<Result<StreamResponse>>>,
    send_window: i64,
    recv_window: i64,
    /// Bytes received on this stream not yet returned to the connection window.
    unacked: u32,
    pending_body: Bytes,
    trailers: Option<HeaderList>,
    status: Option<u16>,
    headers: OrderedHeaders,
    trailers_in: OrderedHeaders,
    body: BytesMut,
}

/// Values the peer announced, with pre-SETTINGS defaults.
#[derive(Debug, Clone, Copy)]
struct PeerSettings {
    max_frame_size: u32,
    max_concurrent_streams: u32,
    initial_window_size: u32,
    max_header_list_size: u64,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: 1000,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_header_list_size: u64::MAX,
        }
    }
}

/// Header block being reassembled from CONTINUATION frames.
enum PendingBlock {
    Response {
        stream_id: u32,
        end_stream: bool,
        block: BytesMut,
    },
    Push {
        stream_id: u32,
        promised_stream_id: u32,
        block: BytesMut,
    },
}

impl PendingBlock {
    fn stream_id(&self) -> u32 {
        match self {
            Self::Response { stream_id, .. } | Self::Push { stream_id, .. } => *stream_id,
        }
    }

    fn block_mut(&mut self) -> &mut BytesMut {
        match self {
            Self::Response { block, .. } | Self::Push { block, .. } => block,
        }
    }
}

pub(super) struct H2Driver<S> {
    io: S,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    encoder: Encoder,
    decoder: Decoder,
    local: Http2Settings,
    peer: PeerSettings,
    peer_settings_seen: bool,
    streams: HashMap<u32, Stream>,
    opened: HashMap<u64, u32>,
    queue: VecDeque<PendingSend>,
    next_stream_id: u32,
    conn_send_window: i64,
    conn_recv_target: i64,
    conn_unacked: i64,
    goaway: Option<(u32, u32)>,
    pending_block: Option<PendingBlock>,
    read_buf: BytesMut,
    out: BytesMut,
    block_buf: Vec<u8>,
    idle_timeout: Option<Duration>,
    max_body: usize,
    last_active: Instant,
}

impl<S> H2Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// `out` already holds the client preface.
    pub(super) fn new(
        io: S,
        commands: mpsc::UnboundedReceiver<Command>,
        shared: Arc<Shared>,
        local: Http2Settings,
        out: BytesMut,
        options: H2Options,
    ) -> Self {
        let conn_recv_target =
            frame::DEFAULT_INITIAL_WINDOW_SIZE as i64 + local.connection_window_increment as i64;
        Self {
            io,
            commands,
            shared,
            encoder: Encoder::new(),
            decoder: Decoder::new(local.decoder_table_size()),
            local,
            peer: PeerSettings::default(),
            peer_settings_seen: false,
            streams: HashMap::new(),
            opened: HashMap::new(),
            queue: VecDeque::new(),
            next_stream_id: 1,
            conn_send_window: frame::DEFAULT_INITIAL_WINDOW_SIZE as i64,
            conn_recv_target,
            conn_unacked: 0,
            goaway: None,
            pending_block: None,
            read_buf: BytesMut::with_capacity(16384),
            out,
            block_buf: Vec::with_capacity(1024),
            idle_timeout: options.idle_timeout,
            max_body: options.max_body_size,
            last_active: Instant::now(),
        }
    }

    /// Run until the connection breaks, the peer goes away, or it idles out.
    pub(super) async fn drive(mut self) {
        let cause = loop {
            if let Err(e) = self.flush().await {
                break e;
            }
            if self.goaway.is_some() && self.streams.is_empty() {
                let (last_stream_id, code) = self.goaway.unwrap_or_default();
                break Error::GoAway {
                    last_stream_id,
                    code,
                };
            }

            let idle_deadline = self.idle_deadline();
            tokio::select! {
                // requests wait until the peer's SETTINGS are known
                cmd = self.commands.recv(), if self.peer_settings_seen => match cmd {
                    Some(cmd) => {
                        self.last_active = Instant::now();
                        self.handle_command(cmd);
                    }
                    None => break Error::closed("all handles dropped"),
                },
                read = self.io.read_buf(&mut self.read_buf) => match read {
                    Ok(0) => break self.eof_cause(),
                    Ok(_) => {
                        self.last_active = Instant::now();
                        if let Err(e) = self.process_frames() {
                            self.abort(&e);
                            break e;
                        }
                    }
                    Err(e) => break Error::read(e),
                },
                _ = sleep_until(idle_deadline), if idle_deadline.is_some() => {
                    tracing::debug!("idle HTTP/2 connection closing");
                    self.shared.accepting.store(false, Ordering::Release);
                    frame::write_goaway(&mut self.out, 0, error_code::NO_ERROR);
                    let _ = self.flush().await;
                    break Error::closed("idle timeout");
                }
            }
        };
        self.shutdown(cause);
    }

    fn idle_deadline(&self) -> Option<Instant> {
        let idle = self.idle_timeout?;
        if !self.streams.is_empty() || !self.queue.is_empty() {
            return None;
        }
        Some(self.last_active + idle)
    }

    async fn flush(&mut self) -> Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let buf = self.out.split();
        self.io.write_all(&buf).await.map_err(Error::write)?;
        self.io.flush().await.map_err(Error::write)
    }

    fn eof_cause(&self) -> Error {
        match self.goaway {
            Some((last_stream_id, code)) => Error::GoAway {
                last_stream_id,
                code,
            },
            None => Error::closed("peer closed the connection"),
        }
    }

    /// Best-effort GOAWAY for a connection error we detected.
    fn abort(&mut self, cause: &Error) {
        let code = match cause {
            Error::HttpProtocol(msg) if msg.starts_with("HPACK") => error_code::COMPRESSION_ERROR,
            _ => error_code::PROTOCOL_ERROR,
        };
        tracing::warn!(error = %cause, "HTTP/2 connection error");
        frame::write_goaway(&mut self.out, 0, code);
    }

    fn shutdown(mut self, cause: Error) {
        self.shared.accepting.store(false, Ordering::Release);
        self.commands.close();
        tracing::debug!(
            error = %cause,
            streams = self.streams.len(),
            queued = self.queue.len(),
            "HTTP/2 driver exiting"
        );
        for (_, mut stream) in self.streams.drain() {
            if let Some(tx) = stream.tx.take() {
                let _ = tx.send(Err(same_cause(&cause)));
            }
        }
        for send in self.queue.drain(..) {
            let _ = send.tx.send(Err(same_cause(&cause)));
        }
        // commands that raced the close
        while let Ok(cmd) = self.commands.try_recv() {
            if let Command::Send { tx, .. } = cmd {
                let _ = tx.send(Err(same_cause(&cause)));
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send {
                key,
                fields,
                body,
                trailers,
                tx,
            } => {
                let send = PendingSend {
                    key,
                    fields,
                    body,
                    trailers,
                    tx,
                };
                if let Some((last_stream_id, code)) = self.goaway {
                    let _ = send.tx.send(Err(Error::GoAway {
                        last_stream_id,
                        code,
                    }));
                } else if self.streams.len() >= self.peer.max_concurrent_streams as usize {
                    tracing::trace!(key, "stream limit reached, queueing request");
                    self.queue.push_back(send);
                } else {
                    self.open_stream(send);
                }
            }
            Command::Cancel { key } => self.cancel(key),
            Command::Snapshot { tx } => {
                let _ = tx.send(FlowSnapshot {
                    conn_send_window: self.conn_send_window,
                    conn_recv_window: self.conn_recv_target - self.conn_unacked,
                    open_streams: self.streams.len(),
                    hpack_table_size: self.encoder.table_size(),
                });
            }
        }
    }

    fn open_stream(&mut self, send: PendingSend) {
        // size checks happen before the encoder sees anything
        let limit = self.peer.max_header_list_size;
        let checked = send.fields.check_size(limit).and_then(|_| match &send.trailers {
            Some(trailers) => trailers.check_size(limit),
            None => Ok(()),
        });
        if let Err(e) = checked {
            tracing::debug!(error = %e, "request rejected before encoding");
            let _ = send.tx.send(Err(e));
            return;
        }

        let id = self.next_stream_id;
        if id > MAX_STREAM_ID {
            self.shared.accepting.store(false, Ordering::Release);
            let _ = send.tx.send(Err(Error::closed("stream ids exhausted")));
            return;
        }
        self.next_stream_id += 2;

        let end_stream = send.body.is_empty() && send.trailers.is_none();
        self.block_buf.clear();
        self.encoder.encode(send.fields.iter(), &mut self.block_buf);
        frame::write_header_block(
            &mut self.out,
            id,
            &self.block_buf,
            end_stream,
            self.peer.max_frame_size as usize,
        );
        tracing::trace!(stream_id = id, fields = send.fields.len(), "stream opened");

        self.opened.insert(send.key, id);
        self.streams.insert(
            id,
            Stream {
                key: send.key,
                state: if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                },
                tx: Some(send.tx),
                send_window: self.peer.initial_window_size as i64,
                recv_window: self.local.initial_window_size as i64,
                unacked: 0,
                pending_body: send.body,
                trailers: send.trailers,
                status: None,
                headers: OrderedHeaders::new(),
                trailers_in: OrderedHeaders::new(),
                body: BytesMut::new(),
            },
        );
        self.send_body(id);
    }

    /// Write as much of the stream's body as both windows allow, then the
    /// trailers once the body is out.
    fn send_body(&mut self, id: u32) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        if stream.state == StreamState::HalfClosedLocal {
            return;
        }
        while !stream.pending_body.is_empty() {
            let n = stream
                .send_window
                .min(self.conn_send_window)
                .min(self.peer.max_frame_size as i64)
                .min(stream.pending_body.len() as i64);
            if n <= 0 {
                tracing::trace!(stream_id = id, "send blocked on flow control");
                return;
            }
            let chunk = stream.pending_body.split_to(n as usize);
            let last = stream.pending_body.is_empty() && stream.trailers.is_none();
            frame::write_data(&mut self.out, id, &chunk, last);
            stream.send_window -= n;
            self.conn_send_window -= n;
            if last {
                stream.state = StreamState::HalfClosedLocal;
                return;
            }
        }
        if let Some(trailers) = stream.trailers.take() {
            self.block_buf.clear();
            self.encoder.encode(trailers.iter(), &mut self.block_buf);
            frame::write_header_block(
                &mut self.out,
                id,
                &self.block_buf,
                true,
                self.peer.max_frame_size as usize,
            );
        }
        stream.state = StreamState::HalfClosedLocal;
    }

    fn send_all_bodies(&mut self) {
        let ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.state == StreamState::Open)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.send_body(id);
        }
    }

    fn open_queued(&mut self) {
        while self.streams.len() < self.peer.max_concurrent_streams as usize {
            let Some(send) = self.queue.pop_front() else {
                break;
            };
            self.open_stream(send);
        }
    }

    fn cancel(&mut self, key: u64) {
        if let Some(pos) = self.queue.iter().position(|s| s.key == key) {
            self.queue.remove(pos);
            return;
        }
        let Some(id) = self.opened.get(&key).copied() else {
            return;
        };
        if self.reset(id, error_code::CANCEL).is_some() {
            tracing::debug!(stream_id = id, "stream canceled");
            self.open_queued();
        }
    }

    /// Drop a stream we give up on, handing its received bytes back to the
    /// connection window.
    fn reset(&mut self, id: u32, code: u32) -> Option<Stream> {
        let stream = self.streams.remove(&id)?;
        self.opened.remove(&stream.key);
        frame::write_rst_stream(&mut self.out, id, code);
        self.credit_connection(stream.unacked);
        Some(stream)
    }

    /// Return bytes to the connection receive window right away.
    fn credit_connection(&mut self, bytes: u32) {
        if bytes == 0 {
            return;
        }
        frame::write_window_update(&mut self.out, 0, bytes);
        self.conn_unacked -= bytes as i64;
    }

    fn complete(&mut self, id: u32) {
        let Some(mut stream) = self.streams.remove(&id) else {
            return;
        };
        self.opened.remove(&stream.key);
        if stream.state == StreamState::Open {
            // complete response before the request finished: stop sending
            tracing::trace!(stream_id = id, "response ended early, request body dropped");
            frame::write_rst_stream(&mut self.out, id, error_code::NO_ERROR);
        }
        if let Some(tx) = stream.tx.take() {
            let _ = tx.send(Ok(StreamResponse {
                status: stream.status.unwrap_or_default(),
                headers: stream.headers,
                trailers: stream.trailers_in,
                body: stream.body.freeze(),
            }));
        }
    }

    fn process_frames(&mut self) -> Result<()> {
        let max_len = self.local.max_frame_size.unwrap_or(frame::DEFAULT_MAX_FRAME_SIZE) as usize;
        loop {
            if self.read_buf.len() < frame::FRAME_HEADER_SIZE {
                break;
            }
            let mut head = [0u8; frame::FRAME_HEADER_SIZE];
            head.copy_from_slice(&self.read_buf[..frame::FRAME_HEADER_SIZE]);
            let header = FrameHeader::parse(&head);
            if header.length as usize > max_len {
                return Err(Error::http_protocol(format!(
                    "frame of {} bytes exceeds max frame size {max_len}",
                    header.length
                )));
            }
            let total = frame::FRAME_HEADER_SIZE + header.length as usize;
            if self.read_buf.len() < total {
                self.read_buf.reserve(total - self.read_buf.len());
                break;
            }
            let mut raw = self.read_buf.split_to(total);
            let payload = raw.split_off(frame::FRAME_HEADER_SIZE).freeze();

            if let Some(pending) = &self.pending_block {
                if header.frame_type != FrameType::Continuation
                    || header.stream_id != pending.stream_id()
                {
                    return Err(Error::http_protocol("expected CONTINUATION frame"));
                }
            }
            let parsed = Frame::parse(header, payload)?;
            self.handle_frame(parsed)?;
        }
        self.open_queued();
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Settings { ack: true, .. } => {}
            Frame::Settings {
                ack: false,
                settings,
            } => self.apply_settings(&settings)?,
            Frame::Ping { ack: false, payload } => frame::write_ping(&mut self.out, true, payload),
            Frame::Ping { ack: true, .. } => {}
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.window_update(stream_id, increment)?,
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                if end_headers {
                    self.on_header_block(stream_id, end_stream, &fragment)?;
                } else {
                    self.pending_block = Some(PendingBlock::Response {
                        stream_id,
                        end_stream,
                        block: BytesMut::from(&fragment[..]),
                    });
                }
            }
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => {
                let Some(mut pending) = self.pending_block.take() else {
                    return Err(Error::http_protocol("unexpected CONTINUATION frame"));
                };
                pending.block_mut().extend_from_slice(&fragment);
                if !end_headers {
                    self.pending_block = Some(pending);
                } else {
                    match pending {
                        PendingBlock::Response {
                            stream_id,
                            end_stream,
                            block,
                        } => self.on_header_block(stream_id, end_stream, &block)?,
                        PendingBlock::Push {
                            promised_stream_id,
                            block,
                            ..
                        } => self.on_push_block(promised_stream_id, &block)?,
                    }
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                fragment,
                end_headers,
            } => {
                if !self.local.enable_push {
                    return Err(Error::http_protocol("PUSH_PROMISE with push disabled"));
                }
                if end_headers {
                    self.on_push_block(promised_stream_id, &fragment)?;
                } else {
                    self.pending_block = Some(PendingBlock::Push {
                        stream_id,
                        promised_stream_id,
                        block: BytesMut::from(&fragment[..]),
                    });
                }
            }
            Frame::Data {
                stream_id,
                data,
                flow_len,
                end_stream,
            } => self.on_data(stream_id, data, flow_len, end_stream),
            Frame::RstStream { stream_id, code } => {
                if let Some(mut stream) = self.streams.remove(&stream_id) {
                    tracing::debug!(stream_id, code, "stream reset by peer");
                    self.opened.remove(&stream.key);
                    self.credit_connection(stream.unacked);
                    if let Some(tx) = stream.tx.take() {
                        let _ = tx.send(Err(Error::PeerReset { stream_id, code }));
                    }
                }
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug,
            } => self.on_goaway(last_stream_id, code, &debug),
            Frame::Priority { .. } | Frame::Unknown => {}
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: &[(u16, u32)]) -> Result<()> {
        for &(id, value) in settings {
            match id {
                x if x == u16::from(SettingsId::HeaderTableSize) => {
                    self.encoder
                        .set_max_table_size((value as usize).min(DEFAULT_TABLE_SIZE));
                }
                x if x == u16::from(SettingsId::MaxConcurrentStreams) => {
                    self.peer.max_concurrent_streams = value;
                }
                x if x == u16::from(SettingsId::InitialWindowSize) => {
                    if value as i64 > MAX_WINDOW {
                        return Err(Error::http_protocol("initial window size too large"));
                    }
                    let delta = value as i64 - self.peer.initial_window_size as i64;
                    for stream in self.streams.values_mut() {
                        stream.send_window += delta;
                    }
                    self.peer.initial_window_size = value;
                }
                x if x == u16::from(SettingsId::MaxFrameSize) => {
                    if !(frame::DEFAULT_MAX_FRAME_SIZE..=frame::MAX_ALLOWED_FRAME_SIZE)
                        .contains(&value)
                    {
                        return Err(Error::http_protocol("invalid max frame size"));
                    }
                    self.peer.max_frame_size = value;
                }
                x if x == u16::from(SettingsId::MaxHeaderListSize) => {
                    self.peer.max_header_list_size = value as u64;
                }
                // ENABLE_PUSH from a server and unknown ids are ignored
                _ => {}
            }
        }
        tracing::trace!(peer = ?self.peer, "peer settings applied");
        frame::write_settings_ack(&mut self.out);
        self.peer_settings_seen = true;
        self.send_all_bodies();
        Ok(())
    }

    fn window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(Error::http_protocol("zero WINDOW_UPDATE increment"));
            }
            self.conn_send_window += increment as i64;
            if self.conn_send_window > MAX_WINDOW {
                return Err(Error::http_protocol("connection send window overflow"));
            }
            self.send_all_bodies();
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_window += increment as i64;
            self.send_body(stream_id);
        }
        Ok(())
    }

    fn on_data(&mut self, stream_id: u32, data: Bytes, flow_len: u32, end_stream: bool) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            // stream already gone; keep the connection window whole
            if flow_len > 0 {
                frame::write_window_update(&mut self.out, 0, flow_len);
            }
            return;
        };
        stream.recv_window -= flow_len as i64;
        stream.unacked += flow_len;
        self.conn_unacked += flow_len as i64;
        if stream.body.len() + data.len() > self.max_body {
            let limit = self.max_body;
            if let Some(mut stream) = self.reset(stream_id, error_code::CANCEL) {
                tracing::debug!(stream_id, limit, "response body too large, stream reset");
                if let Some(tx) = stream.tx.take() {
                    let _ = tx.send(Err(Error::http_protocol(format!(
                        "response body exceeds {limit} bytes"
                    ))));
                }
            }
            self.open_queued();
            return;
        }
        stream.body.extend_from_slice(&data);

        let target = self.local.initial_window_size as i64;
        if !end_stream && stream.recv_window <= target / 2 {
            let increment = (target - stream.recv_window) as u32;
            frame::write_window_update(&mut self.out, stream_id, increment);
            stream.recv_window = target;
        }

        if self.conn_unacked >= self.conn_recv_target / 2 {
            frame::write_window_update(&mut self.out, 0, self.conn_unacked as u32);
            self.conn_unacked = 0;
            for s in self.streams.values_mut() {
                s.unacked = 0;
            }
        }

        if end_stream {
            self.complete(stream_id);
        }
    }

    fn on_header_block(&mut self, stream_id: u32, end_stream: bool, block: &[u8]) -> Result<()> {
        // decode even for unknown streams to keep HPACK state in sync
        let fields = self.decoder.decode(block)?;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        if stream.status.is_none() {
            let status = fields
                .iter()
                .find(|(n, _)| n == ":status")
                .and_then(|(_, v)| v.parse::<u16>().ok())
                .ok_or_else(|| Error::http_protocol("response without :status"))?;
            if (100..200).contains(&status) {
                tracing::trace!(stream_id, status, "informational response skipped");
                return Ok(());
            }
            stream.status = Some(status);
            for (name, value) in fields {
                if !name.starts_with(':') {
                    stream.headers.add(name, value);
                }
            }
        } else {
            for (name, value) in fields {
                if !name.starts_with(':') {
                    stream.trailers_in.add(name, value);
                }
            }
        }

        if end_stream {
            self.complete(stream_id);
        }
        Ok(())
    }

    fn on_push_block(&mut self, promised_stream_id: u32, block: &[u8]) -> Result<()> {
        self.decoder.decode(block)?;
        frame::write_rst_stream(&mut self.out, promised_stream_id, error_code::REFUSED_STREAM);
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: u32, code: u32, debug: &[u8]) {
        tracing::debug!(
            last_stream_id,
            code,
            debug = %String::from_utf8_lossy(debug),
            "GOAWAY received"
        );
        self.goaway = Some((last_stream_id, code));
        self.shared.accepting.store(false, Ordering::Release);

        let doomed: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|id| *id > last_stream_id)
            .collect();
        for id in doomed {
            if let Some(mut stream) = self.streams.remove(&id) {
                self.opened.remove(&stream.key);
                if let Some(tx) = stream.tx.take() {
                    let _ = tx.send(Err(Error::GoAway {
                        last_stream_id,
                        code,
                    }));
                }
            }
        }
        for send in self.queue.drain(..) {
            let _ = send.tx.send(Err(Error::GoAway {
                last_stream_id,
                code,
            }));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Copy of a connection-fatal cause for each stream it fails.
fn same_cause(cause: &Error) -> Error {
    match cause {
        Error::GoAway {
            last_stream_id,
            code,
        } => Error::GoAway {
            last_stream_id: *last_stream_id,
            code: *code,
        },
        Error::Read(msg) => Error::Read(msg.clone()),
        Error::Write(msg) => Error::Write(msg.clone()),
        Error::HttpProtocol(msg) => Error::HttpProtocol(msg.clone()),
        other => Error::closed(other.to_string()),
    }
}
