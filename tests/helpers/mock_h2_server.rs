use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use boring::ssl::SslAcceptor;
use mimic::transport::h2::hpack::{Decoder, Encoder};

pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;
pub const CONTINUATION: u8 = 0x9;

pub const END_STREAM: u8 = 0x1;
pub const ACK: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// A raw frame as read off the wire.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// A mock HTTP/2 server for scripting frame sequences over TLS.
pub struct MockH2Server {
    listener: TcpListener,
    port: u16,
}

impl MockH2Server {
    /// Create a new mock H2 server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept TLS connections and hand each one to `handler`.
    pub fn start_tls<F, Fut>(self, acceptor: SslAcceptor, handler: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(MockH2Connection) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        let acceptor = Arc::new(acceptor);
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                let handler = Arc::clone(&handler);
                let acceptor = Arc::clone(&acceptor);
                tokio::spawn(async move {
                    match tokio_boring::accept(&acceptor, stream).await {
                        Ok(tls) => handler(MockH2Connection::from_stream(tls)).await,
                        Err(e) => tracing::warn!("TLS accept failed: {e}"),
                    }
                });
            }
        })
    }
}

/// Server side of one HTTP/2 connection with frame-level control.
pub struct MockH2Connection {
    stream: Mutex<Box<dyn Io>>,
    decoder: Mutex<Decoder>,
    encoder: Mutex<Encoder>,
}

impl MockH2Connection {
    /// Wrap an already accepted stream, e.g. one end of `tokio::io::duplex`.
    pub fn from_stream<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>(stream: S) -> Self {
        Self {
            stream: Mutex::new(Box::new(stream)),
            decoder: Mutex::new(Decoder::new(4096)),
            encoder: Mutex::new(Encoder::new()),
        }
    }

    /// Read the 24-byte connection preface.
    pub async fn read_preface(&self) -> std::io::Result<()> {
        let mut stream = self.stream.lock().await;
        let mut preface = [0u8; 24];
        stream.read_exact(&mut preface).await?;
        if preface.as_slice() != b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n" {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid HTTP/2 preface",
            ));
        }
        Ok(())
    }

    /// Read the next complete frame from the client.
    pub async fn read_frame(&self) -> std::io::Result<RawFrame> {
        let mut stream = self.stream.lock().await;
        let mut header = [0u8; 9];
        stream.read_exact(&mut header).await?;
        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await?;
        Ok(RawFrame {
            frame_type: header[3],
            flags: header[4],
            stream_id: u32::from_be_bytes([header[5] & 0x7f, header[6], header[7], header[8]]),
            payload: Bytes::from(payload),
        })
    }

    /// Preface, then the client's SETTINGS; answers with `settings` and an ACK.
    ///
    /// Returns the client's SETTINGS as `(id, value)` pairs.
    pub async fn handshake(&self, settings: &[(u16, u32)]) -> std::io::Result<Vec<(u16, u32)>> {
        self.read_preface().await?;
        let first = self.read_frame().await?;
        assert_eq!(first.frame_type, SETTINGS, "client preface must start with SETTINGS");
        let client_settings = first
            .payload
            .chunks_exact(6)
            .map(|c| (u16::from_be_bytes([c[0], c[1]]), u32::from_be_bytes([c[2], c[3], c[4], c[5]])))
            .collect();
        self.send_settings(settings).await?;
        self.send_frame(SETTINGS, ACK, 0, &[]).await?;
        Ok(client_settings)
    }

    /// Next frame that is not connection housekeeping (SETTINGS,
    /// WINDOW_UPDATE on stream 0, PING).
    pub async fn next_stream_frame(&self) -> std::io::Result<RawFrame> {
        loop {
            let frame = self.read_frame().await?;
            match (frame.frame_type, frame.stream_id) {
                (SETTINGS, _) | (WINDOW_UPDATE, 0) | (0x6, _) => continue,
                _ => return Ok(frame),
            }
        }
    }

    /// Read one request header block (HEADERS plus any CONTINUATION) and
    /// decode it. Returns the stream id, the fields, the raw frames and
    /// whether END_STREAM was set.
    pub async fn read_request_headers(
        &self,
    ) -> std::io::Result<(u32, Vec<(String, String)>, Vec<RawFrame>, bool)> {
        let first = self.next_stream_frame().await?;
        assert_eq!(first.frame_type, HEADERS, "expected HEADERS, got {first:?}");
        let stream_id = first.stream_id;
        let end_stream = first.flags & END_STREAM != 0;
        let mut block = first.payload.to_vec();
        let mut end_headers = first.flags & END_HEADERS != 0;
        let mut frames = vec![first];
        while !end_headers {
            let next = self.read_frame().await?;
            assert_eq!(next.frame_type, CONTINUATION, "header block interrupted by {next:?}");
            assert_eq!(next.stream_id, stream_id, "CONTINUATION for another stream");
            end_headers = next.flags & END_HEADERS != 0;
            block.extend_from_slice(&next.payload);
            frames.push(next);
        }
        let fields = self
            .decoder
            .lock()
            .await
            .decode(&block)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{e:?}")))?;
        Ok((stream_id, fields, frames, end_stream))
    }

    /// Send a raw frame to the client.
    pub async fn send_frame(
        &self,
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let mut stream = self.stream.lock().await;
        let length = payload.len() as u32;
        let mut frame = Vec::with_capacity(9 + payload.len());
        frame.extend_from_slice(&length.to_be_bytes()[1..]);
        frame.push(frame_type);
        frame.push(flags);
        frame.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
        frame.extend_from_slice(payload);
        stream.write_all(&frame).await?;
        stream.flush().await
    }

    pub async fn send_settings(&self, settings: &[(u16, u32)]) -> std::io::Result<()> {
        let mut payload = Vec::new();
        for (id, value) in settings {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        self.send_frame(SETTINGS, 0, 0, &payload).await
    }

    /// HPACK-encode and send a response header block.
    pub async fn send_headers(
        &self,
        stream_id: u32,
        fields: &[(&str, &str)],
        end_stream: bool,
    ) -> std::io::Result<()> {
        let mut block = Vec::new();
        self.encoder
            .lock()
            .await
            .encode(fields.iter().copied(), &mut block);
        let flags = END_HEADERS | if end_stream { END_STREAM } else { 0 };
        self.send_frame(HEADERS, flags, stream_id, &block).await
    }

    pub async fn send_data(&self, stream_id: u32, data: &[u8], end_stream: bool) -> std::io::Result<()> {
        let flags = if end_stream { END_STREAM } else { 0 };
        self.send_frame(DATA, flags, stream_id, data).await
    }

    /// `:status 200` with a body.
    pub async fn respond(&self, stream_id: u32, body: &[u8]) -> std::io::Result<()> {
        let len = body.len().to_string();
        self.send_headers(stream_id, &[(":status", "200"), ("content-length", &len)], false)
            .await?;
        self.send_data(stream_id, body, true).await
    }

    pub async fn send_rst_stream(&self, stream_id: u32, error_code: u32) -> std::io::Result<()> {
        self.send_frame(RST_STREAM, 0, stream_id, &error_code.to_be_bytes()).await
    }

    pub async fn send_goaway(&self, last_stream_id: u32, error_code: u32) -> std::io::Result<()> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
        payload.extend_from_slice(&error_code.to_be_bytes());
        self.send_frame(GOAWAY, 0, 0, &payload).await
    }
}
