//! HTTP/2 connection handle.
//!
//! A cheap, cloneable front for one driver task. Requests are handed over as
//! already-built header lists; the handle only waits for the outcome, and
//! tells the driver when a caller gives up so the stream can be reset.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MAX_BODY_SIZE;
use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::headers::OrderedHeaders;

use super::driver::{Command, H2Driver};
use super::encode::HeaderList;
use super::frame;

/// State the driver publishes to its handles.
pub(super) struct Shared {
    pub(super) accepting: AtomicBool,
}

/// Final response of one stream.
#[derive(Debug)]
pub struct StreamResponse {
    pub status: u16,
    pub headers: OrderedHeaders,
    pub trailers: OrderedHeaders,
    pub body: Bytes,
}

/// Flow-control view of a connection, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub conn_send_window: i64,
    pub conn_recv_window: i64,
    pub open_streams: usize,
    pub hpack_table_size: usize,
}

/// Local limits for one connection.
#[derive(Debug, Clone, Copy)]
pub struct H2Options {
    /// Close with GOAWAY(NO_ERROR) after this long without open streams.
    pub idle_timeout: Option<Duration>,
    /// Streams whose response body grows past this are reset.
    pub max_body_size: usize,
}

impl Default for H2Options {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Handle to a multiplexed HTTP/2 connection.
#[derive(Clone)]
pub struct H2Connection {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    next_key: Arc<AtomicU64>,
}

impl H2Connection {
    /// Write the client preface and start the driver task.
    ///
    /// The preface is SETTINGS from `settings` followed by the
    /// connection-level WINDOW_UPDATE. Requests are held back until the
    /// server's own SETTINGS arrive.
    pub fn handshake<S>(io: S, settings: Http2Settings, options: H2Options) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut preface = BytesMut::with_capacity(128);
        preface.put_slice(frame::CONNECTION_PREFACE);
        frame::write_settings(&mut preface, &settings.to_frame_settings());
        if settings.connection_window_increment > 0 {
            frame::write_window_update(&mut preface, 0, settings.connection_window_increment);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            accepting: AtomicBool::new(true),
        });
        let driver = H2Driver::new(io, rx, shared.clone(), settings, preface, options);
        tokio::spawn(driver.drive());

        Self {
            commands: tx,
            shared,
            next_key: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Whether new streams may be opened.
    pub fn is_usable(&self) -> bool {
        !self.commands.is_closed() && self.shared.accepting.load(Ordering::Acquire)
    }

    /// Open a stream and wait for its complete response.
    ///
    /// `fields` must come from [`request_headers`](super::encode::request_headers).
    /// If `cancel` fires or `response_timeout` elapses first, the stream is
    /// reset with CANCEL and its flow-control credit handed back.
    pub async fn send(
        &self,
        fields: HeaderList,
        body: Bytes,
        trailers: Option<HeaderList>,
        cancel: Option<&CancellationToken>,
        response_timeout: Option<Duration>,
    ) -> Result<StreamResponse> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                key,
                fields,
                body,
                trailers,
                tx,
            })
            .map_err(|_| Error::closed("HTTP/2 connection driver has exited"))?;

        let mut guard = CancelOnDrop {
            commands: &self.commands,
            key,
            armed: true,
        };

        let wait = async {
            let outcome = match response_timeout {
                Some(limit) => tokio::time::timeout(limit, rx)
                    .await
                    .map_err(|_| Error::timeout(format!("no response within {limit:?}")))?,
                None => rx.await,
            };
            outcome.map_err(|_| Error::closed("HTTP/2 connection driver has exited"))?
        };

        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Canceled),
                res = wait => res,
            },
            None => wait.await,
        };

        if !matches!(result, Err(Error::Canceled) | Err(Error::Timeout(_))) {
            guard.armed = false;
        }
        result
    }

    /// Current flow-control windows as the driver sees them.
    pub async fn flow_snapshot(&self) -> Result<FlowSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { tx })
            .map_err(|_| Error::closed("HTTP/2 connection driver has exited"))?;
        rx.await
            .map_err(|_| Error::closed("HTTP/2 connection driver has exited"))
    }
}

/// Resets the stream if the caller stops waiting, including when the
/// `send` future itself is dropped.
struct CancelOnDrop<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    key: u64,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Cancel { key: self.key });
        }
    }
}
