use std::sync::Arc;
use std::time::Duration;

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// One request as it arrived on the wire.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Index of the accepted connection it came in on.
    pub connection: usize,
    pub raw: Vec<u8>,
}

impl RecordedRequest {
    pub fn head(&self) -> &str {
        let end = find(&self.raw, b"\r\n\r\n").map(|i| i + 4).unwrap_or(self.raw.len());
        std::str::from_utf8(&self.raw[..end]).expect("request head is UTF-8")
    }

    pub fn request_line(&self) -> &str {
        self.head().lines().next().unwrap_or_default()
    }

    /// Header lines in wire order, as `(name, value)` with the name's casing kept.
    pub fn header_lines(&self) -> Vec<(String, String)> {
        self.head()
            .lines()
            .skip(1)
            .take_while(|l| !l.is_empty())
            .filter_map(|l| l.split_once(": "))
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    pub fn header_names(&self) -> Vec<String> {
        self.header_lines().into_iter().map(|(n, _)| n).collect()
    }

    pub fn body(&self) -> &[u8] {
        let start = find(&self.raw, b"\r\n\r\n").map(|i| i + 4).unwrap_or(self.raw.len());
        &self.raw[start..]
    }
}

pub type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

/// HTTP/1.1 mock server that records every request and answers each one
/// with the same canned response. Connections are kept alive.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
    response: Vec<u8>,
    requests: Requests,
}

impl MockHttpServer {
    /// Create a new mock server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            response: b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello".to_vec(),
            requests: Arc::default(),
        })
    }

    pub fn with_response(mut self, response: impl Into<Vec<u8>>) -> Self {
        self.response = response.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Shared list of recorded requests.
    pub fn requests(&self) -> Requests {
        Arc::clone(&self.requests)
    }

    /// Serve plain TCP.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = self.listener.accept().await {
                let response = self.response.clone();
                let requests = Arc::clone(&self.requests);
                tokio::spawn(serve(stream, index, response, requests));
                index += 1;
            }
        })
    }

    /// Serve TLS with the given acceptor.
    pub fn start_tls(self, acceptor: SslAcceptor) -> tokio::task::JoinHandle<()> {
        let acceptor = Arc::new(acceptor);
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = self.listener.accept().await {
                let acceptor = Arc::clone(&acceptor);
                let response = self.response.clone();
                let requests = Arc::clone(&self.requests);
                tokio::spawn(async move {
                    match tokio_boring::accept(&acceptor, stream).await {
                        Ok(tls) => serve(tls, index, response, requests).await,
                        Err(e) => tracing::warn!("TLS accept failed: {e}"),
                    }
                });
                index += 1;
            }
        })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the first complete request in `buf`, if there is one.
fn complete_request_len(buf: &[u8]) -> Option<usize> {
    let head_end = find(buf, b"\r\n\r\n")? + 4;
    let head = std::str::from_utf8(&buf[..head_end]).ok()?.to_ascii_lowercase();

    if head.contains("\r\ntransfer-encoding: chunked") {
        // chunked body ends with the last-chunk line and the trailer section
        let body = &buf[head_end..];
        let last = if body.starts_with(b"0\r\n") {
            0
        } else {
            find(body, b"\r\n0\r\n")? + 2
        };
        let end = find(&body[last..], b"\r\n\r\n")? + 4;
        return Some(head_end + last + end);
    }

    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length: "))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    (buf.len() >= head_end + content_length).then_some(head_end + content_length)
}

async fn serve<S>(mut stream: S, connection: usize, response: Vec<u8>, requests: Requests)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        while let Some(len) = complete_request_len(&buf) {
            let raw: Vec<u8> = buf.drain(..len).collect();
            requests.lock().await.push(RecordedRequest { connection, raw });
            if stream.write_all(&response).await.is_err() || stream.flush().await.is_err() {
                return;
            }
        }

        let mut chunk = [0u8; 8192];
        let n = match timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => n,
            _ => return,
        };
        buf.extend_from_slice(&chunk[..n]);
    }
}
