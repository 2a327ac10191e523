use std::sync::Arc;

use boring::ssl::SslAcceptor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// What a proxy was asked for.
#[derive(Debug, Clone, Default)]
pub struct ProxyLog {
    /// `CONNECT` request heads, or `host:port` destinations for SOCKS5.
    pub requests: Vec<String>,
    /// SOCKS5 username/password pairs presented.
    pub credentials: Vec<(String, String)>,
    /// ALPN selected on TLS sessions to the proxy, empty when none.
    pub alpn: Vec<String>,
}

pub type SharedLog = Arc<Mutex<ProxyLog>>;

/// Tunneling proxy. Every destination is redirected to `upstream_port` on
/// 127.0.0.1 so tests can use arbitrary host names.
pub struct MockTunnelProxy {
    listener: TcpListener,
    port: u16,
    upstream_port: u16,
    log: SharedLog,
}

impl MockTunnelProxy {
    pub async fn new(upstream_port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            upstream_port,
            log: SharedLog::default(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log(&self) -> SharedLog {
        Arc::clone(&self.log)
    }

    /// Answer HTTP CONNECT requests with `status`; 200 opens the tunnel.
    pub fn start_connect(self, status: u16) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok((client, _)) = self.listener.accept().await {
                let log = Arc::clone(&self.log);
                tokio::spawn(serve_connect(client, status, self.upstream_port, log));
            }
        })
    }

    /// CONNECT proxy reached over TLS (an `https://` proxy).
    pub fn start_connect_tls(self, acceptor: SslAcceptor) -> tokio::task::JoinHandle<()> {
        let acceptor = Arc::new(acceptor);
        tokio::spawn(async move {
            while let Ok((client, _)) = self.listener.accept().await {
                let log = Arc::clone(&self.log);
                let acceptor = Arc::clone(&acceptor);
                let upstream_port = self.upstream_port;
                tokio::spawn(async move {
                    if let Ok(tls) = tokio_boring::accept(&acceptor, client).await {
                        let alpn = tls.ssl().selected_alpn_protocol().unwrap_or_default();
                        log.lock()
                            .await
                            .alpn
                            .push(String::from_utf8_lossy(alpn).into_owned());
                        serve_connect(tls, 200, upstream_port, log).await;
                    }
                });
            }
        })
    }

    /// Speak SOCKS5. When `require_auth` is set only username/password
    /// is offered.
    pub fn start_socks5(self, require_auth: bool) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok((client, _)) = self.listener.accept().await {
                let log = Arc::clone(&self.log);
                let upstream_port = self.upstream_port;
                tokio::spawn(async move {
                    if let Ok(client) = socks5_accept(client, require_auth, log).await {
                        tunnel(client, upstream_port).await;
                    }
                });
            }
        })
    }
}

async fn serve_connect<S>(mut client: S, status: u16, upstream_port: u16, log: SharedLog)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match client.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }
    log.lock()
        .await
        .requests
        .push(String::from_utf8_lossy(&head).into_owned());

    let reason = if status == 200 { "Connection established" } else { "Nope" };
    let reply = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\n\r\n");
    if client.write_all(reply.as_bytes()).await.is_err() || status != 200 {
        return;
    }
    tunnel(client, upstream_port).await;
}

async fn socks5_accept(
    mut client: TcpStream,
    require_auth: bool,
    log: SharedLog,
) -> std::io::Result<TcpStream> {
    let mut greeting = [0u8; 2];
    client.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    client.read_exact(&mut methods).await?;

    if require_auth {
        if !methods.contains(&0x02) {
            client.write_all(&[5, 0xff]).await?;
            return Err(std::io::ErrorKind::PermissionDenied.into());
        }
        client.write_all(&[5, 0x02]).await?;
        let mut ver_len = [0u8; 2];
        client.read_exact(&mut ver_len).await?;
        let mut user = vec![0u8; ver_len[1] as usize];
        client.read_exact(&mut user).await?;
        let mut plen = [0u8; 1];
        client.read_exact(&mut plen).await?;
        let mut pass = vec![0u8; plen[0] as usize];
        client.read_exact(&mut pass).await?;
        log.lock().await.credentials.push((
            String::from_utf8_lossy(&user).into_owned(),
            String::from_utf8_lossy(&pass).into_owned(),
        ));
        client.write_all(&[1, 0]).await?;
    } else {
        client.write_all(&[5, 0x00]).await?;
    }

    let mut req = [0u8; 4];
    client.read_exact(&mut req).await?;
    let host = match req[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        _ => return Err(std::io::ErrorKind::Unsupported.into()),
    };
    let mut port = [0u8; 2];
    client.read_exact(&mut port).await?;
    log.lock()
        .await
        .requests
        .push(format!("{host}:{}", u16::from_be_bytes(port)));

    client.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await?;
    Ok(client)
}

async fn tunnel<S>(mut client: S, upstream_port: u16)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Ok(mut upstream) = TcpStream::connect(("127.0.0.1", upstream_port)).await {
        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    }
}
