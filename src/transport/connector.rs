//! BoringSSL TLS connector with selectable ClientHello profiles.
//!
//! A fresh `SslConnector` is built for every handshake from the profile's
//! [`TlsFingerprint`], so the proxy hop and the target hop never share TLS
//! state. Profiles that do not permute send their extensions in the listed
//! order. GREASE, extension permutation and certificate compression are set
//! through `boring-sys`.

use std::fmt;
use std::io;
use std::io::Read;
use std::os::raw::c_int;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use boring::ssl::{NameType, SslConnector, SslMethod, SslRef, SslSessionCacheMode, SslVerifyMode, SslVersion};
use boring::x509::X509;
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_boring::SslStream;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{CertCompression, FingerprintProfile, TlsFingerprint};
use crate::version::HttpVersion;

extern "C" {
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int);
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int);
}

const EXT_STATUS_REQUEST: u16 = 5;
const EXT_SIGNED_CERT_TIMESTAMP: u16 = 18;

/// Any byte stream a connection can run over: TCP, a proxy tunnel, or TLS
/// to an HTTPS proxy.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static {}

pub type BoxedIo = Box<dyn Io>;

/// Copy a decompressed certificate into a CRYPTO_BUFFER for BoringSSL.
unsafe fn crypto_buffer(out: *mut *mut CRYPTO_BUFFER, data: &[u8], expected: usize) -> c_int {
    if data.len() != expected {
        return 0;
    }
    let buffer = boring_sys::CRYPTO_BUFFER_new(data.as_ptr(), data.len(), std::ptr::null_mut());
    if buffer.is_null() {
        return 0;
    }
    *out = buffer;
    1
}

unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    match brotli::Decompressor::new(compressed, 4096).read_to_end(&mut decompressed) {
        Ok(_) => crypto_buffer(out, &decompressed, uncompressed_len),
        Err(_) => 0,
    }
}

unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    match flate2::read::ZlibDecoder::new(compressed).read_to_end(&mut decompressed) {
        Ok(_) => crypto_buffer(out, &decompressed, uncompressed_len),
        Err(_) => 0,
    }
}

/// Normalized handshake summary, the same for shaped and default handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    /// Protocol version, e.g. `TLSv1.3`.
    pub version: String,
    /// Negotiated cipher suite name.
    pub cipher: String,
    /// ALPN protocol the server selected.
    pub alpn: Option<Vec<u8>>,
    pub server_name: String,
    pub session_reused: bool,
    /// Peer certificate chain, leaf first, DER encoded.
    pub peer_chain: Vec<Vec<u8>>,
}

impl TlsInfo {
    fn from_ssl(ssl: &SslRef, server_name: &str) -> Self {
        Self {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            alpn: ssl.selected_alpn_protocol().map(<[u8]>::to_vec),
            server_name: ssl
                .servername(NameType::HOST_NAME)
                .unwrap_or(server_name)
                .to_string(),
            session_reused: ssl.session_reused(),
            peer_chain: ssl
                .peer_cert_chain()
                .map(|chain| chain.iter().filter_map(|c| c.to_der().ok()).collect())
                .unwrap_or_default(),
        }
    }

    /// Selected ALPN as text, `""` when none was negotiated.
    pub fn alpn_str(&self) -> &str {
        self.alpn
            .as_deref()
            .and_then(|a| std::str::from_utf8(a).ok())
            .unwrap_or("")
    }

    pub fn http_version(&self) -> HttpVersion {
        HttpVersion::from_alpn(self.alpn.as_deref())
    }
}

/// Stream that can be either plain or TLS-wrapped.
#[derive(Debug)]
pub enum MaybeHttpsStream {
    Http(BoxedIo),
    Https(SslStream<BoxedIo>),
}

impl MaybeHttpsStream {
    /// Negotiated ALPN, `None` for plain streams.
    pub fn alpn(&self) -> Option<&[u8]> {
        match self {
            Self::Http(_) => None,
            Self::Https(stream) => stream.ssl().selected_alpn_protocol(),
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Self::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Http(stream) => Pin::new(stream).poll_flush(cx),
            Self::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Self::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// TLS connector for one profile. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BoringConnector {
    profile: FingerprintProfile,
    fingerprint: TlsFingerprint,
    root_certs: Vec<Vec<u8>>,
    accept_invalid_certs: bool,
    handshake_timeout: Option<Duration>,
}

impl BoringConnector {
    pub fn new(profile: FingerprintProfile) -> Self {
        Self {
            profile,
            fingerprint: profile.tls_fingerprint(),
            root_certs: Vec::new(),
            accept_invalid_certs: false,
            handshake_timeout: None,
        }
    }

    /// Connector for the configured profile, trust anchors and timeout.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.profile)
            .with_root_certificates(config.root_certs.clone())
            .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
            .with_handshake_timeout(config.timeouts.tls_handshake)
    }

    /// Same trust settings with the host's default ClientHello.
    pub fn default_path(&self) -> Self {
        Self {
            profile: FingerprintProfile::None,
            fingerprint: TlsFingerprint::default(),
            ..self.clone()
        }
    }

    /// Offer only `http/1.1` in ALPN, for hops that never speak HTTP/2.
    pub fn http1_only(mut self) -> Self {
        self.fingerprint.alpn = vec![HttpVersion::Http1_1.alpn_id()];
        self
    }

    /// Add root certificates (DER or PEM).
    pub fn with_root_certificates(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.root_certs = certs;
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn profile(&self) -> FingerprintProfile {
        self.profile
    }

    fn build(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("failed to create SSL connector: {e}")))?;

        for cert in &self.root_certs {
            let parsed = X509::from_der(cert).or_else(|_| X509::from_pem(cert));
            match parsed {
                Ok(cert) => {
                    builder
                        .cert_store_mut()
                        .add_cert(cert)
                        .map_err(|e| Error::tls(format!("failed to add root certificate: {e}")))?;
                }
                Err(e) => tracing::warn!(error = %e, "skipping unparsable root certificate"),
            }
        }
        if self.accept_invalid_certs {
            builder.set_verify(SslVerifyMode::NONE);
        }

        let fp = &self.fingerprint;
        if self.profile.is_fingerprinted() {
            let ciphers = fp.tls12_cipher_string();
            if !ciphers.is_empty() {
                builder
                    .set_cipher_list(&ciphers)
                    .map_err(|e| Error::tls(format!("failed to set cipher list: {e}")))?;
            }
            if !fp.curves.is_empty() {
                builder
                    .set_curves_list(&fp.curves.join(":"))
                    .map_err(|e| Error::tls(format!("failed to set curves: {e}")))?;
            }
            if !fp.sigalgs.is_empty() {
                builder
                    .set_sigalgs_list(&fp.sigalgs.join(":"))
                    .map_err(|e| Error::tls(format!("failed to set signature algorithms: {e}")))?;
            }

            if !fp.permute_extensions && !fp.extension_order.is_empty() {
                builder
                    .set_extension_order(&fp.extension_order)
                    .map_err(|e| Error::tls(format!("failed to set extension order: {e}")))?;
            }
            if fp.extension_order.contains(&EXT_STATUS_REQUEST) {
                builder.enable_ocsp_stapling();
            }
            if fp.extension_order.contains(&EXT_SIGNED_CERT_TIMESTAMP) {
                builder.enable_signed_cert_timestamps();
            }

            // SAFETY: the context pointer is owned by `builder` and outlives these calls.
            unsafe {
                let ctx = builder.as_ptr() as *mut SSL_CTX;
                SSL_CTX_set_grease_enabled(ctx, c_int::from(fp.grease));
                SSL_CTX_set_permute_extensions(ctx, c_int::from(fp.permute_extensions));
                match fp.cert_compression {
                    CertCompression::Brotli => {
                        boring_sys::SSL_CTX_add_cert_compression_alg(
                            ctx,
                            boring_sys::TLSEXT_cert_compression_brotli as u16,
                            None,
                            Some(decompress_brotli_cert),
                        );
                    }
                    CertCompression::Zlib => {
                        boring_sys::SSL_CTX_add_cert_compression_alg(
                            ctx,
                            boring_sys::TLSEXT_cert_compression_zlib as u16,
                            None,
                            Some(decompress_zlib_cert),
                        );
                    }
                    CertCompression::None => {}
                }
            }
        }

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::tls(format!("failed to set min TLS version: {e}")))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::tls(format!("failed to set max TLS version: {e}")))?;
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
        builder
            .set_alpn_protos(&fp.alpn_wire())
            .map_err(|e| Error::tls(format!("failed to set ALPN: {e}")))?;

        Ok(builder.build())
    }

    /// Run the client handshake over `io`.
    ///
    /// On timeout the partial connection is dropped and
    /// [`Error::TlsHandshakeTimeout`] returned.
    pub async fn handshake(
        &self,
        io: BoxedIo,
        server_name: &str,
    ) -> Result<(SslStream<BoxedIo>, TlsInfo)> {
        let mut config = self
            .build()?
            .configure()
            .map_err(|e| Error::tls(format!("failed to configure SSL: {e}")))?;
        if self.accept_invalid_certs {
            config.set_verify_hostname(false);
        }

        tracing::debug!(profile = %self.profile, server_name, "TLS handshake");
        let connect = tokio_boring::connect(config, server_name, io);
        let outcome = match self.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| Error::TlsHandshakeTimeout(limit))?,
            None => connect.await,
        };
        let stream = outcome.map_err(|e| Error::TlsHandshakeFailed(e.to_string()))?;

        let info = TlsInfo::from_ssl(stream.ssl(), server_name);
        tracing::debug!(
            version = %info.version,
            cipher = %info.cipher,
            alpn = info.alpn_str(),
            resumed = info.session_reused,
            "TLS handshake complete"
        );
        Ok((stream, info))
    }
}
