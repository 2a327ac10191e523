//! # mimic
//!
//! HTTP client transport that puts header order and the TLS ClientHello
//! under the caller's control.
//!
//! Header fields go on the wire in exactly the order the request lists
//! them, on HTTP/1.1 and in HTTP/2 HEADERS frames alike. The ClientHello is
//! shaped by a [`FingerprintProfile`] and built with BoringSSL. Targets can
//! be reached directly or through HTTP, HTTPS and SOCKS5 proxies.
//!
//! ```no_run
//! # async fn run() -> mimic::Result<()> {
//! use mimic::{FingerprintProfile, Request, Transport};
//!
//! let transport = Transport::builder()
//!     .profile(FingerprintProfile::FirefoxAuto)
//!     .build()?;
//! let request = Request::get("https://example.com/")?
//!     .header("Accept", "text/html")
//!     .header("Accept-Language", "en-US")
//!     .header("Cookie", "a=1; b=2");
//! let response = transport.send(request).await?;
//! println!("{} {}", response.status, response.version());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod pool;
pub mod request;
pub mod response;
pub mod timeouts;
pub mod transport;
pub mod version;

pub use config::TransportConfig;
pub use error::{Error, Hop, Phase, Result};
pub use fingerprint::{ClientHelloInfo, FingerprintProfile, Http2Settings};
pub use headers::{HeaderField, OrderedHeaders};
pub use request::Request;
pub use response::Response;
pub use timeouts::Timeouts;
pub use transport::connector::TlsInfo;
pub use transport::{Transport, TransportBuilder};
pub use version::HttpVersion;
