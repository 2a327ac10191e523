//! TLS and HTTP/2 fingerprinting configuration.

pub mod client_hello;
pub mod http2;
pub mod profiles;
pub mod tls;

pub use client_hello::ClientHelloInfo;
pub use http2::Http2Settings;
pub use profiles::FingerprintProfile;
pub use tls::{CertCompression, TlsFingerprint};
