//! HTTP transport.
//!
//! - [`connector`]: BoringSSL handshakes with a selectable ClientHello
//! - [`proxy`]: direct, SOCKS5 and CONNECT dialing
//! - [`h1`]: HTTP/1.1 writer and reader
//! - [`h2`]: HTTP/2 connection with its own HPACK encoder
//! - [`round_tripper`]: the [`Transport`] callers use

pub mod connector;
pub mod h1;
pub mod h2;
pub mod proxy;
pub mod round_tripper;

pub use round_tripper::{Transport, TransportBuilder};
