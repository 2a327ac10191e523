//! HTTP/2 client with caller-ordered header blocks.
//!
//! - [`encode`] turns a request into the exact field list for its HEADERS frame
//! - [`hpack`] compresses it against the connection's shared dynamic table
//! - [`frame`] is the binary frame layer
//! - [`H2Connection`] is the handle; a driver task owns the socket
//!
//! A connection advertises its preface from [`Http2Settings`](crate::fingerprint::Http2Settings)
//! and writes every header block as one uninterrupted HEADERS + CONTINUATION run.

mod connection;
mod driver;
pub mod encode;
pub mod frame;
pub mod hpack;

pub use connection::{FlowSnapshot, H2Connection, H2Options, StreamResponse};
pub use encode::{request_headers, trailer_fields, EncodeOptions, HeaderList};
