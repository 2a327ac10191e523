//! HPACK header compression (RFC 7541).

mod decoder;
mod encoder;
pub mod huffman;
mod integer;
mod table;

pub use decoder::Decoder;
pub use encoder::{Encoder, DEFAULT_TABLE_SIZE};
pub use table::field_size;

/// HPACK decoding failures. Any of them is a COMPRESSION_ERROR on the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    #[error("unexpected end of header block")]
    UnexpectedEof,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid table index {0}")]
    InvalidIndex(usize),
    #[error("invalid Huffman code")]
    InvalidHuffman,
    #[error("header field is not valid UTF-8")]
    InvalidUtf8,
    #[error("dynamic table size update after a field")]
    LateSizeUpdate,
    #[error("dynamic table size {0} exceeds advertised limit")]
    TableSizeTooLarge(usize),
}

impl From<HpackError> for crate::error::Error {
    fn from(e: HpackError) -> Self {
        crate::error::Error::http_protocol(format!("HPACK: {e}"))
    }
}
