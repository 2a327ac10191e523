//! HPACK encoder.
//!
//! One encoder per connection. Its dynamic table must evolve exactly as the
//! peer's decoder table does, so every block it produces has to reach the
//! wire in the order it was encoded.

use super::huffman;
use super::integer;
use super::table::{field_size, DynamicTable, Match};

/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

pub struct Encoder {
    table: DynamicTable,
    /// Smallest and final size since the last block, if the limit changed.
    pending_update: Option<(usize, usize)>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(DEFAULT_TABLE_SIZE),
            pending_update: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE. The change is signalled
    /// at the start of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size == self.table.max_size() && self.pending_update.is_none() {
            return;
        }
        self.pending_update = Some(match self.pending_update {
            Some((min, _)) => (min.min(size), size),
            None => (size.min(self.table.max_size()), size),
        });
        self.table.set_max_size(size);
    }

    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Encode one header block. Names must already be lowercase.
    pub fn encode<'a, I>(&mut self, fields: I, out: &mut Vec<u8>)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if let Some((min, last)) = self.pending_update.take() {
            if min < last {
                integer::encode(min, 5, 0x20, out);
            }
            integer::encode(last, 5, 0x20, out);
        }
        for (name, value) in fields {
            self.encode_field(name, value, out);
        }
    }

    fn encode_field(&mut self, name: &str, value: &str, out: &mut Vec<u8>) {
        if is_sensitive(name, value) {
            // Literal never indexed (Section 6.2.3)
            self.encode_literal(name, value, 0x10, 4, out);
            return;
        }

        let found = self.table.find(name, value);
        if let Some(Match::Full(index)) = found {
            integer::encode(index, 7, 0x80, out);
            return;
        }

        if field_size(name, value) <= self.table.max_size() {
            // Literal with incremental indexing (Section 6.2.1)
            self.encode_literal(name, value, 0x40, 6, out);
            self.table.insert(name, value);
        } else {
            // Literal without indexing (Section 6.2.2)
            self.encode_literal(name, value, 0x00, 4, out);
        }
    }

    fn encode_literal(&self, name: &str, value: &str, flags: u8, prefix: u8, out: &mut Vec<u8>) {
        match self.table.find(name, value) {
            Some(Match::Name(index)) | Some(Match::Full(index)) => {
                integer::encode(index, prefix, flags, out);
            }
            None => {
                integer::encode(0, prefix, flags, out);
                encode_string(name.as_bytes(), out);
            }
        }
        encode_string(value.as_bytes(), out);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_sensitive(name: &str, value: &str) -> bool {
    matches!(name, "authorization" | "proxy-authorization") || (name == "cookie" && value.len() < 20)
}

/// String literal, Huffman-coded when strictly shorter (Section 5.2).
pub fn encode_string(input: &[u8], out: &mut Vec<u8>) {
    let huff_len = huffman::encoded_len(input);
    if huff_len < input.len() {
        integer::encode(huff_len, 7, 0x80, out);
        huffman::encode(input, out);
    } else {
        integer::encode(input.len(), 7, 0x00, out);
        out.extend_from_slice(input);
    }
}
