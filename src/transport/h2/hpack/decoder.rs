//! HPACK decoder for response header blocks.

use super::huffman;
use super::integer;
use super::table::DynamicTable;
use super::HpackError;

pub struct Decoder {
    table: DynamicTable,
    /// Upper bound we advertised in SETTINGS_HEADER_TABLE_SIZE.
    max_allowed: usize,
}

impl Decoder {
    pub fn new(max_allowed: usize) -> Self {
        Self {
            table: DynamicTable::new(max_allowed),
            max_allowed,
        }
    }

    /// Decode a complete header block into `(name, value)` pairs.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>, HpackError> {
        let mut buf = block;
        let mut fields = Vec::new();
        let mut seen_field = false;

        while let Some(&first) = buf.first() {
            if first & 0x80 != 0 {
                let index = integer::decode(&mut buf, 7)?;
                let (n, v) = self.table.get(index).ok_or(HpackError::InvalidIndex(index))?;
                fields.push((n.to_string(), v.to_string()));
                seen_field = true;
            } else if first & 0xc0 == 0x40 {
                let (name, value) = self.read_literal(&mut buf, 6)?;
                self.table.insert(&name, &value);
                fields.push((name, value));
                seen_field = true;
            } else if first & 0xe0 == 0x20 {
                if seen_field {
                    return Err(HpackError::LateSizeUpdate);
                }
                let size = integer::decode(&mut buf, 5)?;
                if size > self.max_allowed {
                    return Err(HpackError::TableSizeTooLarge(size));
                }
                self.table.set_max_size(size);
            } else {
                // without indexing (0000) or never indexed (0001)
                let field = self.read_literal(&mut buf, 4)?;
                fields.push(field);
                seen_field = true;
            }
        }
        Ok(fields)
    }

    fn read_literal(&self, buf: &mut &[u8], prefix: u8) -> Result<(String, String), HpackError> {
        let index = integer::decode(buf, prefix)?;
        let name = if index == 0 {
            read_string(buf)?
        } else {
            self.table
                .get(index)
                .map(|(n, _)| n.to_string())
                .ok_or(HpackError::InvalidIndex(index))?
        };
        let value = read_string(buf)?;
        Ok((name, value))
    }
}

fn read_string(buf: &mut &[u8]) -> Result<String, HpackError> {
    let is_huffman = buf.first().ok_or(HpackError::UnexpectedEof)? & 0x80 != 0;
    let len = integer::decode(buf, 7)?;
    if buf.len() < len {
        return Err(HpackError::UnexpectedEof);
    }
    let (raw, rest) = buf.split_at(len);
    *buf = rest;
    let bytes = if is_huffman {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    String::from_utf8(bytes).map_err(|_| HpackError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::h2::hpack::Encoder;

    #[test]
    fn test_rfc_c6_response() {
        // RFC 7541 C.6.1 with a 256-byte table
        let block = [
            0x48, 0x82, 0x64, 0x02, 0x58, 0x85, 0xae, 0xc3, 0x77, 0x1a, 0x4b, 0x61, 0x96, 0xd0,
            0x7a, 0xbe, 0x94, 0x10, 0x54, 0xd4, 0x44, 0xa8, 0x20, 0x05, 0x95, 0x04, 0x0b, 0x81,
            0x66, 0xe0, 0x82, 0xa6, 0x2d, 0x1b, 0xff, 0x6e, 0x91, 0x9d, 0x29, 0xad, 0x17, 0x18,
            0x63, 0xc7, 0x8f, 0x0b, 0x97, 0xc8, 0xe9, 0xae, 0x82, 0xae, 0x43, 0xd3,
        ];
        let mut dec = Decoder::new(256);
        let fields = dec.decode(&block).unwrap();
        assert_eq!(fields[0], (":status".into(), "302".into()));
        assert_eq!(fields[1], ("cache-control".into(), "private".into()));
        assert_eq!(fields[3], ("location".into(), "https://www.example.com".into()));
    }

    #[test]
    fn test_tracks_encoder_across_blocks() {
        let mut enc = Encoder::new();
        let mut dec = Decoder::new(4096);
        for _ in 0..3 {
            let mut out = Vec::new();
            enc.encode([("x-trace", "abc"), ("cookie", "session=0123456789abcdef")], &mut out);
            let fields = dec.decode(&out).unwrap();
            assert_eq!(fields[0], ("x-trace".into(), "abc".into()));
            assert_eq!(fields[1].1, "session=0123456789abcdef");
        }
    }

    #[test]
    fn test_rejects_oversized_table_update() {
        let mut dec = Decoder::new(4096);
        // size update to 8192: 0x3f 0xe1 0x3f
        assert!(matches!(
            dec.decode(&[0x3f, 0xe1, 0x3f]),
            Err(HpackError::TableSizeTooLarge(8192))
        ));
    }
}
