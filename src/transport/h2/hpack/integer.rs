//! HPACK prefix integers (RFC 7541 Section 5.1).

use super::HpackError;

/// Append `value` using an N-bit prefix. `flags` carries the bits above the
/// prefix in the first octet.
pub fn encode(value: usize, prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(flags | value as u8);
        return;
    }
    out.push(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 128 {
        out.push((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    out.push(rest as u8);
}

/// Read an N-bit prefix integer, advancing `buf` past it.
pub fn decode(buf: &mut &[u8], prefix_bits: u8) -> Result<usize, HpackError> {
    let (&first, rest) = buf.split_first().ok_or(HpackError::UnexpectedEof)?;
    *buf = rest;

    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = first as usize & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }

    let mut shift = 0u32;
    loop {
        let (&b, rest) = buf.split_first().ok_or(HpackError::UnexpectedEof)?;
        *buf = rest;
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value += ((b & 0x7f) as usize) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
}
