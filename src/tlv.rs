//! BER-TLV helpers over flat buffers.
//!
//! Key material and curve parameters arrive as a flat sequence of
//! single-byte-tag TLV entries inside a fixed buffer, so the helpers here
//! work with positions into a slice instead of building a parse tree:
//! `find_tag` / `decode_length` / `length_field_width` / `is_well_formed`,
//! plus the encoding side used to build response envelopes.

use thiserror::Error;

/// Errors from TLV decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("tag {0:#04X} not found")]
    TagNotFound(u8),

    #[error("truncated length field")]
    TruncatedLength,

    #[error("unsupported length encoding")]
    InvalidLength,

    #[error("value extends past end of buffer")]
    TruncatedValue,
}

/// Find a single-byte tag in a flat TLV sequence.
///
/// Returns the position of the tag byte. Entries are skipped whole; nested
/// structures are not descended into.
pub fn find_tag(buf: &[u8], tag: u8) -> Option<usize> {
    let mut pos = 0;
    while pos < buf.len() {
        let cur = buf[pos];
        let len = decode_length(buf, pos + 1).ok()?;
        if cur == tag {
            return Some(pos);
        }
        pos += 1 + length_field_width(len) + len;
    }
    None
}

/// Decode a BER length field at `offset`.
///
/// Short form plus the one- and two-byte long forms (0x81, 0x82) are
/// supported, which covers everything a 510-byte scratch buffer can hold.
pub fn decode_length(buf: &[u8], offset: usize) -> Result<usize, TlvError> {
    let first = *buf.get(offset).ok_or(TlvError::TruncatedLength)?;
    match first {
        0x00..=0x7F => Ok(first as usize),
        0x81 => buf
            .get(offset + 1)
            .map(|b| *b as usize)
            .ok_or(TlvError::TruncatedLength),
        0x82 => {
            if offset + 2 >= buf.len() {
                return Err(TlvError::TruncatedLength);
            }
            Ok(((buf[offset + 1] as usize) << 8) | buf[offset + 2] as usize)
        }
        _ => Err(TlvError::InvalidLength),
    }
}

/// Number of bytes the length field for `length` occupies.
pub fn length_field_width(length: usize) -> usize {
    if length < 0x80 {
        1
    } else if length < 0x100 {
        2
    } else {
        3
    }
}

/// Check that `buf` is a well-formed flat TLV sequence: tags and lengths
/// chain exactly to the end of the slice.
pub fn is_well_formed(buf: &[u8]) -> bool {
    let mut pos = 0;
    while pos < buf.len() {
        if pos + 1 >= buf.len() {
            return false;
        }
        let len = match decode_length(buf, pos + 1) {
            Ok(len) => len,
            Err(_) => return false,
        };
        pos += 1 + length_field_width(len) + len;
    }
    pos == buf.len()
}

/// Locate `tag` and return its value slice.
pub fn read_value(buf: &[u8], tag: u8) -> Result<&[u8], TlvError> {
    let pos = find_tag(buf, tag).ok_or(TlvError::TagNotFound(tag))?;
    let len = decode_length(buf, pos + 1)?;
    let start = pos + 1 + length_field_width(len);
    buf.get(start..start + len).ok_or(TlvError::TruncatedValue)
}

/// Encode a BER length field.
pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        vec![length as u8]
    } else if length < 0x100 {
        vec![0x81, length as u8]
    } else {
        vec![0x82, (length >> 8) as u8, length as u8]
    }
}

/// Encode one single-byte-tag TLV entry.
pub fn encode(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + length_field_width(value.len()) + value.len());
    out.push(tag);
    out.extend(encode_length(value.len()));
    out.extend_from_slice(value);
    out
}
