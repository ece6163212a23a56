//! Nested tag-length-value codec.
//!
//! Every element on the wire is `tag ‖ length ‖ value`. A header flag marks
//! an element *non-critical* (readers that don't recognize the tag may
//! ignore it) and another marks it *forward* (unknown elements must survive
//! a re-serialize verbatim). See `spec.md` §4.1 for the full contract; this
//! module stores every element's value as raw bytes and offers lazy typed
//! re-interpretation (`as_uint`, `as_utf8`, `as_nested`), matching "the
//! codec permits re-casting a raw value to a typed interpretation lazily."

mod template;

pub use template::{Cardinality, Decoded, Template, TemplateEntry};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("invalid TLV structure: {0}")]
    InvalidFormat(String),
    #[error("TLV length {length} exceeds remaining buffer of {remaining} bytes")]
    BufferOverflow { length: usize, remaining: usize },
    #[error("unknown critical tag 0x{0:x}")]
    UnknownCriticalTag(u16),
    #[error("non-minimal or oversized integer encoding")]
    IntegerEncoding,
}

const FLAG_NON_CRITICAL: u8 = 0x20;
const FLAG_FORWARD: u8 = 0x40;
const LONG_FORM_TAG_ESCAPE: u8 = 0x1f;
const SHORT_FORM_MAX_TAG: u16 = 0x1e;
const SHORT_FORM_MAX_LEN: usize = 0xff;

/// A single decoded TLV element. The payload is kept as raw bytes; callers
/// reinterpret it through `as_uint`/`as_utf8`/`as_nested` as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub non_critical: bool,
    pub forward: bool,
    raw: Vec<u8>,
}

impl Tlv {
    pub fn new_raw(tag: u16, non_critical: bool, forward: bool, raw: Vec<u8>) -> Self {
        Self {
            tag,
            non_critical,
            forward,
            raw,
        }
    }

    /// Build a composite element whose value is the concatenated encoding
    /// of `children`, in order.
    pub fn new_nested(tag: u16, non_critical: bool, forward: bool, children: &[Tlv]) -> Self {
        let mut raw = Vec::new();
        for child in children {
            child.encode_into(&mut raw);
        }
        Self::new_raw(tag, non_critical, forward, raw)
    }

    pub fn new_uint(tag: u16, non_critical: bool, forward: bool, value: u64) -> Self {
        Self::new_raw(tag, non_critical, forward, encode_uint(value))
    }

    pub fn new_utf8(tag: u16, non_critical: bool, forward: bool, value: &str) -> Self {
        let mut raw = value.as_bytes().to_vec();
        raw.push(0);
        Self::new_raw(tag, non_critical, forward, raw)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// Decode this element's value as a big-endian minimally-encoded
    /// unsigned integer. `0` must be the single byte `0x00`; any leading
    /// zero byte beyond that is rejected (`spec.md` §8 boundary behavior).
    pub fn as_uint(&self) -> Result<u64, TlvError> {
        decode_uint(&self.raw)
    }

    /// Decode this element's value as a NUL-terminated UTF-8 string.
    pub fn as_utf8(&self) -> Result<String, TlvError> {
        let (last, body) = self
            .raw
            .split_last()
            .ok_or_else(|| TlvError::InvalidFormat("empty utf8 element".into()))?;
        if *last != 0 {
            return Err(TlvError::InvalidFormat(
                "utf8 element missing NUL terminator".into(),
            ));
        }
        std::str::from_utf8(body)
            .map(|s| s.to_string())
            .map_err(|e| TlvError::InvalidFormat(format!("invalid utf8: {e}")))
    }

    /// Decode this element's value as a nested sequence of child TLVs.
    pub fn as_nested(&self) -> Result<Vec<Tlv>, TlvError> {
        parse_sequence(&self.raw)
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.non_critical {
            flags |= FLAG_NON_CRITICAL;
        }
        if self.forward {
            flags |= FLAG_FORWARD;
        }
        let mut out = Vec::new();
        if self.tag <= SHORT_FORM_MAX_TAG && self.raw.len() <= SHORT_FORM_MAX_LEN {
            out.push(flags | (self.tag as u8));
            out.push(self.raw.len() as u8);
        } else {
            out.push(flags | LONG_FORM_TAG_ESCAPE);
            out.extend_from_slice(&self.tag.to_be_bytes());
            out.extend_from_slice(&(self.raw.len() as u16).to_be_bytes());
        }
        out
    }

    /// Serialize header + value, appending to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header_bytes());
        out.extend_from_slice(&self.raw);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

fn decode_uint(bytes: &[u8]) -> Result<u64, TlvError> {
    if bytes.is_empty() {
        return Err(TlvError::InvalidFormat("empty integer element".into()));
    }
    if bytes.len() > 8 {
        return Err(TlvError::IntegerEncoding);
    }
    if bytes.len() > 1 && bytes[0] == 0 {
        return Err(TlvError::IntegerEncoding);
    }
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

fn encode_uint(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let bytes = value.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap();
    bytes[first_nonzero..].to_vec()
}

/// Parse a single TLV element from the front of `bytes`, returning the
/// element and the number of bytes it consumed.
pub fn parse_one(bytes: &[u8]) -> Result<(Tlv, usize), TlvError> {
    if bytes.is_empty() {
        return Err(TlvError::InvalidFormat("no bytes to parse".into()));
    }
    let first = bytes[0];
    let non_critical = first & FLAG_NON_CRITICAL != 0;
    let forward = first & FLAG_FORWARD != 0;
    let tag_field = first & 0x1f;

    if tag_field == LONG_FORM_TAG_ESCAPE {
        if bytes.len() < 5 {
            return Err(TlvError::InvalidFormat(
                "truncated long-form TLV header".into(),
            ));
        }
        let tag = u16::from_be_bytes([bytes[1], bytes[2]]);
        let length = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        let header_len = 5;
        let remaining = bytes.len() - header_len;
        if length > remaining {
            return Err(TlvError::BufferOverflow { length, remaining });
        }
        let raw = bytes[header_len..header_len + length].to_vec();
        Ok((Tlv::new_raw(tag, non_critical, forward, raw), header_len + length))
    } else {
        if bytes.len() < 2 {
            return Err(TlvError::InvalidFormat(
                "truncated short-form TLV header".into(),
            ));
        }
        let tag = tag_field as u16;
        let length = bytes[1] as usize;
        let header_len = 2;
        let remaining = bytes.len() - header_len;
        if length > remaining {
            return Err(TlvError::BufferOverflow { length, remaining });
        }
        let raw = bytes[header_len..header_len + length].to_vec();
        Ok((Tlv::new_raw(tag, non_critical, forward, raw), header_len + length))
    }
}

/// Parse a full sequence of consecutive TLV elements, consuming every byte
/// of `bytes` exactly once.
pub fn parse_sequence(bytes: &[u8]) -> Result<Vec<Tlv>, TlvError> {
    let mut elements = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (tlv, consumed) = parse_one(&bytes[offset..])?;
        offset += consumed;
        elements.push(tlv);
    }
    Ok(elements)
}

/// Serialize a full sequence of TLV elements.
pub fn encode_sequence(elements: &[Tlv]) -> Vec<u8> {
    let mut out = Vec::new();
    for e in elements {
        e.encode_into(&mut out);
    }
    out
}
