use bytes::Bytes;

use crate::request::RequestId;
use crate::value::WireValue;

const ENVELOPE_VERSION: u8 = 1;
const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const KIND_MASK: u8 = 0b0001_1111;

const KIND_REQUEST: u8 = 0;
const KIND_RESPONSE: u8 = 1;
const KIND_PUSH: u8 = 2;

const TAG_STR: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_LIST: u8 = 0x05;
const TAG_MAP: u8 = 0x06;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown envelope kind: {0}")]
    UnknownEnvelopeKind(u8),
    #[error("unknown value tag: {0}")]
    UnknownTag(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid utf-8 in string value")]
    InvalidUtf8,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("trailing bytes after value")]
    TrailingBytes,
}

/// Message kind carried in the streaming-channel envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Response,
    Push,
}

impl EnvelopeKind {
    fn as_u8(self) -> u8 {
        match self {
            EnvelopeKind::Request => KIND_REQUEST,
            EnvelopeKind::Response => KIND_RESPONSE,
            EnvelopeKind::Push => KIND_PUSH,
        }
    }

    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            KIND_REQUEST => Ok(EnvelopeKind::Request),
            KIND_RESPONSE => Ok(EnvelopeKind::Response),
            KIND_PUSH => Ok(EnvelopeKind::Push),
            other => Err(WireError::UnknownEnvelopeKind(other)),
        }
    }
}

/// A decoded streaming-channel frame: fixed header plus opaque payload.
///
/// `correlation_id` is zero for unsolicited pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub correlation_id: RequestId,
    pub payload: Bytes,
}

impl Envelope {
    pub fn correlation(&self) -> Option<RequestId> {
        if self.correlation_id == 0 {
            None
        } else {
            Some(self.correlation_id)
        }
    }
}

pub fn encode_envelope(kind: EnvelopeKind, correlation_id: RequestId, payload: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(payload.len() + 6);
    write_header(&mut buf, kind.as_u8());
    write_var_u64(&mut buf, correlation_id as u64);
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = EnvelopeKind::from_u8(read_header(&mut cursor)?)?;
    let correlation = cursor.read_var_u64()?;
    if correlation > RequestId::MAX as u64 {
        return Err(WireError::InvalidData("correlation id overflow"));
    }
    let payload = Bytes::copy_from_slice(cursor.rest());
    Ok(Envelope {
        kind,
        correlation_id: correlation as RequestId,
        payload,
    })
}

pub fn encode_value(value: &WireValue) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    write_value(&mut buf, value);
    buf
}

/// Decode a single value, requiring the input to be fully consumed.
pub fn decode_value(bytes: &[u8]) -> Result<WireValue, WireError> {
    let mut cursor = Cursor::new(bytes);
    let value = read_value(&mut cursor)?;
    if cursor.remaining() > 0 {
        return Err(WireError::TrailingBytes);
    }
    Ok(value)
}

/// Decode a response payload into its item list.
///
/// Payloads are normally a list of items; a bare value is treated as a
/// single-item payload so partial server implementations still decode.
pub fn decode_items(bytes: &[u8]) -> Result<Vec<WireValue>, WireError> {
    match decode_value(bytes)? {
        WireValue::List(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

fn write_value(buf: &mut Vec<u8>, value: &WireValue) {
    match value {
        WireValue::Str(text) => {
            buf.push(TAG_STR);
            write_var_u64(buf, text.len() as u64);
            buf.extend_from_slice(text.as_bytes());
        }
        WireValue::Int(number) => {
            buf.push(TAG_INT);
            write_var_u64(buf, zigzag_encode(*number));
        }
        WireValue::Bool(flag) => {
            buf.push(TAG_BOOL);
            buf.push(*flag as u8);
        }
        WireValue::Bytes(data) => {
            buf.push(TAG_BYTES);
            write_var_u64(buf, data.len() as u64);
            buf.extend_from_slice(data);
        }
        WireValue::List(items) => {
            buf.push(TAG_LIST);
            write_var_u64(buf, items.len() as u64);
            for item in items {
                write_value(buf, item);
            }
        }
        WireValue::Map(entries) => {
            buf.push(TAG_MAP);
            write_var_u64(buf, entries.len() as u64);
            for (key, item) in entries {
                write_var_u64(buf, key.len() as u64);
                buf.extend_from_slice(key.as_bytes());
                write_value(buf, item);
            }
        }
    }
}

fn read_value(cursor: &mut Cursor<'_>) -> Result<WireValue, WireError> {
    match cursor.read_u8()? {
        TAG_STR => Ok(WireValue::Str(read_string(cursor)?)),
        TAG_INT => Ok(WireValue::Int(zigzag_decode(cursor.read_var_u64()?))),
        TAG_BOOL => match cursor.read_u8()? {
            0 => Ok(WireValue::Bool(false)),
            1 => Ok(WireValue::Bool(true)),
            _ => Err(WireError::InvalidData("invalid boolean")),
        },
        TAG_BYTES => {
            let len = cursor.read_len()?;
            Ok(WireValue::Bytes(Bytes::copy_from_slice(
                cursor.read_bytes(len)?,
            )))
        }
        TAG_LIST => {
            let count = cursor.read_len()?;
            let mut items = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                items.push(read_value(cursor)?);
            }
            Ok(WireValue::List(items))
        }
        TAG_MAP => {
            let count = cursor.read_len()?;
            let mut entries = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                let key = read_string(cursor)?;
                let value = read_value(cursor)?;
                entries.push((key, value));
            }
            Ok(WireValue::Map(entries))
        }
        other => Err(WireError::UnknownTag(other)),
    }
}

fn read_string(cursor: &mut Cursor<'_>) -> Result<String, WireError> {
    let len = cursor.read_len()?;
    let raw = cursor.read_bytes(len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = ENVELOPE_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & KIND_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (ENVELOPE_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::UnsupportedVersion(version));
    }
    Ok(byte & KIND_MASK)
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_len(&mut self) -> Result<usize, WireError> {
        let value = self.read_var_u64()?;
        // Lengths are bounded by what could actually be on the wire.
        if value > self.bytes.len() as u64 {
            return Err(WireError::UnexpectedEof);
        }
        Ok(value as usize)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }
}
