//! Incremental RESP encode/decode, wired into a [`tokio_util::codec`] so it
//! plugs straight into a framed transport: the decoder never needs lookahead
//! beyond a value's declared length, and a partial value leaves the buffer
//! untouched until more bytes arrive.

use super::value::RespValue;
use crate::error::{ErrorKind, RedisError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Arrays nest at most this deep; guards against adversarial `*999999999\r\n*...`
/// framing from ever recursing unbounded.
pub const MAX_DEPTH: usize = 512;

fn encode_into(value: &RespValue, out: &mut Vec<u8>) {
    match value {
        RespValue::SimpleString(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            out.push(b'-');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(i) => {
            out.push(b':');
            let mut buf = itoa::Buffer::new();
            out.extend_from_slice(buf.format(*i).as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
        RespValue::BulkString(Some(bytes)) => {
            out.push(b'$');
            let mut buf = itoa::Buffer::new();
            out.extend_from_slice(buf.format(bytes.len()).as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        RespValue::Array(Some(items)) => {
            out.push(b'*');
            let mut buf = itoa::Buffer::new();
            out.extend_from_slice(buf.format(items.len()).as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_into(item, out);
            }
        }
    }
}

/// Serialize a single value; the top-level entry point for `Command::to_bytes`.
pub fn encode(value: &RespValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

/// Outcome of attempting to decode one value off the front of a buffer.
pub enum Decoded {
    /// A full value was parsed, consuming `consumed` bytes from the front.
    Value { value: RespValue, consumed: usize },
    /// Not enough bytes yet; the buffer was not touched.
    Incomplete,
}

fn protocol_err(msg: impl Into<String>) -> RedisError {
    RedisError::new(ErrorKind::Protocol, msg.into())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse one RESP value from the front of `buf`. On success, `consumed` is
/// exactly the number of bytes that value occupied — the caller advances the
/// buffer by that amount. On [`Decoded::Incomplete`], `buf` is left alone so
/// the caller can append more bytes and retry.
pub fn decode(buf: &[u8]) -> Result<Decoded, RedisError> {
    decode_at_depth(buf, 0)
}

fn decode_at_depth(buf: &[u8], depth: usize) -> Result<Decoded, RedisError> {
    if depth > MAX_DEPTH {
        return Err(protocol_err("array nesting exceeds maximum depth"));
    }
    let Some(&prefix) = buf.first() else {
        return Ok(Decoded::Incomplete);
    };
    let Some(line_end) = find_crlf(&buf[1..]) else {
        return Ok(Decoded::Incomplete);
    };
    let line_end = 1 + line_end;
    let line = &buf[1..line_end];

    match prefix {
        b'+' | b'-' | b':' => {
            let text = std::str::from_utf8(line)
                .map_err(|_| protocol_err("non-UTF8 simple string/error/integer line"))?;
            let consumed = line_end + 2;
            let value = match prefix {
                b'+' => RespValue::SimpleString(text.to_string()),
                b'-' => RespValue::Error(text.to_string()),
                b':' => {
                    let i: i64 = text
                        .parse()
                        .map_err(|_| protocol_err("non-numeric integer"))?;
                    RespValue::Integer(i)
                }
                _ => unreachable!(),
            };
            Ok(Decoded::Value { value, consumed })
        }
        b'$' => {
            let len: i64 = std::str::from_utf8(line)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| protocol_err("non-numeric bulk string length"))?;
            if len == -1 {
                return Ok(Decoded::Value {
                    value: RespValue::BulkString(None),
                    consumed: line_end + 2,
                });
            }
            if len < -1 {
                return Err(protocol_err("negative bulk string length"));
            }
            let len = len as usize;
            let body_start = line_end + 2;
            let body_end = body_start + len;
            let total = body_end + 2;
            if buf.len() < total {
                return Ok(Decoded::Incomplete);
            }
            if &buf[body_end..total] != b"\r\n" {
                return Err(protocol_err("bulk string body missing trailing CRLF"));
            }
            let bytes = buf[body_start..body_end].to_vec();
            Ok(Decoded::Value {
                value: RespValue::BulkString(Some(bytes)),
                consumed: total,
            })
        }
        b'*' => {
            let len: i64 = std::str::from_utf8(line)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| protocol_err("non-numeric array length"))?;
            if len == -1 {
                return Ok(Decoded::Value {
                    value: RespValue::Array(None),
                    consumed: line_end + 2,
                });
            }
            if len < -1 {
                return Err(protocol_err("negative array length"));
            }
            let count = len as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            let mut offset = line_end + 2;
            for _ in 0..count {
                match decode_at_depth(&buf[offset..], depth + 1)? {
                    Decoded::Incomplete => return Ok(Decoded::Incomplete),
                    Decoded::Value { value, consumed } => {
                        items.push(value);
                        offset += consumed;
                    }
                }
            }
            Ok(Decoded::Value {
                value: RespValue::Array(Some(items)),
                consumed: offset,
            })
        }
        other => Err(protocol_err(format!("unknown RESP type byte {other:#x}"))),
    }
}

/// Adapts [`decode`]/[`encode`] to [`tokio_util::codec::Framed`].
#[derive(Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = RedisError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, RedisError> {
        match decode(src)? {
            Decoded::Incomplete => Ok(None),
            Decoded::Value { value, consumed } => {
                src.advance(consumed);
                Ok(Some(value))
            }
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = RedisError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), RedisError> {
        dst.put_slice(&encode(&item));
        Ok(())
    }
}
