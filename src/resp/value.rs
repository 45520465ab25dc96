//! The RESP data model: a tagged tree with explicit null bulk strings and
//! arrays (distinct from empty ones).

use std::fmt;

/// One parsed or to-be-serialized RESP value.
#[derive(Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is the RESP `$-1\r\n` null bulk string, distinct from `Some(vec![])`.
    BulkString(Option<Vec<u8>>),
    /// `None` is the RESP `*-1\r\n` null array, distinct from `Some(vec![])`.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(bytes.into()))
    }

    pub fn null_bulk() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: impl Into<Vec<RespValue>>) -> Self {
        RespValue::Array(Some(items.into()))
    }

    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }

    /// The head element of a pub/sub push array, e.g. `"message"`/`"pmessage"`.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(b)) => Some(b),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl fmt::Debug for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "SimpleString({s:?})"),
            RespValue::Error(s) => write!(f, "Error({s:?})"),
            RespValue::Integer(i) => write!(f, "Integer({i})"),
            RespValue::BulkString(Some(b)) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "BulkString({s:?})"),
                Err(_) => write!(f, "BulkString({b:?})"),
            },
            RespValue::BulkString(None) => write!(f, "BulkString(nil)"),
            RespValue::Array(Some(items)) => f.debug_list().entries(items.iter()).finish(),
            RespValue::Array(None) => write!(f, "Array(nil)"),
        }
    }
}
