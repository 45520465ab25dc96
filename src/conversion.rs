//! Response mappers: convert a decoded [`RespValue`] into a caller's typed
//! result. Built-ins cover identity, integer, boolean, string, `Vec<T>`, and
//! a flat-array-to-map conversion (used by `HGETALL`); callers can also
//! supply their own closure.

use crate::error::{ErrorKind, RedisError};
use crate::resp::RespValue;
use std::collections::HashMap;
use std::hash::Hash;

fn conversion_err(expected: &str, got: &RespValue) -> RedisError {
    RedisError::new(
        ErrorKind::Conversion,
        format!("expected {expected}, got {got:?}"),
    )
}

/// Converts a fully-decoded [`RespValue`] into `Self`, or fails with a typed
/// [`RedisError`] (usually [`ErrorKind::Conversion`]).
pub trait FromResp: Sized {
    fn from_resp(value: RespValue) -> Result<Self, RedisError>;
}

impl FromResp for RespValue {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        Ok(value)
    }
}

impl FromResp for () {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        match value {
            RespValue::Error(e) => Err(RedisError::new(ErrorKind::Server, e)),
            _ => Ok(()),
        }
    }
}

impl FromResp for i64 {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        match value {
            RespValue::Integer(i) => Ok(i),
            RespValue::BulkString(Some(b)) => std::str::from_utf8(&b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| conversion_err("integer", &RespValue::BulkString(Some(b)))),
            RespValue::Error(e) => Err(RedisError::new(ErrorKind::Server, e)),
            other => Err(conversion_err("integer", &other)),
        }
    }
}

/// Redis encodes booleans as the integers 0/1.
impl FromResp for bool {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        match &value {
            RespValue::Integer(0) => Ok(false),
            RespValue::Integer(_) => Ok(true),
            RespValue::SimpleString(s) if s == "OK" => Ok(true),
            RespValue::Error(e) => Err(RedisError::new(ErrorKind::Server, e.clone())),
            _ => Err(conversion_err("boolean", &value)),
        }
    }
}

impl FromResp for String {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        match value {
            RespValue::SimpleString(s) => Ok(s),
            RespValue::BulkString(Some(b)) => String::from_utf8(b)
                .map_err(|e| RedisError::new(ErrorKind::Conversion, e.to_string())),
            RespValue::Error(e) => Err(RedisError::new(ErrorKind::Server, e)),
            other => Err(conversion_err("string", &other)),
        }
    }
}

impl FromResp for Vec<u8> {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        match value {
            RespValue::BulkString(Some(b)) => Ok(b),
            RespValue::SimpleString(s) => Ok(s.into_bytes()),
            RespValue::Error(e) => Err(RedisError::new(ErrorKind::Server, e)),
            other => Err(conversion_err("bulk string", &other)),
        }
    }
}

/// A null bulk/array maps to `None`; anything else is delegated to `T`.
impl<T: FromResp> FromResp for Option<T> {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        if value.is_nil() {
            return Ok(None);
        }
        T::from_resp(value).map(Some)
    }
}

impl<T: FromResp> FromResp for Vec<T> {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        match value {
            RespValue::Array(Some(items)) => items.into_iter().map(T::from_resp).collect(),
            RespValue::Array(None) => Ok(Vec::new()),
            RespValue::Error(e) => Err(RedisError::new(ErrorKind::Server, e)),
            other => Err(conversion_err("array", &other)),
        }
    }
}

/// Builds a map by consuming a flat response array as alternating key/value
/// pairs (the shape `HGETALL` and friends return). An odd-length array is a
/// protocol violation, not merely a conversion mismatch, since the server is
/// contractually obligated to emit pairs.
impl<K: FromResp + Eq + Hash, V: FromResp> FromResp for HashMap<K, V> {
    fn from_resp(value: RespValue) -> Result<Self, RedisError> {
        let items = match value {
            RespValue::Array(Some(items)) => items,
            RespValue::Array(None) => Vec::new(),
            RespValue::Error(e) => return Err(RedisError::new(ErrorKind::Server, e)),
            other => return Err(conversion_err("array", &other)),
        };
        if items.len() % 2 != 0 {
            return Err(RedisError::new(
                ErrorKind::Protocol,
                format!("expected an even-length key/value array, got {} elements", items.len()),
            ));
        }
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            map.insert(K::from_resp(k)?, V::from_resp(v)?);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hgetall_shape_maps_to_hashmap() {
        let resp = RespValue::array(vec![
            RespValue::bulk(*b"k1"),
            RespValue::bulk(*b"v1"),
            RespValue::bulk(*b"k2"),
            RespValue::bulk(*b"v2"),
        ]);
        let map: HashMap<String, String> = FromResp::from_resp(resp).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("k1"), Some(&"v1".to_string()));
        assert_eq!(map.get("k2"), Some(&"v2".to_string()));
    }

    #[test]
    fn odd_length_hash_response_is_protocol_error() {
        let resp = RespValue::array(vec![RespValue::bulk(*b"k1"), RespValue::bulk(*b"v1"), RespValue::bulk(*b"k2")]);
        let err = <HashMap<String, String> as FromResp>::from_resp(resp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn null_bulk_is_none() {
        let v: Option<String> = FromResp::from_resp(RespValue::null_bulk()).unwrap();
        assert_eq!(v, None);
    }
}
