//! RESP (REdis Serialization Protocol) wire format: data model and codec.

mod codec;
mod value;

pub use codec::{decode, encode, Decoded, RespCodec, MAX_DEPTH};
pub use value::RespValue;
