//! A [`Command`] pairs a keyword, an argument list, and a typed response
//! mapper, so the pipeline loop never needs to know result types: it just
//! hands the raw [`RespValue`] back to whichever mapper was captured at
//! construction time (see the design note on dynamic mapper closures).

use crate::conversion::FromResp;
use crate::error::RedisError;
use crate::resp::RespValue;

/// Anything that can contribute one or more BulkString arguments to a
/// [`Cmd`]. Mirrors the teacher's `ToRedisArgs`, trimmed to what this crate's
/// command subset needs.
pub trait ToRespArg {
    fn write_args(&self, out: &mut Vec<Vec<u8>>);
}

impl ToRespArg for &str {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToRespArg for String {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_bytes().to_vec());
    }
}

impl ToRespArg for &[u8] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.to_vec());
    }
}

impl ToRespArg for Vec<u8> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.clone());
    }
}

macro_rules! impl_to_resp_arg_display {
    ($($ty:ty),+) => {
        $(impl ToRespArg for $ty {
            fn write_args(&self, out: &mut Vec<Vec<u8>>) {
                out.push(self.to_string().into_bytes());
            }
        })+
    };
}
impl_to_resp_arg_display!(i64, u64, i32, u32, isize, usize, f64);

impl<T: ToRespArg> ToRespArg for &T {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        (*self).write_args(out)
    }
}

impl<T: ToRespArg> ToRespArg for [T] {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        for item in self {
            item.write_args(out);
        }
    }
}

impl<T: ToRespArg> ToRespArg for Vec<T> {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        self.as_slice().write_args(out)
    }
}

/// An untyped keyword + argument list, built incrementally. Frozen into a
/// [`Command`] by attaching a response mapper.
#[derive(Clone, Debug)]
pub struct Cmd {
    keyword: &'static str,
    args: Vec<Vec<u8>>,
}

/// Begin building a command with the given (uppercase) keyword.
pub fn cmd(keyword: &'static str) -> Cmd {
    Cmd {
        keyword,
        args: Vec::new(),
    }
}

impl Cmd {
    pub fn arg(mut self, arg: impl ToRespArg) -> Self {
        arg.write_args(&mut self.args);
        self
    }

    pub fn keyword(&self) -> &'static str {
        self.keyword
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Render as the Array-of-BulkStrings RESP requires for every command.
    pub fn to_resp_array(&self) -> RespValue {
        let mut items = Vec::with_capacity(1 + self.args.len());
        items.push(RespValue::bulk(self.keyword.as_bytes()));
        for arg in &self.args {
            items.push(RespValue::bulk(arg.clone()));
        }
        RespValue::array(items)
    }

    /// Attach a mapper that uses `T`'s [`FromResp`] impl.
    pub fn into_command<T: FromResp + Send + 'static>(self) -> Command<T> {
        self.into_command_with(T::from_resp)
    }

    /// Attach a caller-provided mapper.
    pub fn into_command_with<T: Send + 'static>(
        self,
        mapper: impl FnOnce(RespValue) -> Result<T, RedisError> + Send + 'static,
    ) -> Command<T> {
        Command {
            cmd: self,
            mapper: Box::new(mapper),
        }
    }
}

/// An immutable command plus the mapper that will convert its eventual
/// response. `T` is erased from the pipeline's in-flight queue by boxing the
/// mapper as `dyn FnOnce`; the caller's `Future`/oneshot adapter re-applies
/// the concrete type on the other end.
pub struct Command<T> {
    cmd: Cmd,
    mapper: Box<dyn FnOnce(RespValue) -> Result<T, RedisError> + Send>,
}

impl<T> Command<T> {
    pub fn keyword(&self) -> &'static str {
        self.cmd.keyword()
    }

    pub fn to_resp_array(&self) -> RespValue {
        self.cmd.to_resp_array()
    }

    pub fn encode(&self) -> Vec<u8> {
        crate::resp::encode(&self.cmd.to_resp_array())
    }

    /// Consume the command, applying its mapper to a decoded response.
    pub fn resolve(self, value: RespValue) -> Result<T, RedisError> {
        (self.mapper)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::RespValue;

    #[test]
    fn zadd_option_encoding() {
        // zadd(key, [(v, s)], NX, CH)
        let command = cmd("ZADD")
            .arg("key")
            .arg("NX")
            .arg("CH")
            .arg(3.0)
            .arg("v")
            .into_command::<i64>();
        let bytes = command.encode();
        let expected =
            b"*6\r\n$4\r\nZADD\r\n$3\r\nkey\r\n$2\r\nNX\r\n$2\r\nCH\r\n$1\r\n3\r\n$1\r\nv\r\n";
        assert_eq!(bytes, expected);
    }

    #[test]
    fn custom_mapper_closure() {
        let command = cmd("PING").into_command_with(|v| match v {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        });
        assert!(command.resolve(RespValue::SimpleString("PONG".into())).unwrap());
    }
}
