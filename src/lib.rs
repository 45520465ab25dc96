//! RESP protocol codec, a single pipelined/pub-sub connection, and a
//! round-robin connection pool for Redis-compatible servers.

pub mod command;
pub mod commands;
pub mod connection;
pub mod connection_info;
pub mod conversion;
pub mod error;
pub mod pool;
pub mod resp;
pub mod state_machine;
pub mod subscription;
pub mod transport;

pub use command::{cmd, Cmd, Command};
pub use connection::Connection;
pub use connection_info::ConnectionInfo;
pub use conversion::FromResp;
pub use error::{ErrorKind, RedisError, RedisResult};
pub use pool::{CapPolicy, Lease, Pool, PoolConfig};
pub use resp::RespValue;
