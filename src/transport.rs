//! The TCP transport details (socket creation, TLS, keepalive) are an
//! injectable collaborator: anything that yields a framed byte stream works.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Anything `Connection` can speak RESP over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens a plain TCP connection to `addr` (host:port), disabling Nagle's
/// algorithm the way a latency-sensitive request/response protocol wants.
pub async fn connect_tcp(addr: &str) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
