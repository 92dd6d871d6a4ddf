use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream: a raw socket, an in-memory pipe, or one of the
/// disguise layers wrapping another stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}
