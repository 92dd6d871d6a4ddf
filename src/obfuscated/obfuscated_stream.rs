use std::pin::Pin;
use std::task::{Context, Poll};

use aes::cipher::StreamCipher;
use futures::ready;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::obfuscator::AesCtr;
use crate::async_stream::AsyncStream;

// upper bound of plaintext accepted per poll_write call.
const MAX_WRITE_CHUNK: usize = 64 * 1024;

/// AES-CTR wrapper: decrypts everything read from the inner stream, encrypts
/// everything written to it.
///
/// The keystream advances as soon as data is encrypted, so written data is
/// encrypted exactly once into `write_buf` and drained from there; a `Pending`
/// inner write never causes re-encryption.
pub struct ObfuscatedStream {
    stream: Box<dyn AsyncStream>,
    encryptor: AesCtr,
    decryptor: AesCtr,
    write_buf: Vec<u8>,
    write_pos: usize,
}

impl ObfuscatedStream {
    pub fn new(stream: Box<dyn AsyncStream>, encryptor: AesCtr, decryptor: AesCtr) -> Self {
        Self {
            stream,
            encryptor,
            decryptor,
            write_buf: Vec::with_capacity(16384),
            write_pos: 0,
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while self.write_pos < self.write_buf.len() {
            let n = ready!(
                Pin::new(&mut self.stream).poll_write(cx, &self.write_buf[self.write_pos..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write pending obfuscated data",
                )));
            }
            self.write_pos += n;
        }
        self.write_buf.clear();
        self.write_pos = 0;
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for ObfuscatedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let filled_before = buf.filled().len();
        ready!(Pin::new(&mut this.stream).poll_read(cx, buf))?;
        this.decryptor
            .apply_keystream(&mut buf.filled_mut()[filled_before..]);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ObfuscatedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        let len = buf.len().min(MAX_WRITE_CHUNK);
        this.write_buf.extend_from_slice(&buf[..len]);
        this.encryptor.apply_keystream(&mut this.write_buf);

        // Opportunistic write; whatever remains is drained on the next call.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(len))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}
