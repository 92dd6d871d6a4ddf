//! Client side of the disguise handshakes, for connectivity checks and tests.

use std::sync::Arc;
use std::time::SystemTime;

use rand::RngCore;
use tokio::io::AsyncWriteExt;

use crate::async_stream::AsyncStream;
use crate::buffer_pool::BufferPool;
use crate::faketls::{
    FakeTlsStream, RANDOM_LEN, RANDOM_OFFSET, build_client_hello, read_welcome_packet,
};
use crate::obfuscated::{ObfuscatedStream, Obfuscator};
use crate::proxy::ProxyMode;
use crate::secret::Secret;

/// Performs the client handshake for `mode` over `stream` and requests `dc`.
pub async fn connect(
    mut stream: Box<dyn AsyncStream>,
    secret: &Secret,
    mode: ProxyMode,
    dc: i32,
    pool: &Arc<BufferPool>,
) -> std::io::Result<ObfuscatedStream> {
    let stream: Box<dyn AsyncStream> = match mode {
        ProxyMode::Obfuscated => stream,
        ProxyMode::FakeTls => {
            let mut session_id = [0u8; 32];
            rand::rng().fill_bytes(&mut session_id);
            let hello = build_client_hello(secret, &secret.host, SystemTime::now(), &session_id)?;

            stream.write_all(&hello).await?;
            stream.flush().await?;

            let mut client_random = [0u8; RANDOM_LEN];
            client_random.copy_from_slice(&hello[RANDOM_OFFSET..RANDOM_OFFSET + RANDOM_LEN]);
            read_welcome_packet(&mut stream, secret, &client_random, pool).await?;

            Box::new(FakeTlsStream::new(stream))
        }
    };

    Obfuscator::with_secret(secret).originate(stream, dc).await
}
