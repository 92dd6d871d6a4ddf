use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};
use aws_lc_rs::digest;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::handshake_frame::{CONNECTION_TAG, FRAME_LEN, HandshakeFrame};
use super::obfuscated_stream::ObfuscatedStream;
use crate::async_stream::AsyncStream;
use crate::error::ProtocolError;
use crate::secret::Secret;

pub type AesCtr = ctr::Ctr128BE<aes::Aes256>;

pub struct CipherPair {
    pub encryptor: AesCtr,
    pub decryptor: AesCtr,
}

/// Derives stream ciphers from 64-byte handshake frames.
///
/// With a secret, the AES key is `SHA256(frame key || secret key)`, so an
/// observer of the wire frame cannot derive it. Without one (the data-center
/// side), the frame key is used directly.
#[derive(Clone)]
pub struct Obfuscator {
    secret: Option<[u8; 32]>,
}

impl Obfuscator {
    pub fn with_secret(secret: &Secret) -> Self {
        Self {
            secret: Some(secret.key),
        }
    }

    pub fn plain() -> Self {
        Self { secret: None }
    }

    pub fn derive_cipher(&self, frame: &HandshakeFrame) -> AesCtr {
        match self.secret {
            Some(ref secret) => {
                let mut context = digest::Context::new(&digest::SHA256);
                context.update(frame.key());
                context.update(secret);
                let key = context.finish();
                AesCtr::new(
                    GenericArray::from_slice(key.as_ref()),
                    GenericArray::from_slice(frame.iv()),
                )
            }
            None => AesCtr::new(
                GenericArray::from_slice(frame.key()),
                GenericArray::from_slice(frame.iv()),
            ),
        }
    }

    /// Accept side: decrypts a frame received from a peer in place, validates
    /// its connection tag and returns the requested data-center.
    pub fn read_frame(
        &self,
        mut frame: HandshakeFrame,
    ) -> Result<(i32, CipherPair), ProtocolError> {
        let mut decryptor = self.derive_cipher(&frame);
        let encryptor = self.derive_cipher(&frame.reversed());

        decryptor.apply_keystream(frame.as_bytes_mut());

        if !bool::from(frame.connection_tag().ct_eq(&CONNECTION_TAG)) {
            return Err(ProtocolError::UnsupportedConnectionType);
        }

        Ok((
            frame.dc(),
            CipherPair {
                encryptor,
                decryptor,
            },
        ))
    }

    /// Originate side: builds the wire frame requesting `dc`. Key and IV stay
    /// in plaintext since the peer derives its ciphers from them; the tag and
    /// data-center tail goes out encrypted.
    pub fn generate_frame(&self, dc: i16) -> ([u8; FRAME_LEN], CipherPair) {
        let mut frame = HandshakeFrame::generate();
        frame.set_connection_tag(&CONNECTION_TAG);
        frame.set_dc(dc);

        let mut encryptor = self.derive_cipher(&frame);
        let decryptor = self.derive_cipher(&frame.reversed());

        let mut encrypted = *frame.as_bytes();
        encryptor.apply_keystream(&mut encrypted);

        let mut wire = *frame.as_bytes();
        wire[56..].copy_from_slice(&encrypted[56..]);

        (
            wire,
            CipherPair {
                encryptor,
                decryptor,
            },
        )
    }

    pub async fn accept(
        &self,
        mut stream: Box<dyn AsyncStream>,
    ) -> std::io::Result<(i32, ObfuscatedStream)> {
        let mut data = [0u8; FRAME_LEN];
        stream.read_exact(&mut data).await?;

        let (dc, ciphers) = self.read_frame(HandshakeFrame::from_bytes(data))?;
        Ok((
            dc,
            ObfuscatedStream::new(stream, ciphers.encryptor, ciphers.decryptor),
        ))
    }

    pub async fn originate(
        &self,
        mut stream: Box<dyn AsyncStream>,
        dc: i32,
    ) -> std::io::Result<ObfuscatedStream> {
        let dc = i16::try_from(dc).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("data-center id {dc} does not fit the handshake frame"),
            )
        })?;

        let (wire, ciphers) = self.generate_frame(dc);
        stream.write_all(&wire).await?;
        stream.flush().await?;

        Ok(ObfuscatedStream::new(
            stream,
            ciphers.encryptor,
            ciphers.decryptor,
        ))
    }
}
