//! The server's answer to an authenticated ClientHello: ServerHello,
//! ChangeCipherSpec and a random ApplicationData record, bound to the client
//! random with an HMAC placed in the ServerHello random field.

use std::sync::Arc;

use aws_lc_rs::agreement;
use aws_lc_rs::hmac;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use rand::{Rng, RngCore};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::client_hello::{ClientHello, RANDOM_LEN, RANDOM_OFFSET};
use super::record::{RECORD_HEADER_LEN, RecordHeader, RecordType, TlsRecord, VERSION_TLS12};
use crate::buffer_pool::BufferPool;
use crate::error::ProtocolError;
use crate::secret::Secret;

const HANDSHAKE_TYPE_SERVER_HELLO: u8 = 0x02;
const CHANGE_CIPHER_SPEC_PAYLOAD: u8 = 0x01;

const MIN_PADDING_LEN: usize = 1024;
const MAX_PADDING_LEN: usize = 4096;

// compression method, extensions length, supported_versions (TLS 1.3),
// key_share header for a single x25519 entry.
const SERVER_HELLO_SUFFIX: [u8; 17] = [
    0x00, 0x00, 0x2e, 0x00, 0x2b, 0x00, 0x02, 0x03, 0x04, 0x00, 0x33, 0x00, 0x24, 0x00, 0x1d,
    0x00, 0x20,
];

fn x25519_public_key() -> std::io::Result<[u8; 32]> {
    let mut private_key_bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut private_key_bytes)
        .map_err(|_| std::io::Error::other("system random generator failed"))?;

    let private_key =
        agreement::PrivateKey::from_private_key(&agreement::X25519, &private_key_bytes)
            .map_err(|_| std::io::Error::other("failed to create x25519 key"))?;
    let public_key = private_key
        .compute_public_key()
        .map_err(|_| std::io::Error::other("failed to compute x25519 public key"))?;

    let mut out = [0u8; 32];
    out.copy_from_slice(public_key.as_ref());
    Ok(out)
}

fn packet_digest(key: &[u8], client_random: &[u8; RANDOM_LEN], packet: &[u8]) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut context = hmac::Context::with_key(&key);
    context.update(client_random);
    context.update(packet);
    context.sign()
}

pub fn build_welcome_packet(secret: &Secret, hello: &ClientHello) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(128);
    body.extend_from_slice(&VERSION_TLS12.to_be_bytes());
    body.extend_from_slice(&[0u8; RANDOM_LEN]);
    body.push(hello.session_id.len() as u8);
    body.extend_from_slice(&hello.session_id);
    body.extend_from_slice(&hello.cipher_suite.to_be_bytes());
    body.extend_from_slice(&SERVER_HELLO_SUFFIX);
    body.extend_from_slice(&x25519_public_key()?);

    let mut rng = rand::rng();
    let padding_len = rng.random_range(MIN_PADDING_LEN..=MAX_PADDING_LEN);

    let mut packet = Vec::with_capacity(3 * RECORD_HEADER_LEN + 4 + body.len() + 1 + padding_len);

    RecordHeader::write(RecordType::Handshake, VERSION_TLS12, body.len() + 4, &mut packet);
    packet.push(HANDSHAKE_TYPE_SERVER_HELLO);
    packet.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    packet.extend_from_slice(&body);

    RecordHeader::write(RecordType::ChangeCipherSpec, VERSION_TLS12, 1, &mut packet);
    packet.push(CHANGE_CIPHER_SPEC_PAYLOAD);

    RecordHeader::write(RecordType::ApplicationData, VERSION_TLS12, padding_len, &mut packet);
    let padding_start = packet.len();
    packet.resize(padding_start + padding_len, 0);
    rng.fill_bytes(&mut packet[padding_start..]);

    let digest = packet_digest(&secret.key, &hello.random, &packet);
    packet[RANDOM_OFFSET..RANDOM_OFFSET + RANDOM_LEN].copy_from_slice(digest.as_ref());

    Ok(packet)
}

pub async fn send_welcome_packet<W>(
    writer: &mut W,
    secret: &Secret,
    hello: &ClientHello,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let packet = build_welcome_packet(secret, hello)?;
    writer.write_all(&packet).await?;
    writer.flush().await
}

/// Client side: reads the three welcome records and checks that the server
/// knows the secret.
pub async fn read_welcome_packet<R>(
    reader: &mut R,
    secret: &Secret,
    client_random: &[u8; RANDOM_LEN],
    pool: &Arc<BufferPool>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut packet = Vec::with_capacity(8192);
    for expected in [
        RecordType::Handshake,
        RecordType::ChangeCipherSpec,
        RecordType::ApplicationData,
    ] {
        let record = TlsRecord::read(reader, pool).await?;
        if record.record_type != expected {
            return Err(ProtocolError::UnsupportedRecordType(record.record_type as u8).into());
        }
        record.dump(&mut packet)?;
    }

    if packet.len() < RANDOM_OFFSET + RANDOM_LEN {
        return Err(ProtocolError::Truncated("server hello").into());
    }

    let mut received = [0u8; RANDOM_LEN];
    received.copy_from_slice(&packet[RANDOM_OFFSET..RANDOM_OFFSET + RANDOM_LEN]);
    packet[RANDOM_OFFSET..RANDOM_OFFSET + RANDOM_LEN].fill(0);

    let expected = packet_digest(&secret.key, client_random, &packet);
    if !bool::from(expected.as_ref().ct_eq(&received)) {
        return Err(ProtocolError::BadDigest.into());
    }
    Ok(())
}
