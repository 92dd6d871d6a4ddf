use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aws_lc_rs::hmac;
use rand::RngCore;
use subtle::ConstantTimeEq;

use super::record::{RECORD_HEADER_LEN, RecordHeader, RecordType, VERSION_TLS10, VERSION_TLS12};
use crate::byte_reader::ByteReader;
use crate::error::ProtocolError;
use crate::secret::Secret;

/// Offset of the 32-byte random inside a full handshake record.
pub const RANDOM_OFFSET: usize = RECORD_HEADER_LEN + 4 + 2;
pub const RANDOM_LEN: usize = 32;

const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const SERVER_NAME_TYPE_HOST: u8 = 0x00;

// The digest XOR random must be zero except for the trailing timestamp.
const DIGEST_ZERO_LEN: usize = 28;

const MIN_CLIENT_HELLO_LEN: usize = RANDOM_OFFSET + RANDOM_LEN + 1;
const MAX_SESSION_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub time: SystemTime,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub host: String,
    pub cipher_suite: u16,
}

impl ClientHello {
    pub fn valid(&self, expected_host: &str, max_skew: Duration) -> Result<(), ProtocolError> {
        self.valid_at(SystemTime::now(), expected_host, max_skew)
    }

    pub fn valid_at(
        &self,
        now: SystemTime,
        expected_host: &str,
        max_skew: Duration,
    ) -> Result<(), ProtocolError> {
        if !expected_host.is_empty() && !self.host.eq_ignore_ascii_case(expected_host) {
            return Err(ProtocolError::HostnameMismatch {
                expected: expected_host.to_string(),
                actual: self.host.clone(),
            });
        }

        let skew = match now.duration_since(self.time) {
            Ok(elapsed) => elapsed,
            Err(e) => e.duration(),
        };
        if skew > max_skew {
            return Err(ProtocolError::TimeSkew {
                skew_secs: skew.as_secs(),
            });
        }

        Ok(())
    }
}

/// HMAC-SHA256 over the record with the random field zeroed.
fn record_digest(key: &[u8], record: &[u8]) -> [u8; RANDOM_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut context = hmac::Context::with_key(&key);
    context.update(&record[..RANDOM_OFFSET]);
    context.update(&[0u8; RANDOM_LEN]);
    context.update(&record[RANDOM_OFFSET + RANDOM_LEN..]);

    let mut out = [0u8; RANDOM_LEN];
    out.copy_from_slice(context.sign().as_ref());
    out
}

/// Parses and authenticates a full ClientHello record (header included).
pub fn parse_client_hello(secret: &Secret, record: &[u8]) -> Result<ClientHello, ProtocolError> {
    if record.len() < MIN_CLIENT_HELLO_LEN {
        return Err(ProtocolError::Truncated("client hello"));
    }

    let mut random = [0u8; RANDOM_LEN];
    random.copy_from_slice(&record[RANDOM_OFFSET..RANDOM_OFFSET + RANDOM_LEN]);

    let mut computed = record_digest(&secret.key, record);
    for (c, r) in computed.iter_mut().zip(random.iter()) {
        *c ^= r;
    }
    if !bool::from(computed[..DIGEST_ZERO_LEN].ct_eq(&[0u8; DIGEST_ZERO_LEN])) {
        return Err(ProtocolError::BadDigest);
    }
    let timestamp = u32::from_le_bytes([computed[28], computed[29], computed[30], computed[31]]);

    let mut reader = ByteReader::new(record);
    let header = RecordHeader::parse(&reader.read_array("record header")?)?;
    if header.record_type != RecordType::Handshake {
        return Err(ProtocolError::UnsupportedRecordType(header.record_type as u8));
    }
    if header.payload_len != reader.remaining() {
        return Err(ProtocolError::Truncated("client hello record"));
    }

    let handshake_type = reader.read_u8("handshake type")?;
    if handshake_type != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(ProtocolError::UnexpectedHandshakeType(handshake_type));
    }
    let handshake_len = reader.read_u24_be("handshake length")? as usize;
    if handshake_len != reader.remaining() {
        return Err(ProtocolError::Truncated("client hello handshake"));
    }

    reader.skip(2 + RANDOM_LEN, "client random")?;

    let session_id_len = reader.read_u8("session id length")? as usize;
    let session_id = reader.read_slice(session_id_len, "session id")?.to_vec();

    let cipher_suites_len = reader.read_u16_be("cipher suites length")? as usize;
    if cipher_suites_len < 2 {
        return Err(ProtocolError::Truncated("cipher suites"));
    }
    let cipher_suites = reader.read_slice(cipher_suites_len, "cipher suites")?;
    let cipher_suite = u16::from_be_bytes([cipher_suites[0], cipher_suites[1]]);

    let compression_len = reader.read_u8("compression methods length")? as usize;
    reader.skip(compression_len, "compression methods")?;

    let host = if reader.is_consumed() {
        String::new()
    } else {
        parse_server_name(&mut reader)?
    };

    Ok(ClientHello {
        time: UNIX_EPOCH + Duration::from_secs(timestamp as u64),
        random,
        session_id,
        host,
        cipher_suite,
    })
}

fn parse_server_name(reader: &mut ByteReader<'_>) -> Result<String, ProtocolError> {
    let extensions_len = reader.read_u16_be("extensions length")? as usize;
    let mut extensions = ByteReader::new(reader.read_slice(extensions_len, "extensions")?);

    while !extensions.is_consumed() {
        let extension_type = extensions.read_u16_be("extension type")?;
        let extension_len = extensions.read_u16_be("extension length")? as usize;
        let data = extensions.read_slice(extension_len, "extension")?;
        if extension_type != EXTENSION_SERVER_NAME {
            continue;
        }

        let mut server_name = ByteReader::new(data);
        let list_len = server_name.read_u16_be("server name list length")? as usize;
        let mut list = ByteReader::new(server_name.read_slice(list_len, "server name list")?);
        while !list.is_consumed() {
            let name_type = list.read_u8("server name type")?;
            let name_len = list.read_u16_be("server name length")? as usize;
            let name = list.read_slice(name_len, "server name")?;
            if name_type == SERVER_NAME_TYPE_HOST {
                return Ok(String::from_utf8_lossy(name).into_owned());
            }
        }
    }

    Ok(String::new())
}

/// Builds a ClientHello record that `parse_client_hello` accepts for the same
/// secret, carrying `time` as the embedded timestamp.
pub fn build_client_hello(
    secret: &Secret,
    host: &str,
    time: SystemTime,
    session_id: &[u8],
) -> std::io::Result<Vec<u8>> {
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("session id too long: {} bytes", session_id.len()),
        ));
    }
    if host.len() > u8::MAX as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("server name too long: {host}"),
        ));
    }

    let mut body = Vec::with_capacity(512);
    body.extend_from_slice(&VERSION_TLS12.to_be_bytes());
    body.extend_from_slice(&[0u8; RANDOM_LEN]);
    body.push(session_id.len() as u8);
    body.extend_from_slice(session_id);

    let cipher_suites: [u16; 5] = [0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f];
    body.extend_from_slice(&((cipher_suites.len() * 2) as u16).to_be_bytes());
    for suite in cipher_suites {
        body.extend_from_slice(&suite.to_be_bytes());
    }

    // null compression only
    body.extend_from_slice(&[0x01, 0x00]);

    let mut extensions = Vec::with_capacity(128);
    if !host.is_empty() {
        let name_len = host.len() as u16;
        extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&(name_len + 5).to_be_bytes());
        extensions.extend_from_slice(&(name_len + 3).to_be_bytes());
        extensions.push(SERVER_NAME_TYPE_HOST);
        extensions.extend_from_slice(&name_len.to_be_bytes());
        extensions.extend_from_slice(host.as_bytes());
    }
    // supported_versions: TLS 1.3, TLS 1.2
    extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x05, 0x04, 0x03, 0x04, 0x03, 0x03]);
    // key_share: a single x25519 entry
    extensions.extend_from_slice(&[0x00, 0x33, 0x00, 0x26, 0x00, 0x24, 0x00, 0x1d, 0x00, 0x20]);
    let mut key_share = [0u8; 32];
    rand::rng().fill_bytes(&mut key_share);
    extensions.extend_from_slice(&key_share);

    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + 4 + body.len());
    RecordHeader::write(RecordType::Handshake, VERSION_TLS10, body.len() + 4, &mut record);
    record.push(HANDSHAKE_TYPE_CLIENT_HELLO);
    record.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    record.extend_from_slice(&body);

    let timestamp = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    let mut random = record_digest(&secret.key, &record);
    for (r, t) in random[DIGEST_ZERO_LEN..]
        .iter_mut()
        .zip(timestamp.to_le_bytes())
    {
        *r ^= t;
    }
    record[RANDOM_OFFSET..RANDOM_OFFSET + RANDOM_LEN].copy_from_slice(&random);

    Ok(record)
}
