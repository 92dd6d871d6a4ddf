//! The shared proxy secret: a 32-byte key plus the hostname the fake-TLS mode
//! pretends to be.
//!
//! Accepted text forms:
//! - `base64(key || host)` (standard alphabet, padding optional)
//! - `"ee" + hex(key || host)`, fake-TLS capable
//! - `"dd" + hex(key)`, legacy obfuscation only

use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::engine::Engine as _;

use crate::error::ProtocolError;

pub const SECRET_KEY_LEN: usize = 32;

const FAKE_TLS_PREFIX: &str = "ee";
const LEGACY_PREFIX: &str = "dd";

#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub key: [u8; SECRET_KEY_LEN],
    pub host: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never log the key
        f.debug_struct("Secret")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Secret {
    pub fn generate(host: &str) -> std::io::Result<Self> {
        let mut key = [0u8; SECRET_KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| std::io::Error::other("system random generator failed"))?;
        Ok(Self {
            key,
            host: host.to_string(),
        })
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::InvalidSecret("empty secret".to_string()));
        }

        if let Some(hex) = text.strip_prefix(FAKE_TLS_PREFIX)
            && let Ok(decoded) = decode_hex(hex)
        {
            return Self::from_key_and_host(&decoded);
        }

        if let Some(hex) = text.strip_prefix(LEGACY_PREFIX)
            && let Ok(decoded) = decode_hex(hex)
        {
            if decoded.len() != SECRET_KEY_LEN {
                return Err(ProtocolError::InvalidSecret(format!(
                    "legacy secret must be exactly {SECRET_KEY_LEN} bytes, got {}",
                    decoded.len()
                )));
            }
            let mut key = [0u8; SECRET_KEY_LEN];
            key.copy_from_slice(&decoded);
            return Ok(Self {
                key,
                host: String::new(),
            });
        }

        let decoded = STANDARD_NO_PAD
            .decode(text)
            .or_else(|_| STANDARD.decode(text))
            .map_err(|e| ProtocolError::InvalidSecret(format!("not base64 or hex: {e}")))?;
        Self::from_key_and_host(&decoded)
    }

    fn from_key_and_host(decoded: &[u8]) -> Result<Self, ProtocolError> {
        if decoded.len() <= SECRET_KEY_LEN {
            return Err(ProtocolError::InvalidSecret(format!(
                "secret must be at least {} bytes, got {}",
                SECRET_KEY_LEN + 1,
                decoded.len()
            )));
        }
        let host = std::str::from_utf8(&decoded[SECRET_KEY_LEN..])
            .map_err(|e| ProtocolError::InvalidSecret(format!("hostname is not utf8: {e}")))?
            .to_string();
        let mut key = [0u8; SECRET_KEY_LEN];
        key.copy_from_slice(&decoded[..SECRET_KEY_LEN]);
        Ok(Self { key, host })
    }

    pub fn valid(&self) -> bool {
        self.key.iter().any(|b| *b != 0)
    }

    pub fn supports_fake_tls(&self) -> bool {
        !self.host.is_empty()
    }

    /// Base64 form of key and hostname. Legacy secrets carry no hostname and
    /// only have the `dd` hex form, so this returns `None` for them.
    pub fn to_base64(&self) -> Option<String> {
        if self.host.is_empty() {
            return None;
        }
        Some(STANDARD_NO_PAD.encode(self.key_and_host()))
    }

    pub fn to_hex(&self) -> String {
        if self.host.is_empty() {
            format!("{LEGACY_PREFIX}{}", encode_hex(&self.key))
        } else {
            format!("{FAKE_TLS_PREFIX}{}", encode_hex(&self.key_and_host()))
        }
    }

    fn key_and_host(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SECRET_KEY_LEN + self.host.len());
        data.extend_from_slice(&self.key);
        data.extend_from_slice(self.host.as_bytes());
        data
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl serde::Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Secret::parse(&text).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, &'static str> {
    if hex.len() % 2 != 0 {
        return Err("odd hex length");
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok((hex_char_to_value(pair[0])? << 4) | hex_char_to_value(pair[1])?))
        .collect()
}

fn hex_char_to_value(c: u8) -> Result<u8, &'static str> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err("invalid hex character"),
    }
}
