use rand::RngCore;

pub const FRAME_LEN: usize = 64;
pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const KEY_IV_LEN: usize = KEY_LEN + IV_LEN;

const KEY_OFFSET: usize = 8;
const IV_OFFSET: usize = KEY_OFFSET + KEY_LEN;
const TAG_OFFSET: usize = IV_OFFSET + IV_LEN;
const DC_OFFSET: usize = TAG_OFFSET + 4;

/// Padded intermediate transport tag.
pub const CONNECTION_TAG: [u8; 4] = [0xdd, 0xdd, 0xdd, 0xdd];

/// Used when the client asks for data-center 0.
pub const DEFAULT_DC: i32 = 2;

// Abridged transport marker.
const FORBIDDEN_FIRST_BYTE: u8 = 0xef;

// Little-endian first words that collide with other protocols: HEAD, POST, GET,
// OPTI(ONS), a TLS record prefix, and the padded intermediate / fake-TLS markers.
const FORBIDDEN_FIRST_WORDS: [u32; 7] = [
    0x44414548, 0x54534f50, 0x20544547, 0x4954504f, 0x02010316, 0xdddddddd, 0xeeeeeeee,
];

/// The 64-byte obfuscation handshake:
///
/// ```text
/// [0:8)   noise
/// [8:40)  AES key
/// [40:56) AES IV
/// [56:60) connection tag
/// [60:62) data-center id, little-endian i16
/// [62:64) noise
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFrame {
    data: [u8; FRAME_LEN],
}

impl HandshakeFrame {
    pub fn from_bytes(data: [u8; FRAME_LEN]) -> Self {
        Self { data }
    }

    /// Random frame suitable for opening a connection. Regenerated until it
    /// cannot be mistaken for another protocol's prefix.
    pub fn generate() -> Self {
        let mut data = [0u8; FRAME_LEN];
        let mut rng = rand::rng();
        loop {
            rng.fill_bytes(&mut data);
            let frame = Self { data };
            if !frame.is_forbidden() {
                return frame;
            }
        }
    }

    pub fn is_forbidden(&self) -> bool {
        if self.data[0] == FORBIDDEN_FIRST_BYTE {
            return true;
        }
        let first = u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
        let second = u32::from_le_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]);
        FORBIDDEN_FIRST_WORDS.contains(&first) || second == 0
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.data
    }

    pub fn key(&self) -> &[u8] {
        &self.data[KEY_OFFSET..IV_OFFSET]
    }

    pub fn iv(&self) -> &[u8] {
        &self.data[IV_OFFSET..TAG_OFFSET]
    }

    /// Key and IV together, the region spliced back in plaintext on the wire.
    pub fn key_iv(&self) -> &[u8] {
        &self.data[KEY_OFFSET..TAG_OFFSET]
    }

    pub fn connection_tag(&self) -> &[u8] {
        &self.data[TAG_OFFSET..DC_OFFSET]
    }

    pub fn set_connection_tag(&mut self, tag: &[u8; 4]) {
        self.data[TAG_OFFSET..DC_OFFSET].copy_from_slice(tag);
    }

    pub fn raw_dc(&self) -> i16 {
        i16::from_le_bytes([self.data[DC_OFFSET], self.data[DC_OFFSET + 1]])
    }

    pub fn set_dc(&mut self, dc: i16) {
        self.data[DC_OFFSET..DC_OFFSET + 2].copy_from_slice(&dc.to_le_bytes());
    }

    /// Target data-center. Negative ids are negated and zero maps to
    /// `DEFAULT_DC`, matching what clients put on the wire.
    pub fn dc(&self) -> i32 {
        let raw = self.raw_dc() as i32;
        match raw {
            0 => DEFAULT_DC,
            n if n < 0 => -n,
            n => n,
        }
    }

    /// Copy of this frame with the key||IV region byte-reversed. The peer's
    /// opposite direction cipher is derived from it.
    pub fn reversed(&self) -> Self {
        let mut data = self.data;
        data[KEY_OFFSET..TAG_OFFSET].reverse();
        Self { data }
    }
}
