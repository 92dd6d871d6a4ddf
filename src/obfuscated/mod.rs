mod handshake_frame;
mod obfuscated_stream;
mod obfuscator;

pub use handshake_frame::{CONNECTION_TAG, DEFAULT_DC, FRAME_LEN, HandshakeFrame, KEY_IV_LEN};
pub use obfuscated_stream::ObfuscatedStream;
pub use obfuscator::{AesCtr, CipherPair, Obfuscator};
