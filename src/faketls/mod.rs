mod client_hello;
mod faketls_stream;
mod record;
mod welcome;

pub use client_hello::{
    ClientHello, RANDOM_LEN, RANDOM_OFFSET, build_client_hello, parse_client_hello,
};
pub use faketls_stream::FakeTlsStream;
pub use record::{
    MAX_RECORD_PAYLOAD_LEN, MAX_WRITE_PAYLOAD_LEN, RECORD_HEADER_LEN, RecordHeader, RecordType,
    TlsRecord, VERSION_TLS10, VERSION_TLS12, VERSION_TLS13, read_record_bytes,
};
pub use welcome::{build_welcome_packet, read_welcome_packet, send_welcome_packet};
