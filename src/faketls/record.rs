//! TLS record envelope: 1 byte type, 2 bytes version, 2 bytes payload length
//! (all big-endian), then the payload.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::ProtocolError;

pub const RECORD_HEADER_LEN: usize = 5;
pub const MAX_RECORD_PAYLOAD_LEN: usize = u16::MAX as usize;

// Outbound application data is fragmented to at most a real TLS plaintext record.
pub const MAX_WRITE_PAYLOAD_LEN: usize = 16384;

pub const VERSION_TLS10: u16 = 0x0301;
pub const VERSION_TLS12: u16 = 0x0303;
pub const VERSION_TLS13: u16 = 0x0304;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    ChangeCipherSpec = 0x14,
    Handshake = 0x16,
    ApplicationData = 0x17,
}

impl TryFrom<u8> for RecordType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x14 => Ok(RecordType::ChangeCipherSpec),
            0x16 => Ok(RecordType::Handshake),
            0x17 => Ok(RecordType::ApplicationData),
            other => Err(ProtocolError::UnsupportedRecordType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub version: u16,
    pub payload_len: usize,
}

impl RecordHeader {
    pub fn parse(header: &[u8; RECORD_HEADER_LEN]) -> Result<Self, ProtocolError> {
        let record_type = RecordType::try_from(header[0])?;
        let version = u16::from_be_bytes([header[1], header[2]]);
        if !(VERSION_TLS10..=VERSION_TLS13).contains(&version) {
            return Err(ProtocolError::UnsupportedTlsVersion(version));
        }
        let payload_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        Ok(Self {
            record_type,
            version,
            payload_len,
        })
    }

    pub fn write(record_type: RecordType, version: u16, payload_len: usize, out: &mut Vec<u8>) {
        out.push(record_type as u8);
        out.extend_from_slice(&version.to_be_bytes());
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    }
}

/// A single record with a pooled payload buffer.
#[derive(Debug)]
pub struct TlsRecord {
    pub record_type: RecordType,
    pub version: u16,
    pub payload: PooledBuffer,
}

impl TlsRecord {
    pub fn new(record_type: RecordType, version: u16, pool: &Arc<BufferPool>) -> Self {
        Self {
            record_type,
            version,
            payload: pool.acquire(),
        }
    }

    pub async fn read<R>(reader: &mut R, pool: &Arc<BufferPool>) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; RECORD_HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let RecordHeader {
            record_type,
            version,
            payload_len,
        } = RecordHeader::parse(&header)?;

        let mut record = Self::new(record_type, version, pool);
        record.payload.resize(payload_len, 0);
        reader.read_exact(&mut record.payload[..]).await?;
        Ok(record)
    }

    /// Appends the encoded record to `out`.
    pub fn dump(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        if self.payload.len() > MAX_RECORD_PAYLOAD_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("record payload too large: {}", self.payload.len()),
            ));
        }
        RecordHeader::write(self.record_type, self.version, self.payload.len(), out);
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut out = Vec::with_capacity(RECORD_HEADER_LEN + self.payload.len());
        self.dump(&mut out)?;
        writer.write_all(&out).await
    }
}

/// Reads one record as raw bytes appended to `out`.
///
/// Everything consumed from `reader` ends up in `out`, also when the header is
/// malformed or the stream ends early. Those cases yield the inner
/// `ProtocolError`; only transport failures are returned as `io::Error`.
pub async fn read_record_bytes<R>(
    reader: &mut R,
    out: &mut Vec<u8>,
) -> std::io::Result<Result<RecordHeader, ProtocolError>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let start = out.len();
    if !read_up_to(reader, out, RECORD_HEADER_LEN).await? {
        return Ok(Err(ProtocolError::Truncated("record header")));
    }

    let mut header = [0u8; RECORD_HEADER_LEN];
    header.copy_from_slice(&out[start..start + RECORD_HEADER_LEN]);
    let header = match RecordHeader::parse(&header) {
        Ok(header) => header,
        Err(e) => return Ok(Err(e)),
    };

    if !read_up_to(reader, out, header.payload_len).await? {
        return Ok(Err(ProtocolError::Truncated("record payload")));
    }
    Ok(Ok(header))
}

// Returns false when the stream ended before `len` bytes arrived; the bytes
// that did arrive stay in `out`.
async fn read_up_to<R>(reader: &mut R, out: &mut Vec<u8>, len: usize) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let start = out.len();
    out.resize(start + len, 0);
    let mut filled = 0;
    while filled < len {
        let n = reader.read(&mut out[start + filled..]).await?;
        if n == 0 {
            out.truncate(start + filled);
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
