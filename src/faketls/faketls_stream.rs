use std::pin::Pin;
use std::task::{Context, Poll};

use futures::ready;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::record::{
    MAX_RECORD_PAYLOAD_LEN, MAX_WRITE_PAYLOAD_LEN, RECORD_HEADER_LEN, RecordHeader, RecordType,
    VERSION_TLS12,
};
use crate::async_stream::AsyncStream;
use crate::error::ProtocolError;

const TLS_FRAME_MAX_LEN: usize = RECORD_HEADER_LEN + MAX_RECORD_PAYLOAD_LEN;

/// Carries a byte stream inside TLS ApplicationData records.
///
/// Reads skip ChangeCipherSpec records and fail on any other record type.
/// Writes are cut into records of random size so the record lengths don't
/// mirror the application's write pattern.
pub struct FakeTlsStream {
    stream: Box<dyn AsyncStream>,

    is_eof: bool,

    unprocessed_buf: Box<[u8]>,
    unprocessed_end_offset: usize,

    processed_buf: Box<[u8]>,
    processed_start_offset: usize,
    processed_end_offset: usize,

    write_buf: Box<[u8]>,
    write_buf_pos: usize,
    write_buf_end: usize,
}

enum DeframeState {
    NeedData,
    Payload,
    Skipped,
}

impl FakeTlsStream {
    pub fn new(stream: Box<dyn AsyncStream>) -> Self {
        Self {
            stream,
            is_eof: false,
            unprocessed_buf: vec![0u8; TLS_FRAME_MAX_LEN].into_boxed_slice(),
            unprocessed_end_offset: 0,
            processed_buf: vec![0u8; MAX_RECORD_PAYLOAD_LEN].into_boxed_slice(),
            processed_start_offset: 0,
            processed_end_offset: 0,
            write_buf: vec![0u8; RECORD_HEADER_LEN + MAX_WRITE_PAYLOAD_LEN].into_boxed_slice(),
            write_buf_pos: 0,
            write_buf_end: 0,
        }
    }

    fn read_processed(&mut self, buf: &mut ReadBuf<'_>) {
        let available_len = self.processed_end_offset - self.processed_start_offset;
        let write_amount = std::cmp::min(buf.remaining(), available_len);

        buf.put_slice(
            &self.processed_buf
                [self.processed_start_offset..self.processed_start_offset + write_amount],
        );

        self.processed_start_offset += write_amount;
        if self.processed_start_offset == self.processed_end_offset {
            self.processed_start_offset = 0;
            self.processed_end_offset = 0;
        }
    }

    fn try_deframe(&mut self) -> std::io::Result<DeframeState> {
        if self.unprocessed_end_offset < RECORD_HEADER_LEN {
            return Ok(DeframeState::NeedData);
        }

        let mut header = [0u8; RECORD_HEADER_LEN];
        header.copy_from_slice(&self.unprocessed_buf[..RECORD_HEADER_LEN]);
        let header = RecordHeader::parse(&header)?;

        let total_len = RECORD_HEADER_LEN + header.payload_len;
        if self.unprocessed_end_offset < total_len {
            return Ok(DeframeState::NeedData);
        }

        let state = match header.record_type {
            RecordType::ChangeCipherSpec => DeframeState::Skipped,
            RecordType::ApplicationData if header.payload_len == 0 => DeframeState::Skipped,
            RecordType::ApplicationData => {
                self.processed_buf[..header.payload_len]
                    .copy_from_slice(&self.unprocessed_buf[RECORD_HEADER_LEN..total_len]);
                self.processed_start_offset = 0;
                self.processed_end_offset = header.payload_len;
                DeframeState::Payload
            }
            RecordType::Handshake => {
                return Err(ProtocolError::UnsupportedRecordType(RecordType::Handshake as u8).into());
            }
        };

        self.unprocessed_buf
            .copy_within(total_len..self.unprocessed_end_offset, 0);
        self.unprocessed_end_offset -= total_len;

        Ok(state)
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while self.write_buf_pos < self.write_buf_end {
            let n = ready!(
                Pin::new(&mut self.stream)
                    .poll_write(cx, &self.write_buf[self.write_buf_pos..self.write_buf_end])
            )?;
            if n == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write pending record",
                )));
            }
            self.write_buf_pos += n;
        }
        self.write_buf_pos = 0;
        self.write_buf_end = 0;
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for FakeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.processed_end_offset > 0 {
                this.read_processed(buf);
                return Poll::Ready(Ok(()));
            }

            match this.try_deframe()? {
                DeframeState::Payload | DeframeState::Skipped => continue,
                DeframeState::NeedData => {}
            }

            if this.is_eof {
                if this.unprocessed_end_offset > 0 {
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream ended inside a tls record",
                    )));
                }
                return Poll::Ready(Ok(()));
            }

            let mut read_buf =
                ReadBuf::new(&mut this.unprocessed_buf[this.unprocessed_end_offset..]);
            ready!(Pin::new(&mut this.stream).poll_read(cx, &mut read_buf))?;
            let n = read_buf.filled().len();
            if n == 0 {
                this.is_eof = true;
            } else {
                this.unprocessed_end_offset += n;
            }
        }
    }
}

impl AsyncWrite for FakeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let chunk_len = rand::rng()
            .random_range(1..=MAX_WRITE_PAYLOAD_LEN)
            .min(buf.len());

        this.write_buf[0] = RecordType::ApplicationData as u8;
        this.write_buf[1..3].copy_from_slice(&VERSION_TLS12.to_be_bytes());
        this.write_buf[3..5].copy_from_slice(&(chunk_len as u16).to_be_bytes());
        this.write_buf[RECORD_HEADER_LEN..RECORD_HEADER_LEN + chunk_len]
            .copy_from_slice(&buf[..chunk_len]);
        this.write_buf_end = RECORD_HEADER_LEN + chunk_len;

        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(chunk_len))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::protocol_error;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_written_data_arrives_as_application_records() {
        let (client, mut server) = duplex(1 << 20);
        let mut stream = FakeTlsStream::new(Box::new(client));

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        stream.write_all(&payload).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut wire = vec![];
        server.read_to_end(&mut wire).await.unwrap();

        let mut offset = 0;
        let mut collected = vec![];
        while offset < wire.len() {
            assert_eq!(&wire[offset..offset + 3], &[0x17, 0x03, 0x03]);
            let len = u16::from_be_bytes([wire[offset + 3], wire[offset + 4]]) as usize;
            assert!((1..=MAX_WRITE_PAYLOAD_LEN).contains(&len));
            collected.extend_from_slice(&wire[offset + 5..offset + 5 + len]);
            offset += 5 + len;
        }
        assert_eq!(collected, payload);
    }

    #[tokio::test]
    async fn test_read_skips_change_cipher_spec() {
        let (client, mut server) = duplex(4096);
        let mut stream = FakeTlsStream::new(Box::new(client));

        server
            .write_all(&[
                0x14, 0x03, 0x03, 0x00, 0x01, 0x01, // ccs
                0x17, 0x03, 0x03, 0x00, 0x03, b'a', b'b', b'c', // data
                0x17, 0x03, 0x03, 0x00, 0x00, // empty data
                0x17, 0x03, 0x03, 0x00, 0x02, b'd', b'e',
            ])
            .await
            .unwrap();
        drop(server);

        let mut received = vec![];
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abcde");
    }

    #[tokio::test]
    async fn test_read_rejects_handshake_record() {
        let (client, mut server) = duplex(4096);
        let mut stream = FakeTlsStream::new(Box::new(client));

        server
            .write_all(&[0x16, 0x03, 0x03, 0x00, 0x01, 0x00])
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(
            protocol_error(&err),
            Some(&ProtocolError::UnsupportedRecordType(0x16))
        );
    }

    #[tokio::test]
    async fn test_partial_record_at_eof_fails() {
        let (client, mut server) = duplex(4096);
        let mut stream = FakeTlsStream::new(Box::new(client));

        server
            .write_all(&[0x17, 0x03, 0x03, 0x00, 0x10, 1, 2, 3])
            .await
            .unwrap();
        drop(server);

        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_streams_talk_to_each_other() {
        let (a, b) = duplex(1024);
        let mut left = FakeTlsStream::new(Box::new(a));
        let mut right = FakeTlsStream::new(Box::new(b));

        let writer = tokio::spawn(async move {
            let data = vec![0x5au8; 50_000];
            left.write_all(&data).await.unwrap();
            left.flush().await.unwrap();
            left
        });

        let mut received = vec![0u8; 50_000];
        right.read_exact(&mut received).await.unwrap();
        assert!(received.iter().all(|&b| b == 0x5a));
        writer.await.unwrap();
    }
}
