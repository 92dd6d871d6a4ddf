//! Bidirectional pump between the client and the data-center connection.
//!
//! Each direction reads into a pooled buffer and writes through a buffered
//! writer. A read waits at most `idle_tick`; when the tick expires the pending
//! output is flushed and the shared idle clock is checked against
//! `idle_timeout`. EOF half-closes the opposite writer; the surviving
//! direction then gets one quiet tick before the relay is torn down. Errors,
//! idle expiry and external cancellation tear down both directions at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::async_stream::AsyncStream;
use crate::buffer_pool::BufferPool;

pub const DEFAULT_IDLE_TICK: Duration = Duration::from_millis(50);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub buffer_size: usize,
    pub idle_tick: Duration,
    pub idle_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_tick: DEFAULT_IDLE_TICK,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_telegram: u64,
    pub telegram_to_client: u64,
}

/// Time of the last transfer in either direction, and whether one direction
/// has already reached EOF.
struct IdleClock {
    start: Instant,
    last_activity_millis: AtomicU64,
    half_closed: AtomicBool,
}

impl IdleClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_activity_millis: AtomicU64::new(0),
            half_closed: AtomicBool::new(false),
        }
    }

    fn close_half(&self) {
        self.touch();
        self.half_closed.store(true, Ordering::Relaxed);
    }

    fn is_half_closed(&self) -> bool {
        self.half_closed.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_activity_millis
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_millis.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }
}

enum PumpEnd {
    Eof,
    Idle,
    HalfClosedIdle,
    Cancelled,
}

struct Pump<'a> {
    scope: &'a CancellationToken,
    conn_id: &'a str,
    direction: &'static str,
    options: &'a RelayOptions,
    idle: &'a IdleClock,
}

impl Pump<'_> {
    async fn run<R, W>(
        &self,
        reader: &mut R,
        writer: &mut BufWriter<W>,
        buf: &mut [u8],
        copied: &mut u64,
    ) -> std::io::Result<PumpEnd>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let n = tokio::select! {
                biased;
                _ = self.scope.cancelled() => return Ok(PumpEnd::Cancelled),
                result = timeout(self.options.idle_tick, reader.read(buf)) => match result {
                    Ok(read_result) => read_result?,
                    Err(_) => {
                        if !self.flush(writer).await? {
                            return Ok(PumpEnd::Cancelled);
                        }
                        let idle_for = self.idle.idle_for();
                        if idle_for >= self.options.idle_timeout {
                            return Ok(PumpEnd::Idle);
                        }
                        if self.idle.is_half_closed() && idle_for >= self.options.idle_tick {
                            return Ok(PumpEnd::HalfClosedIdle);
                        }
                        continue;
                    }
                },
            };

            if n == 0 {
                if !self.flush(writer).await? {
                    return Ok(PumpEnd::Cancelled);
                }
                writer.shutdown().await?;
                self.idle.close_half();
                return Ok(PumpEnd::Eof);
            }

            self.idle.touch();
            tokio::select! {
                biased;
                _ = self.scope.cancelled() => return Ok(PumpEnd::Cancelled),
                result = writer.write_all(&buf[..n]) => result?,
            }
            *copied += n as u64;

            // a short read means the source is drained for now
            if n < buf.len() && !self.flush(writer).await? {
                return Ok(PumpEnd::Cancelled);
            }
        }
    }

    /// Returns false when cancelled before the flush completed.
    async fn flush<W>(&self, writer: &mut BufWriter<W>) -> std::io::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Ok(false),
            result = writer.flush() => result.map(|_| true),
        }
    }

    async fn pump<R, W>(&self, mut reader: R, writer: W, pool: &Arc<BufferPool>) -> u64
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = pool.acquire();
        buf.resize(self.options.buffer_size, 0);
        let mut writer = BufWriter::with_capacity(self.options.buffer_size, writer);
        let mut copied = 0u64;

        match self.run(&mut reader, &mut writer, &mut buf, &mut copied).await {
            Ok(PumpEnd::Eof) => {
                debug!("{} {} reached eof after {} bytes", self.conn_id, self.direction, copied);
            }
            Ok(PumpEnd::Idle) => {
                debug!(
                    "{} {} idle for {:?}, closing",
                    self.conn_id, self.direction, self.options.idle_timeout
                );
                self.scope.cancel();
            }
            Ok(PumpEnd::HalfClosedIdle) => {
                debug!(
                    "{} {} quiet after the other side closed, closing",
                    self.conn_id, self.direction
                );
                self.scope.cancel();
            }
            Ok(PumpEnd::Cancelled) => {
                debug!("{} {} cancelled after {} bytes", self.conn_id, self.direction, copied);
            }
            Err(e) => {
                debug!("{} {} failed after {} bytes: {}", self.conn_id, self.direction, copied, e);
                self.scope.cancel();
            }
        }

        copied
    }
}

/// Pumps bytes between `telegram` and `client` until both directions finish.
pub async fn relay(
    scope: &CancellationToken,
    conn_id: &str,
    options: &RelayOptions,
    pool: &Arc<BufferPool>,
    telegram: Box<dyn AsyncStream>,
    client: Box<dyn AsyncStream>,
) -> RelayStats {
    let idle = IdleClock::new();
    let (client_reader, client_writer) = tokio::io::split(client);
    let (telegram_reader, telegram_writer) = tokio::io::split(telegram);

    let upstream = Pump {
        scope,
        conn_id,
        direction: "client -> telegram",
        options,
        idle: &idle,
    };
    let downstream = Pump {
        scope,
        conn_id,
        direction: "telegram -> client",
        options,
        idle: &idle,
    };

    let (client_to_telegram, telegram_to_client) = tokio::join!(
        upstream.pump(client_reader, telegram_writer, pool),
        downstream.pump(telegram_reader, client_writer, pool),
    );

    RelayStats {
        client_to_telegram,
        telegram_to_client,
    }
}
