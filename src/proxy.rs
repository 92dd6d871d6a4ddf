//! Connection orchestration: admission, disguise handshake, data-center dial,
//! relay and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::address::{Address, NetLocation};
use crate::antireplay::{AntiReplayCache, TimedAntiReplayCache};
use crate::async_stream::AsyncStream;
use crate::blocklist::{IpBlocklist, NoopIpBlocklist};
use crate::buffer_pool::BufferPool;
use crate::dc::{DcAddressBook, PreferIp};
use crate::error::ProtocolError;
use crate::events::{Event, EventStream, LogEventStream, TrafficDirection};
use crate::faketls::{
    FakeTlsStream, MAX_WRITE_PAYLOAD_LEN, parse_client_hello, read_record_bytes,
    send_welcome_packet,
};
use crate::network::{NativeNetwork, Network};
use crate::obfuscated::{FRAME_LEN, HandshakeFrame, KEY_IV_LEN, ObfuscatedStream, Obfuscator};
use crate::relay::{RelayOptions, RelayStats, relay};
use crate::secret::Secret;
use crate::stream_context::StreamContext;

pub const DEFAULT_CONCURRENCY: usize = 8192;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TOLERATE_TIME_SKEW: Duration = Duration::from_secs(5);
pub const DEFAULT_ANTI_REPLAY_MAX_ENTRIES: usize = 100_000;
pub const DEFAULT_ANTI_REPLAY_TTL: Duration = Duration::from_secs(3600);

// free buffers kept around for reuse
const MAX_POOLED_BUFFERS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    FakeTls,
    Obfuscated,
}

impl ProxyMode {
    pub fn for_secret(secret: &Secret) -> Self {
        if secret.supports_fake_tls() {
            ProxyMode::FakeTls
        } else {
            ProxyMode::Obfuscated
        }
    }
}

pub struct ProxyOptions {
    pub secret: Arc<Secret>,
    pub mode: ProxyMode,
    pub concurrency: usize,
    pub tolerate_time_skew: Duration,
    pub domain_fronting_port: Option<u16>,
    pub handshake_timeout: Duration,
    pub relay: RelayOptions,
    pub tcp_no_delay: bool,
    pub network: Arc<dyn Network>,
    pub blocklist: Arc<dyn IpBlocklist>,
    pub anti_replay: Arc<dyn AntiReplayCache>,
    pub events: Arc<dyn EventStream>,
    pub dc_book: Arc<DcAddressBook>,
}

impl ProxyOptions {
    pub fn new(secret: Secret) -> Self {
        Self {
            mode: ProxyMode::for_secret(&secret),
            secret: Arc::new(secret),
            concurrency: DEFAULT_CONCURRENCY,
            tolerate_time_skew: DEFAULT_TOLERATE_TIME_SKEW,
            domain_fronting_port: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            relay: RelayOptions::default(),
            tcp_no_delay: true,
            network: Arc::new(NativeNetwork::default()),
            blocklist: Arc::new(NoopIpBlocklist),
            anti_replay: Arc::new(TimedAntiReplayCache::new(
                DEFAULT_ANTI_REPLAY_MAX_ENTRIES,
                DEFAULT_ANTI_REPLAY_TTL,
            )),
            events: Arc::new(LogEventStream),
            dc_book: Arc::new(DcAddressBook::builtin(PreferIp::default())),
        }
    }
}

enum ClientAccept {
    Ready {
        dc: i32,
        stream: ObfuscatedStream,
    },
    // Authentication failed after the first record was read. The stream is
    // handed back with the bytes consumed so far.
    Rejected {
        stream: Box<dyn AsyncStream>,
        initial_data: Vec<u8>,
        rejection: Rejection,
    },
}

enum Rejection {
    Invalid(ProtocolError),
    Replay,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Invalid(e) => write!(f, "{e}"),
            Rejection::Replay => write!(f, "replayed handshake"),
        }
    }
}

struct ProxyInner {
    options: ProxyOptions,
    semaphore: Arc<Semaphore>,
    root: CancellationToken,
    tracker: TaskTracker,
    pool: Arc<BufferPool>,
}

#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub fn new(options: ProxyOptions) -> Self {
        let pool = BufferPool::new(options.relay.buffer_size, MAX_POOLED_BUFFERS);
        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        Self {
            inner: Arc::new(ProxyInner {
                options,
                semaphore,
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
                pool,
            }),
        }
    }

    /// Accepts connections until `shutdown` is called.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Serving {:?} mode on {}", self.inner.options.mode, addr);
        }

        loop {
            let (stream, addr) = tokio::select! {
                _ = self.inner.root.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        error!("Accept failed: {e}");
                        continue;
                    }
                },
            };

            if self.inner.options.tcp_no_delay
                && let Err(e) = stream.set_nodelay(true)
            {
                error!("Failed to set TCP nodelay: {e}");
            }

            self.handle_stream(Box::new(stream), addr);
        }

        debug!("Stopped accepting connections");
        Ok(())
    }

    /// Runs admission for a single client connection and, if admitted,
    /// spawns its processing task. Rejected connections are closed by drop.
    pub fn handle_stream(&self, stream: Box<dyn AsyncStream>, remote: SocketAddr) {
        let inner = &self.inner;
        if inner.root.is_cancelled() {
            return;
        }

        if inner.options.blocklist.contains(remote.ip()) {
            inner
                .options
                .events
                .send(Event::IpBlocklisted { remote: remote.ip() });
            return;
        }

        let permit = match inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                inner.options.events.send(Event::ConcurrencyLimited { remote });
                return;
            }
        };

        let ctx = StreamContext::new(&inner.root, remote);
        let cloned_inner = inner.clone();
        inner.tracker.spawn(async move {
            let _permit = permit;
            cloned_inner.process_stream(ctx, stream).await;
        });
    }

    /// Stops accepting, cancels every connection and waits for them to finish.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    pub fn active_connections(&self) -> usize {
        self.inner.tracker.len()
    }
}

impl ProxyInner {
    async fn process_stream(&self, mut ctx: StreamContext, stream: Box<dyn AsyncStream>) {
        self.options.events.send(Event::Start {
            conn_id: ctx.conn_id().to_string(),
            remote: ctx.remote(),
        });

        match self.run_stream(&mut ctx, stream).await {
            Ok(()) => debug!("{} finished after {:?}", ctx.log_prefix(), ctx.elapsed()),
            Err(e) => debug!("{} finished with error: {}", ctx.log_prefix(), e),
        }

        self.options.events.send(Event::Finish {
            conn_id: ctx.conn_id().to_string(),
        });
    }

    async fn run_stream(
        &self,
        ctx: &mut StreamContext,
        stream: Box<dyn AsyncStream>,
    ) -> std::io::Result<()> {
        let handshake = timeout(self.options.handshake_timeout, self.accept_client(stream));
        let accepted = tokio::select! {
            _ = ctx.scope().cancelled() => return Ok(()),
            result = handshake => result,
        };

        let accepted = match accepted {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                self.handshake_failed(ctx, e.to_string());
                return Err(e);
            }
            Err(_) => {
                self.handshake_failed(ctx, "handshake timed out".to_string());
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "handshake timed out",
                ));
            }
        };

        let (dc, client_stream) = match accepted {
            ClientAccept::Ready { dc, stream } => (dc, stream),
            ClientAccept::Rejected {
                stream,
                initial_data,
                rejection,
            } => {
                if let Rejection::Replay = rejection {
                    self.options.events.send(Event::ReplayAttack {
                        conn_id: ctx.conn_id().to_string(),
                    });
                }
                self.handshake_failed(ctx, rejection.to_string());
                return self.domain_front(ctx, stream, initial_data).await;
            }
        };

        ctx.set_dc(dc);
        debug!("{} client handshake done", ctx.log_prefix());

        let telegram_stream = tokio::select! {
            _ = ctx.scope().cancelled() => return Ok(()),
            result = self.connect_telegram(ctx, dc) => result?,
        };

        let stats = relay(
            ctx.scope(),
            ctx.conn_id(),
            &self.options.relay,
            &self.pool,
            Box::new(telegram_stream),
            Box::new(client_stream),
        )
        .await;
        self.report_traffic(ctx, stats);

        Ok(())
    }

    async fn accept_client(&self, stream: Box<dyn AsyncStream>) -> std::io::Result<ClientAccept> {
        match self.options.mode {
            ProxyMode::Obfuscated => self.accept_obfuscated(stream).await,
            ProxyMode::FakeTls => self.accept_fake_tls(stream).await,
        }
    }

    async fn accept_obfuscated(
        &self,
        mut stream: Box<dyn AsyncStream>,
    ) -> std::io::Result<ClientAccept> {
        let mut data = [0u8; FRAME_LEN];
        stream.read_exact(&mut data).await?;

        let frame = HandshakeFrame::from_bytes(data);
        let mut fingerprint = [0u8; KEY_IV_LEN];
        fingerprint.copy_from_slice(frame.key_iv());

        let (dc, ciphers) = Obfuscator::with_secret(&self.options.secret).read_frame(frame)?;
        if self.options.anti_replay.seen_before(&fingerprint) {
            return Ok(ClientAccept::Rejected {
                stream,
                initial_data: data.to_vec(),
                rejection: Rejection::Replay,
            });
        }

        Ok(ClientAccept::Ready {
            dc,
            stream: ObfuscatedStream::new(stream, ciphers.encryptor, ciphers.decryptor),
        })
    }

    async fn accept_fake_tls(
        &self,
        mut stream: Box<dyn AsyncStream>,
    ) -> std::io::Result<ClientAccept> {
        let secret = &self.options.secret;

        // non-TLS and malformed first records are kept byte for byte so they
        // can be handed to the fronting host
        let mut initial_data = Vec::with_capacity(MAX_WRITE_PAYLOAD_LEN);
        let first_record = read_record_bytes(&mut stream, &mut initial_data).await?;

        let hello = match first_record
            .and_then(|_| parse_client_hello(secret, &initial_data))
            .and_then(|hello| {
                hello
                    .valid(&secret.host, self.options.tolerate_time_skew)
                    .map(|()| hello)
            }) {
            Ok(hello) => hello,
            Err(e) => {
                return Ok(ClientAccept::Rejected {
                    stream,
                    initial_data,
                    rejection: Rejection::Invalid(e),
                });
            }
        };

        if self.options.anti_replay.seen_before(&hello.random) {
            return Ok(ClientAccept::Rejected {
                stream,
                initial_data,
                rejection: Rejection::Replay,
            });
        }

        send_welcome_packet(&mut stream, secret, &hello).await?;

        let tls_stream = FakeTlsStream::new(stream);
        let (dc, stream) = Obfuscator::with_secret(secret)
            .accept(Box::new(tls_stream))
            .await?;
        Ok(ClientAccept::Ready { dc, stream })
    }

    async fn connect_telegram(
        &self,
        ctx: &StreamContext,
        dc: i32,
    ) -> std::io::Result<ObfuscatedStream> {
        let mut last_error = None;
        for address in self.options.dc_book.addresses(dc) {
            let location = NetLocation::from_socket_addr(address);
            match self.options.network.dial(&location).await {
                Ok(stream) => {
                    let stream = Obfuscator::plain().originate(stream, dc).await?;
                    self.options.events.send(Event::ConnectedToDc {
                        conn_id: ctx.conn_id().to_string(),
                        dc,
                        address,
                    });
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("{} cannot dial {}: {}", ctx.log_prefix(), address, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for dc {dc}"),
            )
        }))
    }

    async fn domain_front(
        &self,
        ctx: &StreamContext,
        client: Box<dyn AsyncStream>,
        initial_data: Vec<u8>,
    ) -> std::io::Result<()> {
        let Some(port) = self.options.domain_fronting_port else {
            return Ok(());
        };
        if self.options.mode != ProxyMode::FakeTls {
            return Ok(());
        }

        self.options.events.send(Event::DomainFronting {
            conn_id: ctx.conn_id().to_string(),
        });

        let location = NetLocation::new(Address::from(&self.options.secret.host)?, port);
        let mut front = tokio::select! {
            _ = ctx.scope().cancelled() => return Ok(()),
            result = self.options.network.dial(&location) => result?,
        };
        front.write_all(&initial_data).await?;
        front.flush().await?;
        debug!("{} fronting to {}", ctx.log_prefix(), location);

        let stats = relay(
            ctx.scope(),
            ctx.conn_id(),
            &self.options.relay,
            &self.pool,
            front,
            client,
        )
        .await;
        self.report_traffic(ctx, stats);

        Ok(())
    }

    fn handshake_failed(&self, ctx: &StreamContext, reason: String) {
        self.options.events.send(Event::HandshakeFailed {
            conn_id: ctx.conn_id().to_string(),
            reason,
        });
    }

    fn report_traffic(&self, ctx: &StreamContext, stats: RelayStats) {
        for (direction, bytes) in [
            (TrafficDirection::ClientToTelegram, stats.client_to_telegram),
            (TrafficDirection::TelegramToClient, stats.telegram_to_client),
        ] {
            self.options.events.send(Event::Traffic {
                conn_id: ctx.conn_id().to_string(),
                direction,
                bytes,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::StaticIpBlocklist;
    use crate::client;
    use crate::dc::DcAddresses;
    use crate::events::ChannelEventStream;
    use crate::faketls::build_client_hello;
    use std::time::SystemTime;
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_secret() -> Secret {
        Secret {
            key: [0x44; 32],
            host: "127.0.0.1".to_string(),
        }
    }

    fn remote() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    /// Echo server speaking the data-center side of the obfuscated handshake.
    async fn start_fake_dc() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (_, mut stream) = Obfuscator::plain().accept(Box::new(stream)).await.unwrap();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                        let _ = stream.flush().await;
                    }
                });
            }
        });
        addr
    }

    fn test_options(
        secret: Secret,
        dc_addr: Option<SocketAddr>,
    ) -> (ProxyOptions, UnboundedReceiver<Event>) {
        let (events, receiver) = ChannelEventStream::new();
        let mut options = ProxyOptions::new(secret);
        options.events = Arc::new(events);
        options.handshake_timeout = Duration::from_secs(5);
        options.relay = RelayOptions {
            buffer_size: 4096,
            idle_tick: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(5),
        };
        let mut addresses = DcAddresses::default();
        if let Some(addr) = dc_addr {
            addresses.add(2, addr);
        }
        options.dc_book = Arc::new(DcAddressBook::new(addresses, PreferIp::PreferIpv4));
        (options, receiver)
    }

    async fn wait_for<F>(receiver: &mut UnboundedReceiver<Event>, predicate: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = receiver.recv().await.unwrap();
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_echo_through_proxy() {
        let dc_addr = start_fake_dc().await;
        let pool = BufferPool::new(4096, 4);

        for mode in [ProxyMode::FakeTls, ProxyMode::Obfuscated] {
            let secret = test_secret();
            let (mut options, mut receiver) = test_options(secret.clone(), Some(dc_addr));
            options.mode = mode;
            let proxy = Proxy::new(options);

            let (client_side, proxy_side) = duplex(64 * 1024);
            proxy.handle_stream(Box::new(proxy_side), remote());

            let mut stream = client::connect(Box::new(client_side), &secret, mode, 2, &pool)
                .await
                .unwrap();
            let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 199) as u8).collect();
            stream.write_all(&payload).await.unwrap();
            stream.flush().await.unwrap();

            let mut echoed = vec![0u8; payload.len()];
            stream.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, payload, "{mode:?}");

            let connected = wait_for(&mut receiver, |e| {
                matches!(e, Event::ConnectedToDc { .. })
            })
            .await;
            assert!(matches!(connected, Event::ConnectedToDc { dc: 2, .. }));

            drop(stream);
            let traffic = wait_for(&mut receiver, |e| matches!(e, Event::Traffic { .. })).await;
            assert_eq!(
                traffic,
                Event::Traffic {
                    conn_id: connected.conn_id().unwrap().to_string(),
                    direction: TrafficDirection::ClientToTelegram,
                    bytes: payload.len() as u64,
                }
            );
            wait_for(&mut receiver, |e| matches!(e, Event::Finish { .. })).await;

            proxy.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_rejects_without_queueing() {
        let (mut options, mut receiver) = test_options(test_secret(), None);
        options.concurrency = 1;
        let proxy = Proxy::new(options);

        let (_first_client, first_proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(first_proxy_side), remote());
        wait_for(&mut receiver, |e| matches!(e, Event::Start { .. })).await;

        let (mut second_client, second_proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(second_proxy_side), remote());
        let event = wait_for(&mut receiver, |e| {
            matches!(e, Event::ConcurrencyLimited { .. })
        })
        .await;
        assert_eq!(event, Event::ConcurrencyLimited { remote: remote() });

        let mut buf = [0u8; 1];
        assert_eq!(second_client.read(&mut buf).await.unwrap(), 0);

        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_blocklisted_address_is_closed() {
        let (mut options, mut receiver) = test_options(test_secret(), None);
        options.blocklist = Arc::new(StaticIpBlocklist::parse(&["192.0.2.0/24"]).unwrap());
        let proxy = Proxy::new(options);

        let (mut client_side, proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(proxy_side), remote());

        let event = wait_for(&mut receiver, |_| true).await;
        assert_eq!(
            event,
            Event::IpBlocklisted {
                remote: remote().ip()
            }
        );
        let mut buf = [0u8; 1];
        assert_eq!(client_side.read(&mut buf).await.unwrap(), 0);
        assert_eq!(proxy.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_replayed_client_hello_is_rejected() {
        let secret = test_secret();
        let (options, mut receiver) = test_options(secret.clone(), None);
        let proxy = Proxy::new(options);

        let hello = build_client_hello(&secret, &secret.host, SystemTime::now(), &[9; 32]).unwrap();

        let (mut first, first_proxy_side) = duplex(64 * 1024);
        proxy.handle_stream(Box::new(first_proxy_side), remote());
        first.write_all(&hello).await.unwrap();
        let mut welcome_start = [0u8; 3];
        first.read_exact(&mut welcome_start).await.unwrap();
        assert_eq!(welcome_start, [0x16, 0x03, 0x03]);

        let (mut second, second_proxy_side) = duplex(64 * 1024);
        proxy.handle_stream(Box::new(second_proxy_side), remote());
        second.write_all(&hello).await.unwrap();

        wait_for(&mut receiver, |e| matches!(e, Event::ReplayAttack { .. })).await;
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap(), 0);

        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_unauthenticated_client_is_fronted() {
        let web = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let web_port = web.local_addr().unwrap().port();

        let foreign = Secret {
            key: [0x45; 32],
            host: "127.0.0.1".to_string(),
        };
        let hello = build_client_hello(&foreign, "127.0.0.1", SystemTime::now(), &[]).unwrap();

        let expected = hello.clone();
        let web_server = tokio::spawn(async move {
            let (mut stream, _) = web.accept().await.unwrap();
            let mut received = vec![0u8; expected.len()];
            stream.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
            stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        });

        let (mut options, mut receiver) = test_options(test_secret(), None);
        options.domain_fronting_port = Some(web_port);
        let proxy = Proxy::new(options);

        let (mut client_side, proxy_side) = duplex(64 * 1024);
        proxy.handle_stream(Box::new(proxy_side), remote());
        client_side.write_all(&hello).await.unwrap();

        let mut response = vec![];
        client_side.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 200 OK\r\n\r\n");
        web_server.await.unwrap();

        let failed = wait_for(&mut receiver, |e| matches!(e, Event::HandshakeFailed { .. })).await;
        assert!(matches!(failed, Event::HandshakeFailed { reason, .. } if reason == "bad digest"));
        wait_for(&mut receiver, |e| matches!(e, Event::DomainFronting { .. })).await;

        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_plain_http_is_fronted() {
        let request = b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n".to_vec();

        let web = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let web_port = web.local_addr().unwrap().port();
        let expected = request.clone();
        let web_server = tokio::spawn(async move {
            let (mut stream, _) = web.accept().await.unwrap();
            let mut received = vec![0u8; expected.len()];
            stream.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
            stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.unwrap();
        });

        let (mut options, mut receiver) = test_options(test_secret(), None);
        options.domain_fronting_port = Some(web_port);
        let proxy = Proxy::new(options);

        let (mut client_side, proxy_side) = duplex(64 * 1024);
        proxy.handle_stream(Box::new(proxy_side), remote());
        client_side.write_all(&request).await.unwrap();

        let mut response = vec![];
        client_side.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n");
        web_server.await.unwrap();

        let failed = wait_for(&mut receiver, |e| matches!(e, Event::HandshakeFailed { .. })).await;
        assert!(
            matches!(failed, Event::HandshakeFailed { reason, .. } if reason == "unsupported record type: 0x47")
        );
        wait_for(&mut receiver, |e| matches!(e, Event::DomainFronting { .. })).await;

        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_short_garbage_is_fronted() {
        let web = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let web_port = web.local_addr().unwrap().port();
        let web_server = tokio::spawn(async move {
            let (mut stream, _) = web.accept().await.unwrap();
            let mut received = vec![];
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let (mut options, _receiver) = test_options(test_secret(), None);
        options.domain_fronting_port = Some(web_port);
        let proxy = Proxy::new(options);

        let (mut client_side, proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(proxy_side), remote());
        client_side.write_all(&[0x16, 0x03]).await.unwrap();
        client_side.shutdown().await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), web_server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, [0x16, 0x03]);

        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_replayed_obfuscated_frame_is_rejected() {
        let dc_addr = start_fake_dc().await;
        let secret = test_secret();
        let (mut options, mut receiver) = test_options(secret.clone(), Some(dc_addr));
        options.mode = ProxyMode::Obfuscated;
        let proxy = Proxy::new(options);

        let (wire, _) = Obfuscator::with_secret(&secret).generate_frame(2);

        let (mut first, first_proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(first_proxy_side), remote());
        first.write_all(&wire).await.unwrap();
        wait_for(&mut receiver, |e| matches!(e, Event::ConnectedToDc { .. })).await;

        let (mut second, second_proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(second_proxy_side), remote());
        second.write_all(&wire).await.unwrap();

        let replay = wait_for(&mut receiver, |e| {
            matches!(e, Event::ReplayAttack { .. } | Event::ConnectedToDc { .. })
        })
        .await;
        assert!(matches!(replay, Event::ReplayAttack { .. }));
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap(), 0);

        drop(first);
        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_obfuscated_handshake() {
        let (mut options, mut receiver) = test_options(test_secret(), None);
        options.mode = ProxyMode::Obfuscated;
        let proxy = Proxy::new(options);

        let (client_side, proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(proxy_side), remote());

        let foreign = Secret {
            key: [0x01; 32],
            host: String::new(),
        };
        let pool = BufferPool::new(1024, 1);
        let _stream = client::connect(Box::new(client_side), &foreign, ProxyMode::Obfuscated, 2, &pool)
            .await
            .unwrap();

        let failed = wait_for(&mut receiver, |e| matches!(e, Event::HandshakeFailed { .. })).await;
        assert!(
            matches!(failed, Event::HandshakeFailed { reason, .. } if reason == "unsupported connection type")
        );

        proxy.shutdown().await;
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let (mut options, mut receiver) = test_options(test_secret(), None);
        options.handshake_timeout = Duration::from_millis(100);
        let proxy = Proxy::new(options);

        let (_client_side, proxy_side) = duplex(1024);
        proxy.handle_stream(Box::new(proxy_side), remote());

        let failed = wait_for(&mut receiver, |e| matches!(e, Event::HandshakeFailed { .. })).await;
        assert!(
            matches!(failed, Event::HandshakeFailed { reason, .. } if reason == "handshake timed out")
        );
        wait_for(&mut receiver, |e| matches!(e, Event::Finish { .. })).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving_and_cancels_streams() {
        let (options, mut receiver) = test_options(test_secret(), None);
        let proxy = Proxy::new(options);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = proxy.clone();
        let server = tokio::spawn(async move { serving.serve(listener).await });

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        wait_for(&mut receiver, |e| matches!(e, Event::Start { .. })).await;
        assert_eq!(proxy.active_connections(), 1);

        tokio::time::timeout(Duration::from_secs(5), proxy.shutdown())
            .await
            .unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(proxy.active_connections(), 0);

        let mut buf = [0u8; 1];
        let closed = matches!(client.read(&mut buf).await, Ok(0) | Err(_));
        assert!(closed);
        wait_for(&mut receiver, |e| matches!(e, Event::Finish { .. })).await;
    }
}
