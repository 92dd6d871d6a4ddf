//! Outbound connections to data-centers and fronting domains.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use tokio::time::timeout;

use crate::address::NetLocation;
use crate::async_stream::AsyncStream;
use crate::resolver::{NativeResolver, Resolver};
use crate::socket_util::new_tcp_socket;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Network: Send + Sync {
    async fn dial(&self, location: &NetLocation) -> std::io::Result<Box<dyn AsyncStream>>;
}

/// Plain TCP dialer. Every resolved address is tried in order until one
/// connects within `connect_timeout`.
pub struct NativeNetwork {
    resolver: Arc<dyn Resolver>,
    bind_interface: Option<String>,
    connect_timeout: Duration,
    no_delay: bool,
}

impl NativeNetwork {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        bind_interface: Option<String>,
        connect_timeout: Duration,
        no_delay: bool,
    ) -> Self {
        Self {
            resolver,
            bind_interface,
            connect_timeout,
            no_delay,
        }
    }
}

impl Default for NativeNetwork {
    fn default() -> Self {
        Self::new(
            Arc::new(NativeResolver::new()),
            None,
            DEFAULT_CONNECT_TIMEOUT,
            true,
        )
    }
}

#[async_trait]
impl Network for NativeNetwork {
    async fn dial(&self, location: &NetLocation) -> std::io::Result<Box<dyn AsyncStream>> {
        let addrs = self.resolver.resolve_location(location).await?;
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("could not resolve location: {location}"),
            ));
        }

        let mut last_error = None;
        for target_addr in addrs {
            let tcp_socket = new_tcp_socket(self.bind_interface.as_deref(), target_addr.is_ipv6())?;
            let stream = match timeout(self.connect_timeout, tcp_socket.connect(target_addr)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!("Failed to connect to {target_addr}: {e}");
                    last_error = Some(e);
                    continue;
                }
                Err(_) => {
                    debug!("Timed out connecting to {target_addr}");
                    last_error = Some(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect to {target_addr} timed out"),
                    ));
                    continue;
                }
            };

            if self.no_delay
                && let Err(e) = stream.set_nodelay(true)
            {
                error!("Failed to set TCP no-delay: {e}");
            }

            return Ok(Box::new(stream));
        }

        Err(last_error.unwrap_or_else(|| {
            std::io::Error::other(format!("could not connect to {location}"))
        }))
    }
}
