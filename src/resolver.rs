use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use log::debug;

use crate::address::NetLocation;

pub trait Resolver: Send + Sync {
    fn resolve_location(
        &self,
        location: &NetLocation,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<SocketAddr>>> + Send>>;
}

#[derive(Debug, Default)]
pub struct NativeResolver;

impl NativeResolver {
    pub fn new() -> Self {
        NativeResolver {}
    }
}

impl Resolver for NativeResolver {
    fn resolve_location(
        &self,
        location: &NetLocation,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<SocketAddr>>> + Send>> {
        if let Some(addr) = location.to_socket_addr_nonblocking() {
            return Box::pin(std::future::ready(Ok(vec![addr])));
        }

        let address = location.address().clone();
        let port = location.port();
        use futures::future::FutureExt;
        Box::pin(
            tokio::net::lookup_host((address.to_string(), port)).map(move |result| {
                let ret = result.map(|r| {
                    r.filter(|addr| !addr.ip().is_unspecified())
                        .collect::<Vec<_>>()
                });
                debug!("NativeResolver resolved {address}:{port} -> {ret:?}");
                ret
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_locations_skip_lookup() {
        let location = NetLocation::from_str("192.0.2.10:443", None).unwrap();
        let addrs = NativeResolver::new()
            .resolve_location(&location)
            .await
            .unwrap();
        assert_eq!(addrs, vec!["192.0.2.10:443".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_localhost_resolves() {
        let location = NetLocation::from_str("localhost:8080", None).unwrap();
        let addrs = NativeResolver::new()
            .resolve_location(&location)
            .await
            .unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|addr| addr.port() == 8080));
    }
}
