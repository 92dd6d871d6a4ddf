//! Data-center address book.
//!
//! Readers take a snapshot (`Arc<DcAddresses>`) and never hold the lock while
//! dialing; `replace` swaps in a new table atomically.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::obfuscated::DEFAULT_DC;

pub const DC_PORT: u16 = 443;

const DEFAULT_V4: [(i32, Ipv4Addr); 5] = [
    (1, Ipv4Addr::new(149, 154, 175, 50)),
    (2, Ipv4Addr::new(149, 154, 167, 51)),
    (3, Ipv4Addr::new(149, 154, 175, 100)),
    (4, Ipv4Addr::new(149, 154, 167, 91)),
    (5, Ipv4Addr::new(149, 154, 171, 5)),
];

const DEFAULT_V6: [(i32, Ipv6Addr); 5] = [
    (1, Ipv6Addr::new(0x2001, 0xb28, 0xf23d, 0xf001, 0, 0, 0, 0xa)),
    (2, Ipv6Addr::new(0x2001, 0x67c, 0x04e8, 0xf002, 0, 0, 0, 0xa)),
    (3, Ipv6Addr::new(0x2001, 0xb28, 0xf23d, 0xf003, 0, 0, 0, 0xa)),
    (4, Ipv6Addr::new(0x2001, 0x67c, 0x04e8, 0xf004, 0, 0, 0, 0xa)),
    (5, Ipv6Addr::new(0x2001, 0xb28, 0xf23f, 0xf005, 0, 0, 0, 0xa)),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferIp {
    #[default]
    PreferIpv4,
    PreferIpv6,
    OnlyIpv4,
    OnlyIpv6,
}

#[derive(Debug, Clone, Default)]
pub struct DcAddresses {
    v4: HashMap<i32, Vec<SocketAddr>>,
    v6: HashMap<i32, Vec<SocketAddr>>,
}

impl DcAddresses {
    pub fn builtin() -> Self {
        let mut addresses = Self::default();
        for (dc, ip) in DEFAULT_V4 {
            addresses.add(dc, SocketAddr::new(IpAddr::V4(ip), DC_PORT));
        }
        for (dc, ip) in DEFAULT_V6 {
            addresses.add(dc, SocketAddr::new(IpAddr::V6(ip), DC_PORT));
        }
        addresses
    }

    pub fn add(&mut self, dc: i32, addr: SocketAddr) {
        let table = if addr.is_ipv4() {
            &mut self.v4
        } else {
            &mut self.v6
        };
        table.entry(dc).or_default().push(addr);
    }

    /// Replaces every address of `dc` with `addrs`.
    pub fn set(&mut self, dc: i32, addrs: &[SocketAddr]) {
        self.v4.remove(&dc);
        self.v6.remove(&dc);
        for addr in addrs {
            self.add(dc, *addr);
        }
    }

    pub fn contains(&self, dc: i32) -> bool {
        self.v4.contains_key(&dc) || self.v6.contains_key(&dc)
    }

    fn ordered(&self, dc: i32, prefer_ip: PreferIp) -> Vec<SocketAddr> {
        let v4 = self.v4.get(&dc).map(Vec::as_slice).unwrap_or_default();
        let v6 = self.v6.get(&dc).map(Vec::as_slice).unwrap_or_default();
        match prefer_ip {
            PreferIp::PreferIpv4 => v4.iter().chain(v6).copied().collect(),
            PreferIp::PreferIpv6 => v6.iter().chain(v4).copied().collect(),
            PreferIp::OnlyIpv4 => v4.to_vec(),
            PreferIp::OnlyIpv6 => v6.to_vec(),
        }
    }
}

#[derive(Debug)]
pub struct DcAddressBook {
    snapshot: RwLock<Arc<DcAddresses>>,
    prefer_ip: PreferIp,
}

impl DcAddressBook {
    pub fn new(addresses: DcAddresses, prefer_ip: PreferIp) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(addresses)),
            prefer_ip,
        }
    }

    pub fn builtin(prefer_ip: PreferIp) -> Self {
        Self::new(DcAddresses::builtin(), prefer_ip)
    }

    pub fn snapshot(&self) -> Arc<DcAddresses> {
        self.snapshot.read().clone()
    }

    pub fn replace(&self, addresses: DcAddresses) {
        *self.snapshot.write() = Arc::new(addresses);
    }

    /// Addresses to try for `dc`, in preference order. Unknown data-centers
    /// fall back to the default one.
    pub fn addresses(&self, dc: i32) -> Vec<SocketAddr> {
        let snapshot = self.snapshot();
        let addrs = snapshot.ordered(dc, self.prefer_ip);
        if !addrs.is_empty() {
            return addrs;
        }

        warn!("Unknown dc {dc}, falling back to dc {DEFAULT_DC}");
        snapshot.ordered(DEFAULT_DC, self.prefer_ip)
    }
}
