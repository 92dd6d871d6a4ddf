use std::net::IpAddr;

use crate::address::AddressMask;

pub trait IpBlocklist: Send + Sync {
    fn contains(&self, ip: IpAddr) -> bool;
}

#[derive(Debug, Default)]
pub struct NoopIpBlocklist;

impl IpBlocklist for NoopIpBlocklist {
    fn contains(&self, _ip: IpAddr) -> bool {
        false
    }
}

/// A fixed list of networks loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticIpBlocklist {
    masks: Vec<AddressMask>,
}

impl StaticIpBlocklist {
    pub fn new(masks: Vec<AddressMask>) -> Self {
        Self { masks }
    }

    pub fn parse<S: AsRef<str>>(networks: &[S]) -> std::io::Result<Self> {
        let masks = networks
            .iter()
            .map(|network| AddressMask::from(network.as_ref()))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self::new(masks))
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

impl IpBlocklist for StaticIpBlocklist {
    fn contains(&self, ip: IpAddr) -> bool {
        self.masks.iter().any(|mask| mask.matches(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_blocklist() {
        let blocklist = StaticIpBlocklist::parse(&["10.0.0.0/8", "2001:db8::/32", "192.0.2.1"])
            .unwrap();
        assert_eq!(blocklist.len(), 3);
        assert!(blocklist.contains("10.20.30.40".parse().unwrap()));
        assert!(blocklist.contains("2001:db8::7".parse().unwrap()));
        assert!(blocklist.contains("192.0.2.1".parse().unwrap()));
        assert!(!blocklist.contains("192.0.2.2".parse().unwrap()));
        assert!(!blocklist.contains("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_empty_blocklist_blocks_nothing() {
        let blocklist = StaticIpBlocklist::default();
        assert!(blocklist.is_empty());
        assert!(!blocklist.contains("10.0.0.1".parse().unwrap()));
        assert!(!NoopIpBlocklist.contains("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_network_is_rejected() {
        assert!(StaticIpBlocklist::parse(&["10.0.0.0/40"]).is_err());
    }
}
