//! Configuration validation - checks a ServerConfig and builds the proxy's
//! runtime options from it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::antireplay::{AntiReplayCache, NoopAntiReplayCache, TimedAntiReplayCache};
use crate::blocklist::{IpBlocklist, NoopIpBlocklist, StaticIpBlocklist};
use crate::dc::{DcAddressBook, DcAddresses};
use crate::network::NativeNetwork;
use crate::proxy::{ProxyMode, ProxyOptions};
use crate::relay::RelayOptions;
use crate::resolver::NativeResolver;

use super::types::ServerConfig;

const MIN_BUFFER_SIZE: usize = 1024;
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// A validated config, ready to be started.
pub struct ProxyServerConfig {
    pub bind_address: SocketAddr,
    pub options: ProxyOptions,
}

fn invalid(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
}

pub fn create_server_configs(
    configs: Vec<ServerConfig>,
) -> std::io::Result<Vec<ProxyServerConfig>> {
    let mut server_configs = Vec::with_capacity(configs.len());
    for config in configs {
        let server_config = create_server_config(config)?;
        if server_configs
            .iter()
            .any(|c: &ProxyServerConfig| c.bind_address == server_config.bind_address)
        {
            return Err(invalid(format!(
                "bind address already in use by another config: {}",
                server_config.bind_address
            )));
        }
        server_configs.push(server_config);
    }
    Ok(server_configs)
}

pub fn create_server_config(config: ServerConfig) -> std::io::Result<ProxyServerConfig> {
    let ServerConfig {
        bind,
        secret,
        mode,
        concurrency,
        prefer_ip,
        tolerate_time_skew_secs,
        domain_fronting_port,
        handshake_timeout_secs,
        idle_timeout_secs,
        idle_tick_millis,
        buffer_size,
        tcp_no_delay,
        blocklist,
        anti_replay,
        dc_overrides,
        bind_interface,
        connect_timeout_secs,
    } = config;

    let bind_address = bind
        .to_socket_addr_nonblocking()
        .ok_or_else(|| invalid(format!("bind address must be an ip address: {bind}")))?;

    if !secret.valid() {
        return Err(invalid(format!("secret for {bind} has an all-zero key")));
    }

    let mode = mode.unwrap_or_else(|| ProxyMode::for_secret(&secret));
    if mode == ProxyMode::FakeTls && !secret.supports_fake_tls() {
        return Err(invalid(format!(
            "fake_tls mode on {bind} requires a secret with a hostname"
        )));
    }
    if domain_fronting_port.is_some() && mode != ProxyMode::FakeTls {
        return Err(invalid(format!(
            "domain_fronting_port on {bind} requires fake_tls mode"
        )));
    }

    if concurrency == 0 {
        return Err(invalid(format!("concurrency on {bind} must be positive")));
    }
    if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&buffer_size) {
        return Err(invalid(format!(
            "buffer_size on {bind} must be between {MIN_BUFFER_SIZE} and {MAX_BUFFER_SIZE}, got {buffer_size}"
        )));
    }
    if handshake_timeout_secs == 0 || connect_timeout_secs == 0 {
        return Err(invalid(format!("timeouts on {bind} must be positive")));
    }

    let idle_tick = Duration::from_millis(idle_tick_millis);
    let idle_timeout = Duration::from_secs(idle_timeout_secs);
    if idle_tick.is_zero() {
        return Err(invalid(format!("idle_tick_millis on {bind} must be positive")));
    }
    if idle_timeout < idle_tick {
        return Err(invalid(format!(
            "idle_timeout_secs on {bind} is shorter than the idle tick"
        )));
    }

    let masks = blocklist.into_vec();
    let blocklist: Arc<dyn IpBlocklist> = if masks.is_empty() {
        Arc::new(NoopIpBlocklist)
    } else {
        Arc::new(StaticIpBlocklist::new(masks))
    };

    let anti_replay: Arc<dyn AntiReplayCache> = if anti_replay.enabled {
        if anti_replay.max_entries == 0 {
            return Err(invalid(format!(
                "anti_replay.max_entries on {bind} must be positive"
            )));
        }
        Arc::new(TimedAntiReplayCache::new(
            anti_replay.max_entries,
            Duration::from_secs(anti_replay.ttl_secs),
        ))
    } else {
        Arc::new(NoopAntiReplayCache)
    };

    let mut dc_addresses = DcAddresses::builtin();
    for (dc, addrs) in dc_overrides {
        if dc <= 0 {
            return Err(invalid(format!(
                "dc_overrides on {bind} must use positive dc numbers, got {dc}"
            )));
        }
        dc_addresses.set(dc, addrs.as_slice());
    }

    let network = NativeNetwork::new(
        Arc::new(NativeResolver::new()),
        bind_interface,
        Duration::from_secs(connect_timeout_secs),
        tcp_no_delay,
    );

    let mut options = ProxyOptions::new(secret);
    options.mode = mode;
    options.concurrency = concurrency;
    options.tolerate_time_skew = Duration::from_secs(tolerate_time_skew_secs);
    options.domain_fronting_port = domain_fronting_port;
    options.handshake_timeout = Duration::from_secs(handshake_timeout_secs);
    options.relay = RelayOptions {
        buffer_size,
        idle_tick,
        idle_timeout,
    };
    options.tcp_no_delay = tcp_no_delay;
    options.network = Arc::new(network);
    options.blocklist = blocklist;
    options.anti_replay = anti_replay;
    options.dc_book = Arc::new(DcAddressBook::new(dc_addresses, prefer_ip));

    Ok(ProxyServerConfig {
        bind_address,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    const TLS_SECRET: &str = "ee0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef6578616d706c652e636f6d";
    const PLAIN_SECRET: &str = "dd0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn parse(extra: &str, secret: &str) -> ServerConfig {
        let yaml = format!("bind: 127.0.0.1:8443\nsecret: {secret}\n{extra}");
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_defaults_follow_secret() {
        let config = create_server_config(parse("", TLS_SECRET)).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(config.options.mode, ProxyMode::FakeTls);

        let config = create_server_config(parse("", PLAIN_SECRET)).unwrap();
        assert_eq!(config.options.mode, ProxyMode::Obfuscated);
    }

    #[test]
    fn test_fake_tls_needs_hostname() {
        let config = parse("mode: fake_tls\n", PLAIN_SECRET);
        assert!(create_server_config(config).is_err());
    }

    #[test]
    fn test_fronting_needs_fake_tls() {
        let config = parse("mode: obfuscated\ndomain_fronting_port: 443\n", TLS_SECRET);
        assert!(create_server_config(config).is_err());

        let config = parse("domain_fronting_port: 443\n", TLS_SECRET);
        let config = create_server_config(config).unwrap();
        assert_eq!(config.options.domain_fronting_port, Some(443));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        for extra in [
            "concurrency: 0\n",
            "buffer_size: 16\n",
            "idle_tick_millis: 0\n",
            "idle_timeout_secs: 0\nidle_tick_millis: 100\n",
            "handshake_timeout_secs: 0\n",
            "anti_replay:\n  max_entries: 0\n",
            "dc_overrides:\n  -2: 127.0.0.1:1\n",
        ] {
            let config = parse(extra, TLS_SECRET);
            assert!(create_server_config(config).is_err(), "accepted {extra:?}");
        }
    }

    #[test]
    fn test_hostname_bind_is_rejected() {
        let yaml = format!("bind: localhost:8443\nsecret: {TLS_SECRET}\n");
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(create_server_config(config).is_err());
    }

    #[test]
    fn test_blocklist_and_overrides_are_applied() {
        let config = parse(
            "blocklist: [10.0.0.0/8]\ndc_overrides:\n  2: 127.0.0.1:9999\nprefer_ip: only-ipv4\n",
            TLS_SECRET,
        );
        let config = create_server_config(config).unwrap();
        let blocked: IpAddr = "10.1.2.3".parse().unwrap();
        let allowed: IpAddr = "11.1.2.3".parse().unwrap();
        assert!(config.options.blocklist.contains(blocked));
        assert!(!config.options.blocklist.contains(allowed));
        assert_eq!(
            config.options.dc_book.addresses(2),
            vec!["127.0.0.1:9999".parse().unwrap()]
        );
    }

    #[test]
    fn test_disabled_anti_replay() {
        let config = parse("anti_replay:\n  enabled: false\n", TLS_SECRET);
        let config = create_server_config(config).unwrap();
        assert!(!config.options.anti_replay.seen_before(b"abc"));
        assert!(!config.options.anti_replay.seen_before(b"abc"));
    }

    #[test]
    fn test_duplicate_bind_addresses() {
        let configs = vec![parse("", TLS_SECRET), parse("", PLAIN_SECRET)];
        assert!(create_server_configs(configs).is_err());
    }
}
