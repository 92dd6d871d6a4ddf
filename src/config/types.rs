//! Configuration types.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::address::{AddressMask, NetLocation};
use crate::dc::PreferIp;
use crate::option_util::{NoneOrSome, OneOrSome};
use crate::proxy::{DEFAULT_ANTI_REPLAY_MAX_ENTRIES, DEFAULT_CONCURRENCY, ProxyMode};
use crate::relay::DEFAULT_BUFFER_SIZE;
use crate::secret::Secret;

pub fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_tolerate_time_skew_secs() -> u64 {
    5
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_idle_tick_millis() -> u64 {
    50
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_anti_replay_max_entries() -> usize {
    DEFAULT_ANTI_REPLAY_MAX_ENTRIES
}

fn default_anti_replay_ttl_secs() -> u64 {
    3600
}

/// One listening proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: NetLocation,
    pub secret: Secret,
    /// Defaults to fake-TLS when the secret carries a hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ProxyMode>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub prefer_ip: PreferIp,
    #[serde(default = "default_tolerate_time_skew_secs")]
    pub tolerate_time_skew_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_fronting_port: Option<u16>,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_idle_tick_millis")]
    pub idle_tick_millis: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_true")]
    pub tcp_no_delay: bool,
    #[serde(default, skip_serializing_if = "NoneOrSome::is_unspecified")]
    pub blocklist: NoneOrSome<AddressMask>,
    #[serde(default)]
    pub anti_replay: AntiReplayConfig,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub dc_overrides: HashMap<i32, OneOrSome<SocketAddr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_interface: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AntiReplayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_anti_replay_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_anti_replay_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for AntiReplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_anti_replay_max_entries(),
            ttl_secs: default_anti_replay_ttl_secs(),
        }
    }
}
