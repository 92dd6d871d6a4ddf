//! mtcloak - a relay proxy that disguises client traffic.
//!
//! Clients authenticate with a shared [`secret::Secret`], either through the
//! 64-byte obfuscated handshake or wrapped in fake TLS records that look like
//! a TLS 1.3 session with the secret's hostname. Authenticated connections are
//! relayed to the requested data-center.
//!
//! The binary is configured from YAML (see [`config`]); embedders can build a
//! [`proxy::ProxyOptions`] directly and drive a [`proxy::Proxy`].

pub mod address;
pub mod antireplay;
pub mod async_stream;
pub mod blocklist;
pub mod buffer_pool;
mod byte_reader;
pub mod client;
pub mod config;
pub mod dc;
pub mod error;
pub mod events;
pub mod faketls;
pub mod network;
pub mod obfuscated;
mod option_util;
pub mod proxy;
pub mod relay;
pub mod resolver;
pub mod secret;
pub mod socket_util;
pub mod stream_context;
