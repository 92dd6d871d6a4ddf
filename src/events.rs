use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    ClientToTelegram,
    TelegramToClient,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start {
        conn_id: String,
        remote: SocketAddr,
    },
    ConnectedToDc {
        conn_id: String,
        dc: i32,
        address: SocketAddr,
    },
    Finish {
        conn_id: String,
    },
    ConcurrencyLimited {
        remote: SocketAddr,
    },
    IpBlocklisted {
        remote: IpAddr,
    },
    ReplayAttack {
        conn_id: String,
    },
    DomainFronting {
        conn_id: String,
    },
    Traffic {
        conn_id: String,
        direction: TrafficDirection,
        bytes: u64,
    },
    HandshakeFailed {
        conn_id: String,
        reason: String,
    },
}

impl Event {
    pub fn conn_id(&self) -> Option<&str> {
        match self {
            Event::Start { conn_id, .. }
            | Event::ConnectedToDc { conn_id, .. }
            | Event::Finish { conn_id }
            | Event::ReplayAttack { conn_id }
            | Event::DomainFronting { conn_id }
            | Event::Traffic { conn_id, .. }
            | Event::HandshakeFailed { conn_id, .. } => Some(conn_id),
            Event::ConcurrencyLimited { .. } | Event::IpBlocklisted { .. } => None,
        }
    }
}

pub trait EventStream: Send + Sync {
    fn send(&self, event: Event);
}

#[derive(Debug, Default)]
pub struct NoopEventStream;

impl EventStream for NoopEventStream {
    fn send(&self, _event: Event) {}
}

#[derive(Debug, Default)]
pub struct LogEventStream;

impl EventStream for LogEventStream {
    fn send(&self, event: Event) {
        match event {
            Event::Start { conn_id, remote } => {
                debug!("{conn_id} ({remote}) accepted");
            }
            Event::ConnectedToDc {
                conn_id,
                dc,
                address,
            } => {
                debug!("{conn_id} connected to dc {dc} at {address}");
            }
            Event::Finish { conn_id } => {
                debug!("{conn_id} finished");
            }
            Event::ConcurrencyLimited { remote } => {
                warn!("{remote} rejected: concurrency limit reached");
            }
            Event::IpBlocklisted { remote } => {
                info!("{remote} rejected: address is blocklisted");
            }
            Event::ReplayAttack { conn_id } => {
                warn!("{conn_id} replay attack detected");
            }
            Event::DomainFronting { conn_id } => {
                info!("{conn_id} forwarded to the fronting domain");
            }
            Event::Traffic {
                conn_id,
                direction,
                bytes,
            } => {
                debug!("{conn_id} {direction:?}: {bytes} bytes");
            }
            Event::HandshakeFailed { conn_id, reason } => {
                info!("{conn_id} handshake failed: {reason}");
            }
        }
    }
}

/// Forwards events to an unbounded channel. Events sent after the receiver
/// is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventStream {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelEventStream {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventStream for ChannelEventStream {
    fn send(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

pub struct MultiEventStream {
    streams: Vec<Arc<dyn EventStream>>,
}

impl MultiEventStream {
    pub fn new(streams: Vec<Arc<dyn EventStream>>) -> Self {
        Self { streams }
    }
}

impl EventStream for MultiEventStream {
    fn send(&self, event: Event) {
        if let Some((last, rest)) = self.streams.split_last() {
            for stream in rest {
                stream.send(event.clone());
            }
            last.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_stream_delivers_in_order() {
        let (stream, mut receiver) = ChannelEventStream::new();
        stream.send(Event::Finish {
            conn_id: "a".to_string(),
        });
        stream.send(Event::ReplayAttack {
            conn_id: "b".to_string(),
        });

        assert_eq!(receiver.recv().await.unwrap().conn_id(), Some("a"));
        assert_eq!(receiver.recv().await.unwrap().conn_id(), Some("b"));
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (stream, receiver) = ChannelEventStream::new();
        drop(receiver);
        stream.send(Event::Finish {
            conn_id: "a".to_string(),
        });
    }

    #[tokio::test]
    async fn test_multi_stream_fans_out() {
        let (first, mut first_rx) = ChannelEventStream::new();
        let (second, mut second_rx) = ChannelEventStream::new();
        let multi = MultiEventStream::new(vec![
            Arc::new(first),
            Arc::new(LogEventStream),
            Arc::new(second),
        ]);

        let event = Event::IpBlocklisted {
            remote: "10.0.0.1".parse().unwrap(),
        };
        multi.send(event.clone());

        assert_eq!(first_rx.recv().await.unwrap(), event);
        assert_eq!(second_rx.recv().await.unwrap(), event);
    }
}
