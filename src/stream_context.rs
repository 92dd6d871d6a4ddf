use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio_util::sync::CancellationToken;

use crate::secret::encode_hex;

const CONN_ID_LEN: usize = 16;

/// Per-connection state: identity, peer, and a cancellation scope that is a
/// child of the proxy's root scope.
#[derive(Debug)]
pub struct StreamContext {
    conn_id: String,
    remote: SocketAddr,
    scope: CancellationToken,
    started: Instant,
    dc: Option<i32>,
}

impl StreamContext {
    pub fn new(root: &CancellationToken, remote: SocketAddr) -> Self {
        let mut id = [0u8; CONN_ID_LEN];
        rand::rng().fill_bytes(&mut id);
        Self {
            conn_id: encode_hex(&id),
            remote,
            scope: root.child_token(),
            started: Instant::now(),
            dc: None,
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn dc(&self) -> Option<i32> {
        self.dc
    }

    pub fn set_dc(&mut self, dc: i32) {
        self.dc = Some(dc);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancel(&self) {
        self.scope.cancel();
    }

    /// Prefix for log lines about this connection.
    pub fn log_prefix(&self) -> String {
        match self.dc {
            Some(dc) => format!("[{} {} dc={}]", self.conn_id, self.remote, dc),
            None => format!("[{} {}]", self.conn_id, self.remote),
        }
    }
}

impl Drop for StreamContext {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
