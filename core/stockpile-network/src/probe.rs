//! Active connectivity probing.

use crate::NetworkMonitor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Something that can tell whether the remote store is reachable.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true if the network is usable right now.
    async fn check(&self) -> bool;
}

/// Considers the network online when a TCP connection to `addr` succeeds.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    /// `host:port` to connect to.
    pub addr: String,
    /// Connect timeout.
    pub timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Probe connect failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "Probe timed out");
                false
            }
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Time between probes, in milliseconds.
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_ms: 15_000 }
    }
}

impl NetworkMonitor {
    /// Spawns a task that feeds `probe` readings into this monitor at a
    /// fixed interval. Abort the returned handle to stop polling.
    pub fn spawn_polling(&self, probe: Arc<dyn Probe>, config: PollConfig) -> JoinHandle<()> {
        let monitor = self.clone();
        let period = Duration::from_millis(config.interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let online = probe.check().await;
                monitor.set_online(online);
            }
        })
    }
}
