//! Fan-out of reload notifications to connected browsers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

/// Buffered notifications per client; a slow client skips ahead instead.
const CAPACITY: usize = 16;

/// Cloneable handle for signalling "reload" to every live-reload client.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    tx: broadcast::Sender<u64>,
    generation: Arc<AtomicU64>,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self {
            tx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Notify every connected client. Returns how many were reached.
    pub fn reload(&self) -> usize {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let reached = self.tx.send(generation).unwrap_or(0);
        debug!(generation, clients = reached, "reload broadcast");
        reached
    }

    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn clients(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reload_reaches_subscribers() {
        let hub = ReloadHub::new();
        assert_eq!(hub.reload(), 0);

        let mut rx = hub.subscribe();
        assert_eq!(hub.clients(), 1);
        assert_eq!(hub.reload(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
