// =============================================================================
// Snapshot Broadcaster — fan-out to bounded subscriber queues
// =============================================================================
//
// Publishing never blocks: a full queue misses that snapshot (the consumer
// catches up with the next one) and a queue whose receiver is gone is pruned.
// Subscribers are removed by the token handed out at subscribe time.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::snapshot::Snapshot;

/// Opaque subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberToken(Uuid);

impl std::fmt::Display for SubscriberToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct SnapshotBroadcaster {
    subscribers: RwLock<HashMap<SubscriberToken, mpsc::Sender<Arc<Snapshot>>>>,
    capacity: usize,
}

impl SnapshotBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> (SubscriberToken, mpsc::Receiver<Arc<Snapshot>>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let token = SubscriberToken(Uuid::new_v4());
        self.subscribers.write().insert(token, tx);
        debug!(token = %token, "subscriber registered");
        (token, rx)
    }

    /// Returns `false` if the token was unknown (already removed or pruned).
    pub fn unsubscribe(&self, token: SubscriberToken) -> bool {
        let removed = self.subscribers.write().remove(&token).is_some();
        if removed {
            debug!(token = %token, "subscriber removed");
        }
        removed
    }

    /// Offer `snapshot` to every subscriber. Returns how many accepted it.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (token, tx) in subscribers.iter() {
                match tx.try_send(Arc::clone(&snapshot)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(token = %token, "subscriber queue full, snapshot dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*token),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for token in closed {
                subscribers.remove(&token);
                debug!(token = %token, "pruned closed subscriber");
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
