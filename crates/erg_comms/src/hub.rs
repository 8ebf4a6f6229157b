use std::sync::atomic::{AtomicU64, Ordering};

use ahash::HashMap;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use erg_types::{BlockEvent, EventSink, WireEvent};

pub type SubscriberId = u64;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// In-process pub-sub for block events.
///
/// [`FirehoseHub::broadcast`] sends non-blocking to every registered channel:
/// a subscriber that falls behind its queue capacity loses events, and the
/// publisher's throughput never depends on the slowest reader.
pub struct FirehoseHub {
    subscribers: Mutex<HashMap<SubscriberId, Sender<BlockEvent>>>,
    next_id: AtomicU64,
    default_capacity: usize,
    dropped: AtomicU64,
}

impl Default for FirehoseHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FirehoseHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// A hub whose [`FirehoseHub::register`] hands out queues of `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::default()),
            next_id: AtomicU64::new(1),
            default_capacity: capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn register(&self) -> (SubscriberId, Receiver<BlockEvent>) {
        self.register_with_capacity(self.default_capacity)
    }

    /// Register with an explicit queue capacity — how far this subscriber may
    /// fall behind before it starts losing events.
    pub fn register_with_capacity(&self, capacity: usize) -> (SubscriberId, Receiver<BlockEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::bounded(capacity.max(1));
        self.subscribers.lock().insert(id, tx);
        erg_log::debug!(subscriber = id, capacity, "firehose subscriber registered");
        (id, rx)
    }

    pub fn unregister(&self, id: SubscriberId) {
        if self.subscribers.lock().remove(&id).is_some() {
            erg_log::debug!(subscriber = id, "firehose subscriber unregistered");
        }
    }

    /// Non-blocking fan-out. Never waits on a subscriber.
    pub fn broadcast(&self, event: &BlockEvent) {
        let mut gone = Vec::new();
        {
            let subscribers = self.subscribers.lock();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        erg_log::trace!(subscriber = id, "dropped event for slow subscriber");
                    }
                    Err(TrySendError::Disconnected(_)) => gone.push(*id),
                }
            }
        }
        if !gone.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in gone {
                subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Total events dropped on full subscriber queues, process-wide.
    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for FirehoseHub {
    fn publish(&self, event: &WireEvent) {
        if let WireEvent::Block(block) = event {
            self.broadcast(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> BlockEvent {
        BlockEvent {
            id: format!("b{n}"),
            datasource: "my_toy".to_owned(),
            ds_type: "toy".to_owned(),
            created_at: chrono::Utc::now(),
            text: format!("event {n}"),
            metadata: Default::default(),
        }
    }

    #[test]
    fn register_broadcast_unregister() {
        let hub = FirehoseHub::new();
        let (id, rx) = hub.register();
        assert_eq!(hub.subscriber_count(), 1);

        hub.broadcast(&event(0));
        assert_eq!(rx.recv().unwrap().id, "b0");

        hub.unregister(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let hub = FirehoseHub::new();
        let (_, rx) = hub.register();
        drop(rx);

        hub.broadcast(&event(0));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
