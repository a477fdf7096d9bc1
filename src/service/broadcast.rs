use crate::models::log_entry::LogEntry;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Fan-out of committed entries to live subscribers.
///
/// Each subscriber owns a bounded queue. A full queue drops its oldest entry
/// instead of blocking `publish`, and a subscriber that stays full for too
/// many publishes in a row is disconnected.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: Mutex<HashMap<u64, Slot>>,
    next_id: AtomicU64,
    queue_size: usize,
    max_overflows: u32,
}

struct Slot {
    sender: broadcast::Sender<Arc<LogEntry>>,
    /// Consecutive publishes that found the queue full
    overflows: u32,
}

/// What a subscriber gets next.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Entry(Arc<LogEntry>),
    /// This many entries were dropped from the front of the queue.
    Lagged(u64),
    /// The hub removed this subscriber; nothing more will arrive.
    Closed,
}

impl HubInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, Slot>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl BroadcastHub {
    /// `queue_size` is rounded up to a power of two.
    pub fn new(queue_size: usize, max_overflows: u32) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_size: queue_size.max(1).next_power_of_two(),
                max_overflows,
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = broadcast::channel(self.inner.queue_size);
        self.inner.subscribers().insert(
            id,
            Slot {
                sender,
                overflows: 0,
            },
        );
        debug!("Live subscriber {} connected", id);

        Subscription {
            id,
            receiver,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.inner.subscribers().remove(&id).is_some() {
            debug!("Live subscriber {} disconnected", id);
        }
    }

    /// Delivers to every current subscriber without waiting on any of them.
    pub fn publish(&self, entry: &LogEntry) {
        let entry = Arc::new(entry.clone());
        let queue_size = self.inner.queue_size;
        let max_overflows = self.inner.max_overflows;

        self.inner.subscribers().retain(|id, slot| {
            if slot.sender.len() >= queue_size {
                slot.overflows += 1;
                if slot.overflows > max_overflows {
                    warn!(
                        "Disconnecting live subscriber {}: queue full for {} consecutive entries",
                        id, slot.overflows
                    );
                    return false;
                }
            } else {
                slot.overflows = 0;
            }
            slot.sender.send(Arc::clone(&entry)).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<Arc<LogEntry>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Delivery {
        match self.receiver.recv().await {
            Ok(entry) => Delivery::Entry(entry),
            Err(RecvError::Lagged(skipped)) => Delivery::Lagged(skipped),
            Err(RecvError::Closed) => Delivery::Closed,
        }
    }

    /// Non-blocking variant; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        match self.receiver.try_recv() {
            Ok(entry) => Some(Delivery::Entry(entry)),
            Err(TryRecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(TryRecvError::Closed) => Some(Delivery::Closed),
            Err(TryRecvError::Empty) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.subscribers().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::log_entry::NewLogEntry;
    use chrono::Utc;

    fn entry(id: i64) -> LogEntry {
        NewLogEntry {
            source_ip: "10.0.0.1".to_string(),
            message: format!("entry {}", id),
            raw_message: format!("entry {}", id),
            ..Default::default()
        }
        .into_entry(id, Utc::now())
    }

    fn expect_entry(delivery: Option<Delivery>) -> i64 {
        match delivery {
            Some(Delivery::Entry(entry)) => entry.id,
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_every_subscriber_gets_entries_in_order() {
        let hub = BroadcastHub::new(16, 4);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        for id in 1..=3 {
            hub.publish(&entry(id));
        }

        for subscription in [&mut first, &mut second] {
            let ids: Vec<i64> = (0..3).map(|_| expect_entry(subscription.try_recv())).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert_eq!(subscription.try_recv(), None);
        }
    }

    #[test]
    fn test_late_subscriber_only_sees_later_entries() {
        let hub = BroadcastHub::new(16, 4);
        hub.publish(&entry(1));
        let mut late = hub.subscribe();
        hub.publish(&entry(2));

        assert_eq!(expect_entry(late.try_recv()), 2);
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = BroadcastHub::new(16, 4);
        let first = hub.subscribe();
        let second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(), 1);

        hub.unsubscribe(second.id());
        assert_eq!(hub.subscriber_count(), 0);
        drop(second);
        hub.publish(&entry(1));
    }

    #[test]
    fn test_slow_subscriber_drops_oldest_then_is_disconnected() {
        let hub = BroadcastHub::new(4, 2);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for id in 1..=7 {
            hub.publish(&entry(id));
            // The fast subscriber keeps up and is never penalised
            assert_eq!(expect_entry(fast.try_recv()), id);
        }

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(slow.try_recv(), Some(Delivery::Lagged(2)));
        let buffered: Vec<i64> = (0..4).map(|_| expect_entry(slow.try_recv())).collect();
        assert_eq!(buffered, vec![3, 4, 5, 6]);
        assert_eq!(slow.try_recv(), Some(Delivery::Closed));
    }

    #[test]
    fn test_overflow_count_resets_when_subscriber_catches_up() {
        let hub = BroadcastHub::new(2, 1);
        let mut subscription = hub.subscribe();

        hub.publish(&entry(1));
        hub.publish(&entry(2));
        hub.publish(&entry(3)); // full: first overflow
        while let Some(Delivery::Entry(_)) | Some(Delivery::Lagged(_)) = subscription.try_recv() {}

        hub.publish(&entry(4));
        hub.publish(&entry(5));
        hub.publish(&entry(6)); // full again, but the streak restarted
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_async_recv() {
        let hub = BroadcastHub::new(8, 2);
        let mut subscription = hub.subscribe();

        let publisher = hub.clone();
        tokio::spawn(async move {
            publisher.publish(&entry(10));
        });

        match subscription.recv().await {
            Delivery::Entry(entry) => assert_eq!(entry.id, 10),
            other => panic!("unexpected {:?}", other),
        }
    }
}
