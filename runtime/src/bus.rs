//! Notification bus.
//!
//! Successful transactions publish their notifications here. Each
//! notification gets a sequence number, is broadcast to live subscribers,
//! and is kept in a bounded history for late readers. The sequence is
//! assigned and the broadcast sent under one lock, so every subscriber
//! sees notifications in sequence order.

use crate::metrics::NotificationMetrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

/// A notification with its position in the global order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published<N> {
    /// Position in publication order, starting at 0
    pub sequence: u64,
    /// The notification itself
    pub notification: N,
}

#[derive(Debug)]
struct BusState<N> {
    next_sequence: u64,
    history: VecDeque<Published<N>>,
}

/// Ordered broadcast channel with bounded history
#[derive(Debug)]
pub struct NotificationBus<N> {
    sender: broadcast::Sender<Published<N>>,
    state: Mutex<BusState<N>>,
    capacity: usize,
}

impl<N: Clone> NotificationBus<N> {
    /// Creates a bus keeping at most `capacity` notifications
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            state: Mutex::new(BusState {
                next_sequence: 0,
                history: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Publishes a notification and returns its sequence number
    pub fn publish(&self, notification: N) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = state.next_sequence;
        state.next_sequence = sequence.saturating_add(1);

        let published = Published {
            sequence,
            notification,
        };

        if state.history.len() >= self.capacity {
            state.history.pop_front();
        }
        state.history.push_back(published.clone());

        // No live subscribers is fine; history still has it
        let receivers = self.sender.send(published).unwrap_or(0);
        NotificationMetrics::record_publish(receivers);

        tracing::trace!(sequence, receivers, "Notification published");
        sequence
    }

    /// Subscribes to notifications published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Published<N>> {
        self.sender.subscribe()
    }

    /// Retained notifications, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<Published<N>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Number of notifications ever published
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_sequence
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Maximum retained notifications
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let bus = NotificationBus::new(2);
        bus.publish("created");
        bus.publish("purchased");
        bus.publish("refunded");

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 1);
        assert_eq!(history[1].notification, "refunded");
        assert_eq!(bus.published_count(), 3);
    }

    #[tokio::test]
    async fn test_subscribers_see_sequence_order() {
        let bus = NotificationBus::new(8);
        let mut receiver = bus.subscribe();

        bus.publish("created");
        bus.publish("purchased");

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!((first.sequence, first.notification), (0, "created"));
        assert_eq!((second.sequence, second.notification), (1, "purchased"));
    }
}
