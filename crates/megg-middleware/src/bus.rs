//! Broadcast event bus.
//!
//! Uses [`tokio::sync::broadcast`] so that every subscriber receives every
//! event in publish order, and no subscriber can block the publisher or the
//! other subscribers. Each subscription has its own bounded window of
//! `capacity` events; a subscriber that falls further behind observes
//! [`RecvError::Lagged`] and is expected to give up.
//!
//! | Publisher | Subscribers |
//! |---|---|
//! | `Coordinator` (commands, ticks, link events) | one per connected client |

use megg_types::Event;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};

/// Events buffered per subscriber before it is considered stalled.
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clones share the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns how many subscribers were handed the event. Zero is normal:
    /// it just means no client is connected.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.payload.kind();
        match self.sender.send(event) {
            Ok(n) => {
                trace!(kind, receivers = n, "event published");
                n
            }
            Err(broadcast::error::SendError(_)) => {
                debug!(kind, "event dropped: no subscribers");
                0
            }
        }
    }

    /// Publish several events back to back, preserving their order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One subscriber's view of the bus.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// * `Err(RecvError::Lagged(n))` – this subscriber fell `n` events behind
    ///   and those events are gone.
    /// * `Err(RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use megg_types::Outbound;

    fn pong() -> Event {
        Event::new("megg-middleware::test", Outbound::Pong {})
    }

    #[tokio::test]
    async fn every_subscriber_receives_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let events: Vec<Event> = (0..3).map(|_| pong()).collect();
        bus.publish_all(events.clone());

        for expected in &events {
            assert_eq!(a.recv().await?.id, expected.id);
        }
        for expected in &events {
            assert_eq!(b.recv().await?.id, expected.id);
        }
        Ok(())
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(pong()), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut kept = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        let event = pong();
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(kept.recv().await?.id, event.id);
        assert_eq!(bus.receiver_count(), 1);
        Ok(())
    }

    /// A subscriber that never reads must observe `Lagged` instead of
    /// blocking the publisher.
    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::new(8);
        let mut slow = bus.subscribe();

        let publisher = async {
            for _ in 0..100 {
                bus.publish(pong());
            }
        };
        tokio::time::timeout(Duration::from_secs(1), publisher)
            .await
            .expect("publisher must never block");

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(92))));
        // The newest window is still readable.
        assert!(slow.recv().await.is_ok());
    }
}
