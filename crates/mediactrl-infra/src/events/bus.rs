use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Tuning knobs for an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the underlying broadcast channel. A slow subscriber
    /// that falls behind by more than this many events starts missing
    /// events (it will see `RecvError::Lagged` and can resync).
    pub broadcast_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct EventBusMetrics {
    published: AtomicU64,
    dropped_no_subscribers: AtomicU64,
}

/// A single-topic, multi-producer multi-consumer event bus for one event
/// type `T`. Each `mediactrl-packages` consumer (the Mixer or IVR package
/// runtime) owns one `EventBus<PackageEvent>` and hands out subscriptions
/// to whoever needs to observe callbacks without a direct dependency edge
/// back to `mediactrl-cfw`.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
    metrics: Arc<EventBusMetrics>,
}

impl<T: Clone + Send + 'static + Debug> EventBus<T> {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.broadcast_capacity);
        Self {
            sender,
            metrics: Arc::new(EventBusMetrics::default()),
        }
    }

    /// Publish an event to all current subscribers. Returns the number of
    /// subscribers it was delivered to (0 if none are listening, which is
    /// not an error — callbacks are best-effort fan-out, not a queue).
    pub fn publish(&self, event: T) -> usize {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                self.metrics
                    .dropped_no_subscribers
                    .fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn published_count(&self) -> u64 {
        self.metrics.published.load(Ordering::Relaxed)
    }
}

impl<T: Clone + Send + 'static + Debug> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus: EventBus<u32> = EventBus::new();
        let mut rx = bus.subscribe();
        let delivered = bus.publish(42);
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.publish(1), 0);
        assert_eq!(bus.published_count(), 1);
    }
}
