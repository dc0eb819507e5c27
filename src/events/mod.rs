//! Event system for session state notifications
//!
//! A process-wide bus that fans out signaling and session events to the
//! CLI log task and anything else that wants to observe the device.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting system events
///
/// # Example
///
/// ```no_run
/// use fieldcam::events::{EventBus, SystemEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::ReconnectScheduled {
///     attempt: 1,
///     delay_ms: 1500,
/// });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Events published while nobody is subscribed are dropped.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls more than the ring size behind gets a
    /// `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SystemEvent::CameraSwitched {
            from: Some("0".to_string()),
            to: "1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SystemEvent::CameraSwitched { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SystemEvent::NegotiationFailed {
            stage: "offer".to_string(),
            reason: "test".to_string(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SystemEvent::NegotiationFailed { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SystemEvent::NegotiationFailed { .. }
        ));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(SystemEvent::ControlsCommitted { steps: vec![] });
    }
}
