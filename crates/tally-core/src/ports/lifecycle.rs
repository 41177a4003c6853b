//! Host lifecycle port definition
//!
//! Mobile runtimes freeze outstanding network work when an app is
//! backgrounded; servers may pause work under memory pressure. Either way the
//! orchestrator only needs to know when the process left and re-entered the
//! foreground.

use tokio::sync::broadcast;

/// Default buffer for lifecycle subscriptions
pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 16;

/// Foreground/background transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foreground,
    Background,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Foreground => write!(f, "foreground"),
            LifecycleEvent::Background => write!(f, "background"),
        }
    }
}

/// Port for subscribing to lifecycle transitions
pub trait LifecycleSignal: Send + Sync {
    /// Returns a new receiver that observes every subsequent transition
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// In-process lifecycle source
///
/// Hosts that learn about suspension through their own callbacks call
/// [`LifecycleBroadcaster::emit`]; tests use it to script transitions.
#[derive(Debug, Clone)]
pub struct LifecycleBroadcaster {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publishes a transition, returning how many subscribers received it
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        tracing::debug!(%event, "Lifecycle transition");
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for LifecycleBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSignal for LifecycleBroadcaster {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let broadcaster = LifecycleBroadcaster::new();
        assert_eq!(broadcaster.emit(LifecycleEvent::Background), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let broadcaster = LifecycleBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        assert_eq!(broadcaster.emit(LifecycleEvent::Background), 1);
        assert_eq!(broadcaster.emit(LifecycleEvent::Foreground), 1);

        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Background);
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Foreground);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(LifecycleEvent::Foreground.to_string(), "foreground");
        assert_eq!(LifecycleEvent::Background.to_string(), "background");
    }
}
