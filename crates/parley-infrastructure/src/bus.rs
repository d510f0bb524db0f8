//! In-process signal bus over a tokio broadcast channel.

use parley_core::signal::{Signal, SignalBus};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Fan-out bus: every subscriber receives every signal emitted after it
/// subscribed. Slow subscribers may observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastSignalBus {
    sender: broadcast::Sender<Signal>,
}

impl BroadcastSignalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus for BroadcastSignalBus {
    fn emit(&self, signal: Signal) {
        let name = signal.name();
        match self.sender.send(signal) {
            Ok(receivers) => trace!("[SignalBus] {} -> {} subscriber(s)", name, receivers),
            Err(_) => trace!("[SignalBus] {} dropped, no subscribers", name),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_signal() {
        let bus = BroadcastSignalBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(Signal::LoadRequested { id: "c1".to_string() });

        assert_eq!(a.recv().await.unwrap().name(), "conversation:load");
        assert_eq!(b.recv().await.unwrap().name(), "conversation:load");
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = BroadcastSignalBus::new();
        bus.emit(Signal::DeleteRequested { id: "c1".to_string() });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
