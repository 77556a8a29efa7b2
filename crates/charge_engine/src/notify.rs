use charge_core::StationEvent;
use tokio::sync::broadcast;

/// Receives committed station events. Delivery is best effort and must never block.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &StationEvent);
}

/// Logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &StationEvent) {
        tracing::debug!("Station event: {:?}", event);
    }
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StationEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &StationEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charge_core::{PileId, PileStatus};

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let event = StationEvent::PileStatusChanged {
            pile: PileId(1),
            code: "A".into(),
            status: PileStatus::Busy,
        };
        notifier.notify(&event);

        let mut receiver = notifier.subscribe();
        notifier.notify(&event);

        assert_eq!(receiver.recv().await.unwrap(), event);
    }
}
