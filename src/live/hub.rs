use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::identity::Role;
use crate::models::sessions::SessionStatus;

/// Wake-up signal for subscribers of one session. Message payloads are
/// never carried here: subscribers re-read the durable log from their cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    Appended { seq: i64 },
    Read { reader: Role },
    State { status: SessionStatus },
}

const CHANNEL_CAPACITY: usize = 64;

/// Per-session fan-out, independent from the locks that serialize writers.
#[derive(Clone, Default)]
pub struct LiveHub {
    // Map of session_id -> notifier
    channels: Arc<DashMap<Uuid, broadcast::Sender<LiveEvent>>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<LiveEvent> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish(&self, session_id: Uuid, event: LiveEvent) {
        let delivered = match self.channels.get(&session_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => return,
        };

        // Clean up sessions nobody is watching anymore
        if !delivered {
            self.channels
                .remove_if(&session_id, |_, sender| sender.receiver_count() == 0);
            tracing::trace!(session_id = %session_id, "dropped idle live channel");
        }
    }

    /// Drops channels whose subscribers have all gone. Covers sessions
    /// that will never publish again, such as ended ones.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.channels
            .get(&session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub fn active_sessions(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let hub = LiveHub::new();
        let id = Uuid::new_v4();
        let mut a = hub.subscribe(id);
        let mut b = hub.subscribe(id);

        hub.publish(id, LiveEvent::Appended { seq: 1 });

        assert_eq!(a.recv().await.unwrap(), LiveEvent::Appended { seq: 1 });
        assert_eq!(b.recv().await.unwrap(), LiveEvent::Appended { seq: 1 });
    }

    #[tokio::test]
    async fn idle_channels_are_removed() {
        let hub = LiveHub::new();
        let id = Uuid::new_v4();
        let rx = hub.subscribe(id);
        assert_eq!(hub.subscriber_count(id), 1);
        drop(rx);

        hub.publish(id, LiveEvent::Appended { seq: 2 });
        assert_eq!(hub.active_sessions(), 0);
    }

    #[tokio::test]
    async fn prune_drops_channels_that_never_publish_again() {
        let hub = LiveHub::new();
        let quiet = Uuid::new_v4();
        let watched = Uuid::new_v4();
        drop(hub.subscribe(quiet));
        let _rx = hub.subscribe(watched);

        assert_eq!(hub.active_sessions(), 2);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.active_sessions(), 1);
        assert_eq!(hub.subscriber_count(watched), 1);
    }
}
