use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::counsel::broadcaster::Broadcaster;
use crate::counsel::catalog::Catalog;
use crate::counsel::channel::MessageChannel;
use crate::counsel::directory::Directory;
use crate::counsel::locks::KeyedLocks;
use crate::counsel::payments::PaymentGate;
use crate::counsel::ratings::RatingLedger;
use crate::counsel::sessions::SessionMachine;
use crate::error::{CoreError, CoreResult};
use crate::live::hub::LiveHub;
use crate::models::payments::{PaymentObligation, PaymentOutcome};
use crate::models::sessions::ChatSession;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub request_ttl: chrono::Duration,
    pub catalog_ttl: Duration,
    pub snapshot_size: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_ttl: chrono::Duration::minutes(15),
            catalog_ttl: Duration::from_secs(300),
            snapshot_size: 50,
        }
    }
}

/// What a payment callback ended up doing.
#[derive(Debug, Clone)]
pub enum PaymentResolution {
    SessionOpened(ChatSession),
    SessionReactivated(ChatSession),
    Failed(PaymentObligation),
}

/// Wires the components over one store. Cloning is cheap; every clone
/// shares the same locks, hub and cache.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn Store>,
    pub hub: LiveHub,
    pub catalog: Catalog,
    pub directory: Directory,
    pub broadcaster: Broadcaster,
    pub payments: PaymentGate,
    pub sessions: SessionMachine,
    pub channel: MessageChannel,
    pub ratings: RatingLedger,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, settings: EngineSettings) -> Self {
        let hub = LiveHub::new();
        // Shared so lifecycle changes and sends on one session serialize.
        let session_locks = KeyedLocks::new();

        let catalog = Catalog::new(store.clone(), settings.catalog_ttl);
        let directory = Directory::new(store.clone(), catalog.clone());
        let broadcaster = Broadcaster::new(store.clone(), directory.clone(), settings.request_ttl);
        let payments = PaymentGate::new(store.clone(), directory.clone());
        let sessions = SessionMachine::new(
            store.clone(),
            session_locks.clone(),
            hub.clone(),
            broadcaster.clone(),
        );
        let channel = MessageChannel::new(
            store.clone(),
            session_locks,
            hub.clone(),
            settings.snapshot_size,
        );
        let ratings = RatingLedger::new(store.clone());

        Self {
            store,
            hub,
            catalog,
            directory,
            broadcaster,
            payments,
            sessions,
            channel,
            ratings,
        }
    }

    /// Applies a provider callback and, on success, opens or reactivates
    /// the session it pays for. Replaying the same callback returns the
    /// session it already produced.
    pub async fn handle_payment_event(
        &self,
        obligation_id: Uuid,
        outcome: PaymentOutcome,
    ) -> CoreResult<PaymentResolution> {
        let obligation = self
            .payments
            .on_payment_confirmed(obligation_id, outcome)
            .await?;
        if !obligation.is_confirmed() {
            return Ok(PaymentResolution::Failed(obligation));
        }

        if let Some(resolution) = self.already_applied(&obligation).await? {
            return Ok(resolution);
        }

        let applied = match obligation.session_id {
            Some(session_id) => self
                .sessions
                .reactivate(session_id, obligation_id)
                .await
                .map(PaymentResolution::SessionReactivated),
            None => self
                .sessions
                .create_session(obligation_id)
                .await
                .map(PaymentResolution::SessionOpened),
        };

        match applied {
            // A concurrent replay may have won the claim.
            Err(CoreError::InvalidTransition(reason)) => {
                match self.already_applied(&obligation).await? {
                    Some(resolution) => Ok(resolution),
                    None => Err(CoreError::InvalidTransition(reason)),
                }
            }
            other => other,
        }
    }

    /// Startup repair of derived counters.
    pub async fn recover(&self) -> CoreResult<u64> {
        let repaired = self.store.reconcile_unread_counters().await?;
        if repaired > 0 {
            tracing::warn!(repaired, "unread counters were out of sync and have been repaired");
        } else {
            tracing::info!("unread counters consistent");
        }
        Ok(repaired)
    }

    /// Drops idle per-entity locks.
    pub fn prune_locks(&self) -> usize {
        self.broadcaster.prune_locks()
            + self.sessions.prune_locks()
            + self.channel.prune_locks()
            + self.ratings.prune_locks()
    }

    async fn already_applied(
        &self,
        obligation: &PaymentObligation,
    ) -> CoreResult<Option<PaymentResolution>> {
        let Some(session_id) = self.store.session_for_obligation(obligation.id).await? else {
            return Ok(None);
        };
        let session = self.sessions.get(session_id).await?;
        Ok(Some(match obligation.session_id {
            Some(_) => PaymentResolution::SessionReactivated(session),
            None => PaymentResolution::SessionOpened(session),
        }))
    }
}
