#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use counsel_backend::counsel::payments::ObligationTarget;
use counsel_backend::counsel::{Engine, EngineSettings};
use counsel_backend::models::counselors::Counselor;
use counsel_backend::models::payments::PaymentOutcome;
use counsel_backend::models::sessions::ChatSession;
use counsel_backend::store::{MemoryStore, Store};
use uuid::Uuid;

pub fn engine() -> Engine {
    engine_with_ttl(chrono::Duration::minutes(15))
}

pub fn engine_with_ttl(request_ttl: chrono::Duration) -> Engine {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    Engine::new(
        store,
        EngineSettings {
            request_ttl,
            catalog_ttl: Duration::ZERO,
            snapshot_size: 50,
        },
    )
}

pub async fn online_counselor(engine: &Engine, name: &str, fee_cents: i64) -> Counselor {
    let counselor = engine.directory.register(name, fee_cents).await.unwrap();
    engine
        .directory
        .set_online(counselor.id, true, Some("Algiers"), &["family".to_string()])
        .await
        .unwrap()
}

/// Pays the counselor's fee and lets the payment callback open the session.
pub async fn paid_session(engine: &Engine, user: Uuid, counselor: Uuid) -> ChatSession {
    let obligation = engine
        .payments
        .create_obligation(user, counselor, ObligationTarget::default())
        .await
        .unwrap();
    engine
        .payments
        .on_payment_confirmed(obligation.id, PaymentOutcome::Confirmed)
        .await
        .unwrap();
    engine.sessions.create_session(obligation.id).await.unwrap()
}

/// Confirmed payment earmarked for reactivating `session`.
pub async fn repayment(engine: &Engine, session: &ChatSession) -> Uuid {
    let obligation = engine
        .payments
        .create_obligation(
            session.user_id,
            session.counselor_id,
            ObligationTarget {
                session_id: Some(session.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine
        .payments
        .on_payment_confirmed(obligation.id, PaymentOutcome::Confirmed)
        .await
        .unwrap();
    obligation.id
}
