//! Persistence boundary for the counsel engine.
//!
//! Every method that touches more than one row is atomic in both
//! implementations: a crash can never leave unread counters out of step
//! with the message log, or a session without its obligation mapping.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{
    catalog::CatalogSnapshot,
    counselors::{CaseCredit, Counselor},
    identity::Role,
    messages::Message,
    payments::{ObligationStatus, PaymentObligation},
    ratings::Rating,
    requests::{HelpRequest, HelpRequestStatus},
    sessions::{ChatSession, SessionStatus},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A state change applied to a session under compare-and-set.
#[derive(Debug, Clone)]
pub struct SessionTransition<'a> {
    /// Session with its new state already applied.
    pub session: &'a ChatSession,
    /// Statuses the stored row must currently be in.
    pub from: &'a [SessionStatus],
    /// Obligation consumed by this transition (reactivation).
    pub obligation_id: Option<Uuid>,
    /// Bookkeeping applied only if the row was not already ended.
    pub credit: Option<CaseCredit>,
    /// System message announcing the change.
    pub announcement: &'a Message,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // counselors
    async fn insert_counselor(&self, counselor: &Counselor) -> CoreResult<()>;
    async fn get_counselor(&self, id: Uuid) -> CoreResult<Option<Counselor>>;
    async fn update_presence(
        &self,
        id: Uuid,
        online: bool,
        region: Option<&str>,
        specializations: &[String],
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Counselor>>;
    /// Online counselors, optionally restricted to one region.
    async fn list_online_counselors(&self, region: Option<&str>) -> CoreResult<Vec<Counselor>>;
    async fn catalog(&self) -> CoreResult<CatalogSnapshot>;

    // help requests
    async fn insert_request(&self, request: &HelpRequest) -> CoreResult<()>;
    async fn get_request(&self, id: Uuid) -> CoreResult<Option<HelpRequest>>;
    /// Writes `request` if the stored status still equals `expected`.
    async fn update_request(
        &self,
        request: &HelpRequest,
        expected: HelpRequestStatus,
    ) -> CoreResult<bool>;
    /// Requests still broadcasting that were created before `cutoff`.
    async fn list_stale_requests(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<HelpRequest>>;

    // payment obligations
    async fn insert_obligation(&self, obligation: &PaymentObligation) -> CoreResult<()>;
    async fn get_obligation(&self, id: Uuid) -> CoreResult<Option<PaymentObligation>>;
    /// Moves a pending obligation to `status`. Returns `None` if it was already resolved.
    async fn resolve_obligation(
        &self,
        id: Uuid,
        status: ObligationStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<PaymentObligation>>;

    // sessions
    /// Inserts a session, claims its obligation and appends the opening message.
    async fn insert_session(&self, session: &ChatSession, opening: &Message) -> CoreResult<()>;
    async fn get_session(&self, id: Uuid) -> CoreResult<Option<ChatSession>>;
    async fn list_sessions_for(&self, account_id: Uuid) -> CoreResult<Vec<ChatSession>>;
    async fn session_for_obligation(&self, obligation_id: Uuid) -> CoreResult<Option<Uuid>>;
    /// Returns false when the stored status was not in `transition.from`.
    async fn transition_session(&self, transition: SessionTransition<'_>) -> CoreResult<bool>;

    // messages
    /// Appends a message and bumps the session summary and the other role's counter.
    async fn append_message(&self, message: &Message) -> CoreResult<()>;
    async fn messages_after(
        &self,
        session_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> CoreResult<Vec<Message>>;
    /// The newest `limit` messages below `before_seq`, oldest first.
    async fn messages_before(
        &self,
        session_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> CoreResult<Vec<Message>>;
    /// Flags messages addressed to `reader` as read and zeroes its counter.
    async fn mark_read(&self, session_id: Uuid, reader: Role) -> CoreResult<u64>;
    /// Recomputes every session's unread counters from the message log.
    async fn reconcile_unread_counters(&self) -> CoreResult<u64>;

    // ratings
    /// Upserts by (counselor, user) and recomputes the counselor aggregate.
    async fn upsert_rating(&self, rating: &Rating) -> CoreResult<(Rating, Counselor)>;
    async fn get_rating(&self, counselor_id: Uuid, user_id: Uuid) -> CoreResult<Option<Rating>>;
}
