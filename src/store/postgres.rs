use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{pool::PoolConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{SessionTransition, Store};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    catalog::CatalogSnapshot,
    counselors::Counselor,
    identity::Role,
    messages::Message,
    payments::{ObligationStatus, PaymentObligation},
    ratings::Rating,
    requests::{HelpRequest, HelpRequestStatus},
    sessions::ChatSession,
};
use crate::queries::{counselors, messages, payments, ratings, requests, sessions};

/// Postgres-backed store. Multi-row writes run inside one transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> CoreResult<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to acquire connection: {}", e)))
    }

    async fn begin(&self) -> CoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to start transaction: {}", e)))
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> CoreResult<()> {
    tx.commit()
        .await
        .map_err(|e| CoreError::Storage(format!("Failed to commit transaction: {}", e)))
}

#[async_trait]
impl Store for PgStore {
    async fn insert_counselor(&self, counselor: &Counselor) -> CoreResult<()> {
        let mut conn = self.conn().await?;
        counselors::insert_counselor(&mut conn, counselor).await
    }

    async fn get_counselor(&self, id: Uuid) -> CoreResult<Option<Counselor>> {
        let mut conn = self.conn().await?;
        counselors::get_counselor_by_id(&mut conn, id).await
    }

    async fn update_presence(
        &self,
        id: Uuid,
        online: bool,
        region: Option<&str>,
        specializations: &[String],
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Counselor>> {
        let mut conn = self.conn().await?;
        counselors::update_presence(&mut conn, id, online, region, specializations, now).await
    }

    async fn list_online_counselors(&self, region: Option<&str>) -> CoreResult<Vec<Counselor>> {
        let mut conn = self.conn().await?;
        counselors::list_online_counselors(&mut conn, region).await
    }

    async fn catalog(&self) -> CoreResult<CatalogSnapshot> {
        let mut conn = self.conn().await?;
        counselors::load_catalog(&mut conn).await
    }

    async fn insert_request(&self, request: &HelpRequest) -> CoreResult<()> {
        let mut conn = self.conn().await?;
        requests::insert_request(&mut conn, request).await
    }

    async fn get_request(&self, id: Uuid) -> CoreResult<Option<HelpRequest>> {
        let mut conn = self.conn().await?;
        requests::get_request_by_id(&mut conn, id).await
    }

    async fn update_request(
        &self,
        request: &HelpRequest,
        expected: HelpRequestStatus,
    ) -> CoreResult<bool> {
        let mut conn = self.conn().await?;
        let written = requests::update_request_if_status(&mut conn, request, expected).await?;
        if !written && requests::get_request_by_id(&mut conn, request.id).await?.is_none() {
            return Err(CoreError::NotFound(format!("request {}", request.id)));
        }
        Ok(written)
    }

    async fn list_stale_requests(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<HelpRequest>> {
        let mut conn = self.conn().await?;
        requests::list_stale_broadcasting(&mut conn, cutoff).await
    }

    async fn insert_obligation(&self, obligation: &PaymentObligation) -> CoreResult<()> {
        let mut conn = self.conn().await?;
        payments::insert_obligation(&mut conn, obligation).await
    }

    async fn get_obligation(&self, id: Uuid) -> CoreResult<Option<PaymentObligation>> {
        let mut conn = self.conn().await?;
        payments::get_obligation_by_id(&mut conn, id).await
    }

    async fn resolve_obligation(
        &self,
        id: Uuid,
        status: ObligationStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<PaymentObligation>> {
        let mut conn = self.conn().await?;
        match payments::resolve_pending_obligation(&mut conn, id, status, now).await? {
            Some(obligation) => Ok(Some(obligation)),
            None => match payments::get_obligation_by_id(&mut conn, id).await? {
                Some(_) => Ok(None),
                None => Err(CoreError::NotFound(format!("obligation {}", id))),
            },
        }
    }

    async fn insert_session(&self, session: &ChatSession, opening: &Message) -> CoreResult<()> {
        let mut tx = self.begin().await?;
        sessions::insert_session(&mut tx, session).await?;
        sessions::claim_obligation(&mut tx, session.obligation_id, session.id).await?;
        messages::insert_message(&mut tx, opening).await?;
        messages::touch_session_for_message(&mut tx, opening).await?;
        commit(tx).await
    }

    async fn get_session(&self, id: Uuid) -> CoreResult<Option<ChatSession>> {
        let mut conn = self.conn().await?;
        sessions::get_session_by_id(&mut conn, id).await
    }

    async fn list_sessions_for(&self, account_id: Uuid) -> CoreResult<Vec<ChatSession>> {
        let mut conn = self.conn().await?;
        sessions::list_sessions_for_account(&mut conn, account_id).await
    }

    async fn session_for_obligation(&self, obligation_id: Uuid) -> CoreResult<Option<Uuid>> {
        let mut conn = self.conn().await?;
        sessions::session_id_for_obligation(&mut conn, obligation_id).await
    }

    async fn transition_session(&self, transition: SessionTransition<'_>) -> CoreResult<bool> {
        let mut tx = self.begin().await?;
        let session = transition.session;

        // Row lock first so the ended check and the credit see the same state.
        let was_ended = sessions::is_ended(&mut tx, session.id).await?;
        if !sessions::update_state_if_status(&mut tx, session, transition.from).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(obligation_id) = transition.obligation_id {
            sessions::claim_obligation(&mut tx, obligation_id, session.id).await?;
        }
        if let Some(credit) = transition.credit {
            if !was_ended {
                counselors::apply_case_credit(&mut tx, credit).await?;
            }
        }
        messages::insert_message(&mut tx, transition.announcement).await?;
        messages::touch_session_for_message(&mut tx, transition.announcement).await?;
        commit(tx).await?;
        Ok(true)
    }

    async fn append_message(&self, message: &Message) -> CoreResult<()> {
        let mut tx = self.begin().await?;
        messages::insert_message(&mut tx, message).await?;
        messages::touch_session_for_message(&mut tx, message).await?;
        commit(tx).await
    }

    async fn messages_after(
        &self,
        session_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let mut conn = self.conn().await?;
        messages::get_messages_after(&mut conn, session_id, after_seq, limit).await
    }

    async fn messages_before(
        &self,
        session_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let mut conn = self.conn().await?;
        messages::get_messages_before(&mut conn, session_id, before_seq, limit).await
    }

    async fn mark_read(&self, session_id: Uuid, reader: Role) -> CoreResult<u64> {
        let mut tx = self.begin().await?;
        let flipped = messages::mark_messages_read(&mut tx, session_id, reader).await?;
        commit(tx).await?;
        Ok(flipped)
    }

    async fn reconcile_unread_counters(&self) -> CoreResult<u64> {
        let mut conn = self.conn().await?;
        messages::reconcile_unread_counters(&mut conn).await
    }

    async fn upsert_rating(&self, rating: &Rating) -> CoreResult<(Rating, Counselor)> {
        let mut tx = self.begin().await?;
        let stored = ratings::upsert_rating(&mut tx, rating).await?;
        let counselor = counselors::recompute_rating(&mut tx, rating.counselor_id).await?;
        commit(tx).await?;
        Ok((stored, counselor))
    }

    async fn get_rating(&self, counselor_id: Uuid, user_id: Uuid) -> CoreResult<Option<Rating>> {
        let mut conn = self.conn().await?;
        ratings::get_rating_for_pair(&mut conn, counselor_id, user_id).await
    }
}
