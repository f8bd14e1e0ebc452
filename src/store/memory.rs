//! In-process store used by tests and `STORE=memory` development runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{SessionTransition, Store};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    catalog::CatalogSnapshot,
    counselors::{CaseCredit, Counselor},
    identity::Role,
    messages::Message,
    payments::{ObligationStatus, PaymentObligation},
    ratings::{average_rating, Rating},
    requests::{HelpRequest, HelpRequestStatus},
    sessions::ChatSession,
};

#[derive(Default)]
struct Inner {
    counselors: HashMap<Uuid, Counselor>,
    requests: HashMap<Uuid, HelpRequest>,
    obligations: HashMap<Uuid, PaymentObligation>,
    sessions: HashMap<Uuid, ChatSession>,
    obligation_sessions: HashMap<Uuid, Uuid>,
    // session_id -> seq -> message
    messages: HashMap<Uuid, BTreeMap<i64, Message>>,
    ratings: HashMap<(Uuid, Uuid), Rating>,
}

impl Inner {
    fn push_message(&mut self, message: &Message) -> CoreResult<()> {
        let log = self.messages.entry(message.session_id).or_default();
        if log.contains_key(&message.seq) {
            return Err(CoreError::Storage(format!(
                "duplicate seq {} for session {}",
                message.seq, message.session_id
            )));
        }
        log.insert(message.seq, message.clone());

        let session = self
            .sessions
            .get_mut(&message.session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", message.session_id)))?;
        session.last_seq = message.seq;
        session.last_message_at = Some(message.created_at);
        session.last_message_summary = Some(message.summary());
        session.updated_at = message.created_at;
        if !message.is_system() {
            match message.sender_role.other() {
                Role::User => session.unread_count_user += 1,
                Role::Counselor => session.unread_count_counselor += 1,
            }
        }
        Ok(())
    }

    fn apply_credit(&mut self, credit: CaseCredit) {
        if let Some(counselor) = self.counselors.get_mut(&credit.counselor_id) {
            counselor.total_cases += 1;
            if credit.completed {
                counselor.completed_cases += 1;
            }
            counselor.gross_earnings_cents += credit.earnings_cents;
            counselor.updated_at = Utc::now();
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a session counter without touching the log. Lets tests
    /// simulate a crash between message append and counter update.
    #[cfg(test)]
    pub async fn corrupt_unread(&self, session_id: Uuid, user: i64, counselor: i64) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.unread_count_user = user;
            session.unread_count_counselor = counselor;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_counselor(&self, counselor: &Counselor) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.counselors.contains_key(&counselor.id) {
            return Err(CoreError::InvalidValue(format!(
                "counselor {} already registered",
                counselor.id
            )));
        }
        inner.counselors.insert(counselor.id, counselor.clone());
        Ok(())
    }

    async fn get_counselor(&self, id: Uuid) -> CoreResult<Option<Counselor>> {
        Ok(self.inner.read().await.counselors.get(&id).cloned())
    }

    async fn update_presence(
        &self,
        id: Uuid,
        online: bool,
        region: Option<&str>,
        specializations: &[String],
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Counselor>> {
        let mut inner = self.inner.write().await;
        let Some(counselor) = inner.counselors.get_mut(&id) else {
            return Ok(None);
        };
        counselor.online = online;
        if let Some(region) = region {
            counselor.region = Some(region.to_string());
        }
        if !specializations.is_empty() {
            counselor.specializations = specializations.to_vec();
        }
        counselor.updated_at = now;
        Ok(Some(counselor.clone()))
    }

    async fn list_online_counselors(&self, region: Option<&str>) -> CoreResult<Vec<Counselor>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Counselor> = inner
            .counselors
            .values()
            .filter(|c| c.online)
            .filter(|c| region.map_or(true, |r| c.in_region(r)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn catalog(&self) -> CoreResult<CatalogSnapshot> {
        let inner = self.inner.read().await;
        // Regions match case-insensitively, so "Oran" and "oran" are one entry.
        let mut by_key: BTreeMap<String, String> = BTreeMap::new();
        for region in inner.counselors.values().filter_map(|c| c.region.as_ref()) {
            by_key
                .entry(region.to_lowercase())
                .and_modify(|kept| {
                    if region.as_str() < kept.as_str() {
                        *kept = region.clone();
                    }
                })
                .or_insert_with(|| region.clone());
        }
        let regions: Vec<String> = by_key.into_values().collect();
        let mut categories: Vec<String> = inner
            .counselors
            .values()
            .flat_map(|c| c.specializations.iter().cloned())
            .collect();
        categories.sort();
        categories.dedup();
        Ok(CatalogSnapshot {
            regions,
            categories,
        })
    }

    async fn insert_request(&self, request: &HelpRequest) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> CoreResult<Option<HelpRequest>> {
        Ok(self.inner.read().await.requests.get(&id).cloned())
    }

    async fn update_request(
        &self,
        request: &HelpRequest,
        expected: HelpRequestStatus,
    ) -> CoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.requests.get_mut(&request.id) {
            Some(stored) if stored.status == expected => {
                *stored = request.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CoreError::NotFound(format!("request {}", request.id))),
        }
    }

    async fn list_stale_requests(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<HelpRequest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .values()
            .filter(|r| r.status == HelpRequestStatus::Broadcasting && r.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn insert_obligation(&self, obligation: &PaymentObligation) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.obligations.insert(obligation.id, obligation.clone());
        Ok(())
    }

    async fn get_obligation(&self, id: Uuid) -> CoreResult<Option<PaymentObligation>> {
        Ok(self.inner.read().await.obligations.get(&id).cloned())
    }

    async fn resolve_obligation(
        &self,
        id: Uuid,
        status: ObligationStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<PaymentObligation>> {
        let mut inner = self.inner.write().await;
        let obligation = inner
            .obligations
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("obligation {}", id)))?;
        if obligation.is_resolved() {
            return Ok(None);
        }
        obligation.status = status;
        obligation.resolved_at = Some(now);
        Ok(Some(obligation.clone()))
    }

    async fn insert_session(&self, session: &ChatSession, opening: &Message) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.obligation_sessions.contains_key(&session.obligation_id) {
            return Err(CoreError::InvalidTransition(format!(
                "obligation {} already opened a session",
                session.obligation_id
            )));
        }
        inner
            .obligation_sessions
            .insert(session.obligation_id, session.id);
        inner.sessions.insert(session.id, session.clone());
        inner.push_message(opening)
    }

    async fn get_session(&self, id: Uuid) -> CoreResult<Option<ChatSession>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions_for(&self, account_id: Uuid) -> CoreResult<Vec<ChatSession>> {
        let inner = self.inner.read().await;
        let mut out: Vec<ChatSession> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == account_id || s.counselor_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn session_for_obligation(&self, obligation_id: Uuid) -> CoreResult<Option<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .obligation_sessions
            .get(&obligation_id)
            .copied())
    }

    async fn transition_session(&self, transition: SessionTransition<'_>) -> CoreResult<bool> {
        let mut inner = self.inner.write().await;
        let next = transition.session;
        let stored = inner
            .sessions
            .get(&next.id)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", next.id)))?;
        if !transition.from.contains(&stored.status()) {
            return Ok(false);
        }
        let was_ended = stored.state.ended_at().is_some();

        if let Some(obligation_id) = transition.obligation_id {
            if inner.obligation_sessions.contains_key(&obligation_id) {
                return Err(CoreError::InvalidTransition(format!(
                    "obligation {} already consumed",
                    obligation_id
                )));
            }
            inner.obligation_sessions.insert(obligation_id, next.id);
        }

        if let Some(stored) = inner.sessions.get_mut(&next.id) {
            stored.state = next.state;
            stored.updated_at = next.updated_at;
        }
        if let Some(credit) = transition.credit {
            if !was_ended {
                inner.apply_credit(credit);
            }
        }
        inner.push_message(transition.announcement)?;
        Ok(true)
    }

    async fn append_message(&self, message: &Message) -> CoreResult<()> {
        self.inner.write().await.push_message(message)
    }

    async fn messages_after(
        &self,
        session_id: Uuid,
        after_seq: i64,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&session_id)
            .map(|log| {
                log.range(after_seq + 1..)
                    .take(limit.max(0) as usize)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn messages_before(
        &self,
        session_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let Some(log) = inner.messages.get(&session_id) else {
            return Ok(Vec::new());
        };
        let upper = before_seq.unwrap_or(i64::MAX);
        let mut out: Vec<Message> = log
            .range(..upper)
            .rev()
            .take(limit.max(0) as usize)
            .map(|(_, m)| m.clone())
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn mark_read(&self, session_id: Uuid, reader: Role) -> CoreResult<u64> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        match reader {
            Role::User => session.unread_count_user = 0,
            Role::Counselor => session.unread_count_counselor = 0,
        }
        let mut flipped = 0;
        if let Some(log) = inner.messages.get_mut(&session_id) {
            for message in log.values_mut() {
                if !message.read && message.sender_role != reader {
                    message.read = true;
                    flipped += 1;
                }
            }
        }
        Ok(flipped)
    }

    async fn reconcile_unread_counters(&self) -> CoreResult<u64> {
        let mut inner = self.inner.write().await;
        let Inner {
            sessions, messages, ..
        } = &mut *inner;
        let mut changed = 0;
        for session in sessions.values_mut() {
            let (mut for_user, mut for_counselor) = (0, 0);
            if let Some(log) = messages.get(&session.id) {
                for message in log.values().filter(|m| !m.read && !m.is_system()) {
                    match message.sender_role {
                        Role::Counselor => for_user += 1,
                        Role::User => for_counselor += 1,
                    }
                }
            }
            if session.unread_count_user != for_user
                || session.unread_count_counselor != for_counselor
            {
                session.unread_count_user = for_user;
                session.unread_count_counselor = for_counselor;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn upsert_rating(&self, rating: &Rating) -> CoreResult<(Rating, Counselor)> {
        let mut inner = self.inner.write().await;
        if !inner.counselors.contains_key(&rating.counselor_id) {
            return Err(CoreError::NotFound(format!(
                "counselor {}",
                rating.counselor_id
            )));
        }
        let key = (rating.counselor_id, rating.user_id);
        let stored = match inner.ratings.get(&key) {
            Some(existing) => Rating {
                id: existing.id,
                created_at: existing.created_at,
                ..rating.clone()
            },
            None => rating.clone(),
        };
        inner.ratings.insert(key, stored.clone());

        let scores: Vec<i16> = inner
            .ratings
            .values()
            .filter(|r| r.counselor_id == rating.counselor_id)
            .map(|r| r.rating)
            .collect();
        let counselor = inner
            .counselors
            .get_mut(&rating.counselor_id)
            .ok_or_else(|| CoreError::NotFound(format!("counselor {}", rating.counselor_id)))?;
        counselor.rating = average_rating(&scores);
        counselor.rating_count = scores.len() as i64;
        counselor.updated_at = stored.updated_at;
        Ok((stored, counselor.clone()))
    }

    async fn get_rating(&self, counselor_id: Uuid, user_id: Uuid) -> CoreResult<Option<Rating>> {
        Ok(self
            .inner
            .read()
            .await
            .ratings
            .get(&(counselor_id, user_id))
            .cloned())
    }
}
