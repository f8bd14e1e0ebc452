use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures_util::{stream, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::counsel::locks::KeyedLocks;
use crate::error::{CoreError, CoreResult};
use crate::live::hub::{LiveEvent, LiveHub};
use crate::models::identity::Role;
use crate::models::messages::{Message, MessageType, MAX_BODY_CHARS};
use crate::models::sessions::{ChatSession, SessionStatus};
use crate::store::Store;

const FEED_PAGE: i64 = 200;
const MAX_HISTORY_PAGE: i64 = 200;

/// Item delivered to a session subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Message(Message),
    Read { reader: Role },
    State { status: SessionStatus },
}

pub type SessionFeed = Pin<Box<dyn Stream<Item = CoreResult<FeedEvent>> + Send>>;

/// Sequence number and timestamp for the next message of a session.
/// Timestamps are kept strictly increasing at the storage precision.
pub(crate) fn next_slot(session: &ChatSession, now: DateTime<Utc>) -> (i64, DateTime<Utc>) {
    let now = now.trunc_subsecs(6);
    let created_at = match session.last_message_at {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    };
    (session.last_seq + 1, created_at)
}

/// Append-only message log per session with unread bookkeeping and live,
/// resumable delivery.
#[derive(Clone)]
pub struct MessageChannel {
    store: Arc<dyn Store>,
    session_locks: KeyedLocks,
    hub: LiveHub,
    snapshot_size: i64,
}

impl MessageChannel {
    pub fn new(
        store: Arc<dyn Store>,
        session_locks: KeyedLocks,
        hub: LiveHub,
        snapshot_size: i64,
    ) -> Self {
        Self {
            store,
            session_locks,
            hub,
            snapshot_size: snapshot_size.max(1),
        }
    }

    /// Appends a participant message. Sendability is re-derived from the
    /// stored session under the session lock on every call.
    pub async fn send(
        &self,
        session_id: Uuid,
        sender_id: Uuid,
        sender_role: Role,
        body: &str,
        message_type: MessageType,
    ) -> CoreResult<Message> {
        if message_type == MessageType::System {
            return Err(CoreError::InvalidValue(
                "system messages cannot be sent by participants".into(),
            ));
        }
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::InvalidValue("message body is empty".into()));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(CoreError::InvalidValue(format!(
                "message body exceeds {} characters",
                MAX_BODY_CHARS
            )));
        }

        let _guard = self.session_locks.lock(session_id).await;
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if session.role_of(sender_id) != Some(sender_role) {
            return Err(CoreError::Forbidden(format!(
                "{} is not the {} of session {}",
                sender_id,
                sender_role.as_str(),
                session_id
            )));
        }
        if let Some(reason) = session.block_reason() {
            tracing::debug!(session_id = %session_id, reason = %reason, "send refused");
            return Err(CoreError::SessionNotSendable { session_id, reason });
        }

        let (seq, created_at) = next_slot(&session, Utc::now());
        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            seq,
            sender_id,
            sender_role,
            message_type,
            body: body.to_string(),
            read: false,
            created_at,
        };
        self.store.append_message(&message).await?;
        self.hub.publish(session_id, LiveEvent::Appended { seq });
        tracing::debug!(session_id = %session_id, seq, role = sender_role.as_str(), "message appended");
        Ok(message)
    }

    /// Clears the reader's own unread counter and flags what was addressed to it.
    pub async fn mark_read(&self, session_id: Uuid, reader_id: Uuid) -> CoreResult<u64> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self.participant_session(session_id, reader_id).await?;
        let reader = session
            .role_of(reader_id)
            .ok_or_else(|| CoreError::Forbidden(format!("not a participant of session {}", session_id)))?;

        let flipped = self.store.mark_read(session_id, reader).await?;
        self.hub.publish(session_id, LiveEvent::Read { reader });
        Ok(flipped)
    }

    /// Page of history, oldest first, ending just before `before_seq`.
    pub async fn history(
        &self,
        session_id: Uuid,
        viewer_id: Uuid,
        before_seq: Option<i64>,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        self.participant_session(session_id, viewer_id).await?;
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        self.store.messages_before(session_id, before_seq, limit).await
    }

    /// Live feed of a session. Without `after_seq` it starts with the most
    /// recent messages; with it, every message after that cursor is
    /// replayed first. Dropping the stream releases the subscription.
    pub async fn subscribe(
        &self,
        session_id: Uuid,
        viewer_id: Uuid,
        after_seq: Option<i64>,
    ) -> CoreResult<SessionFeed> {
        self.participant_session(session_id, viewer_id).await?;

        // Register before reading the snapshot so nothing lands in between unseen.
        let events = self.hub.subscribe(session_id);
        let (pending, cursor) = match after_seq {
            Some(after) => (VecDeque::new(), after.max(0)),
            None => {
                let snapshot = self
                    .store
                    .messages_before(session_id, None, self.snapshot_size)
                    .await?;
                let cursor = snapshot.first().map(|m| m.seq - 1).unwrap_or(0);
                (VecDeque::from(snapshot), cursor)
            }
        };

        let state = FeedState {
            store: self.store.clone(),
            session_id,
            cursor,
            pending,
            events,
            wait_before_fetch: false,
        };
        Ok(Box::pin(stream::unfold(state, next_event)))
    }

    pub fn prune_locks(&self) -> usize {
        self.session_locks.prune()
    }

    async fn participant_session(&self, session_id: Uuid, viewer_id: Uuid) -> CoreResult<ChatSession> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if session.role_of(viewer_id).is_none() {
            return Err(CoreError::Forbidden(format!(
                "not a participant of session {}",
                session_id
            )));
        }
        Ok(session)
    }
}

struct FeedState {
    store: Arc<dyn Store>,
    session_id: Uuid,
    cursor: i64,
    pending: VecDeque<Message>,
    events: broadcast::Receiver<LiveEvent>,
    // After a storage error, wait for the next signal instead of spinning.
    wait_before_fetch: bool,
}

async fn next_event(mut st: FeedState) -> Option<(CoreResult<FeedEvent>, FeedState)> {
    loop {
        if let Some(message) = st.pending.pop_front() {
            st.cursor = message.seq;
            return Some((Ok(FeedEvent::Message(message)), st));
        }

        if !st.wait_before_fetch {
            match st
                .store
                .messages_after(st.session_id, st.cursor, FEED_PAGE)
                .await
            {
                Ok(batch) if !batch.is_empty() => {
                    st.pending.extend(batch);
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    st.wait_before_fetch = true;
                    return Some((Err(e), st));
                }
            }
        }
        st.wait_before_fetch = false;

        match st.events.recv().await {
            Ok(LiveEvent::Appended { .. }) => continue,
            Ok(LiveEvent::Read { reader }) => return Some((Ok(FeedEvent::Read { reader }), st)),
            Ok(LiveEvent::State { status }) => return Some((Ok(FeedEvent::State { status }), st)),
            // Missed signals are harmless: the next fetch reads from the cursor.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(session_id = %st.session_id, skipped, "feed lagged");
                continue;
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
