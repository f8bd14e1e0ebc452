use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::counsel::broadcaster::Broadcaster;
use crate::counsel::channel::next_slot;
use crate::counsel::locks::KeyedLocks;
use crate::error::{CoreError, CoreResult};
use crate::live::hub::{LiveEvent, LiveHub};
use crate::models::counselors::CaseCredit;
use crate::models::identity::Role;
use crate::models::messages::{Message, MessageType};
use crate::models::payments::PaymentObligation;
use crate::models::sessions::{ChatSession, EndOutcome, SessionState, SessionStatus};
use crate::store::{SessionTransition, Store};

/// Owns the session lifecycle:
///
/// ```text
/// (payment confirmed) --create--> active
/// active    --dismiss (counselor)-->  dismissed
/// dismissed --reactivate (payment)--> active
/// active | dismissed --end-->         ended (terminal)
/// ```
///
/// Every mutation holds the per-session lock shared with the message
/// channel, so a send can never slip past a concurrent dismiss.
#[derive(Clone)]
pub struct SessionMachine {
    store: Arc<dyn Store>,
    session_locks: KeyedLocks,
    obligation_locks: KeyedLocks,
    hub: LiveHub,
    broadcaster: Broadcaster,
}

impl SessionMachine {
    pub fn new(
        store: Arc<dyn Store>,
        session_locks: KeyedLocks,
        hub: LiveHub,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            store,
            session_locks,
            obligation_locks: KeyedLocks::new(),
            hub,
            broadcaster,
        }
    }

    pub async fn get(&self, session_id: Uuid) -> CoreResult<ChatSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))
    }

    /// Loads a session on behalf of one of its participants.
    pub async fn get_for(&self, session_id: Uuid, viewer_id: Uuid) -> CoreResult<ChatSession> {
        let session = self.get(session_id).await?;
        if session.role_of(viewer_id).is_none() {
            return Err(CoreError::Forbidden(format!(
                "not a participant of session {}",
                session_id
            )));
        }
        Ok(session)
    }

    pub async fn list_for(&self, account_id: Uuid) -> CoreResult<Vec<ChatSession>> {
        self.store.list_sessions_for(account_id).await
    }

    pub async fn create_session(&self, obligation_id: Uuid) -> CoreResult<ChatSession> {
        let _guard = self.obligation_locks.lock(obligation_id).await;
        let obligation = self.confirmed_obligation(obligation_id).await?;
        if obligation.session_id.is_some() {
            return Err(CoreError::InvalidTransition(format!(
                "obligation {} pays for a reactivation, not a new session",
                obligation_id
            )));
        }
        if self.store.session_for_obligation(obligation_id).await?.is_some() {
            return Err(CoreError::InvalidTransition(format!(
                "obligation {} already opened a session",
                obligation_id
            )));
        }

        // The request may have been cancelled, expired or taken by another
        // counselor since the obligation was created. The payment still
        // opens a session, just not a linked one.
        let request_id = match obligation.request_id {
            Some(request_id) => match self
                .broadcaster
                .select(request_id, obligation.payee_counselor_id)
                .await
            {
                Ok(_) => Some(request_id),
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        obligation_id = %obligation_id,
                        error = %e,
                        "session opened without its request"
                    );
                    None
                }
            },
            None => None,
        };

        let now = Utc::now();
        let mut session = ChatSession {
            id: Uuid::new_v4(),
            request_id,
            obligation_id,
            user_id: obligation.payer_id,
            counselor_id: obligation.payee_counselor_id,
            booking_fee_cents: obligation.amount_cents,
            state: SessionState::Active,
            last_message_summary: None,
            last_message_at: None,
            last_seq: 0,
            unread_count_user: 0,
            unread_count_counselor: 0,
            created_at: now,
            updated_at: now,
        };
        let opening = announcement(&session, session.user_id, Role::User, "Session started.");
        self.store.insert_session(&session, &opening).await?;
        session.last_seq = opening.seq;
        session.last_message_at = Some(opening.created_at);
        session.last_message_summary = Some(opening.summary());

        tracing::info!(
            session_id = %session.id,
            obligation_id = %obligation_id,
            user_id = %session.user_id,
            counselor_id = %session.counselor_id,
            "chat session opened"
        );

        self.hub.publish(session.id, LiveEvent::Appended { seq: opening.seq });
        Ok(session)
    }

    pub async fn dismiss(&self, session_id: Uuid, by_counselor_id: Uuid) -> CoreResult<ChatSession> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        if session.counselor_id != by_counselor_id {
            return Err(CoreError::Forbidden(format!(
                "only the session's counselor may dismiss session {}",
                session_id
            )));
        }
        if session.status() != SessionStatus::Active {
            return Err(invalid_edge(&session, "dismiss"));
        }

        let now = Utc::now();
        let mut next = session.clone();
        next.state = SessionState::Dismissed {
            dismissed_at: now,
            dismissed_by: by_counselor_id,
        };
        next.updated_at = now;
        let notice = announcement(
            &session,
            by_counselor_id,
            Role::Counselor,
            "The counselor paused this session. Payment is required to continue.",
        );
        self.apply(&mut next, &[SessionStatus::Active], None, None, &notice)
            .await?;
        tracing::info!(session_id = %session_id, counselor_id = %by_counselor_id, "chat session dismissed");
        Ok(next)
    }

    pub async fn reactivate(&self, session_id: Uuid, obligation_id: Uuid) -> CoreResult<ChatSession> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        if session.status() != SessionStatus::Dismissed {
            return Err(invalid_edge(&session, "reactivate"));
        }

        let obligation = self.confirmed_obligation(obligation_id).await?;
        if obligation.payee_counselor_id != session.counselor_id
            || obligation.payer_id != session.user_id
        {
            return Err(CoreError::Forbidden(format!(
                "obligation {} was not paid by this session's user to its counselor",
                obligation_id
            )));
        }
        if obligation.session_id.is_some_and(|id| id != session_id) {
            return Err(CoreError::Forbidden(format!(
                "obligation {} is earmarked for another session",
                obligation_id
            )));
        }

        let now = Utc::now();
        let mut next = session.clone();
        next.state = SessionState::Active;
        next.updated_at = now;
        let notice = announcement(
            &session,
            session.user_id,
            Role::User,
            "Payment received. The session is active again.",
        );
        self.apply(
            &mut next,
            &[SessionStatus::Dismissed],
            Some(obligation_id),
            None,
            &notice,
        )
        .await?;
        tracing::info!(session_id = %session_id, obligation_id = %obligation_id, "chat session reactivated");
        Ok(next)
    }

    /// Either participant may end. Ending a dismissed session always counts
    /// as abandoned. Linked sessions credit the counselor exactly once.
    pub async fn end(
        &self,
        session_id: Uuid,
        by_account_id: Uuid,
        outcome: EndOutcome,
    ) -> CoreResult<ChatSession> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self.get(session_id).await?;
        let role = session.role_of(by_account_id).ok_or_else(|| {
            CoreError::Forbidden(format!("not a participant of session {}", session_id))
        })?;
        if session.status() == SessionStatus::Ended {
            return Err(invalid_edge(&session, "end"));
        }

        let outcome = match session.status() {
            SessionStatus::Dismissed => EndOutcome::Abandoned,
            _ => outcome,
        };
        let now = Utc::now();
        let mut next = session.clone();
        next.state = SessionState::Ended {
            ended_at: now,
            outcome,
            dismissal: session.state.dismissal(),
        };
        next.updated_at = now;

        let credit = session.request_id.map(|_| CaseCredit {
            counselor_id: session.counselor_id,
            completed: outcome == EndOutcome::Completed,
            earnings_cents: session.booking_fee_cents,
        });
        let notice = announcement(&session, by_account_id, role, "The session has ended.");
        self.apply(
            &mut next,
            &[SessionStatus::Active, SessionStatus::Dismissed],
            None,
            credit,
            &notice,
        )
        .await?;
        tracing::info!(
            session_id = %session_id,
            ended_by = %by_account_id,
            outcome = ?outcome,
            "chat session ended"
        );

        if let (Some(request_id), EndOutcome::Completed) = (session.request_id, outcome) {
            if let Err(e) = self
                .broadcaster
                .complete(request_id, session.counselor_id)
                .await
            {
                tracing::debug!(request_id = %request_id, error = %e, "linked request not completed");
            }
        }
        Ok(next)
    }

    pub fn prune_locks(&self) -> usize {
        self.session_locks.prune() + self.obligation_locks.prune()
    }

    async fn confirmed_obligation(&self, obligation_id: Uuid) -> CoreResult<PaymentObligation> {
        let obligation = self
            .store
            .get_obligation(obligation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("obligation {}", obligation_id)))?;
        if !obligation.is_confirmed() {
            return Err(CoreError::PaymentNotConfirmed(obligation_id));
        }
        Ok(obligation)
    }

    async fn apply(
        &self,
        next: &mut ChatSession,
        from: &[SessionStatus],
        obligation_id: Option<Uuid>,
        credit: Option<CaseCredit>,
        notice: &Message,
    ) -> CoreResult<()> {
        let applied = self
            .store
            .transition_session(SessionTransition {
                session: &*next,
                from,
                obligation_id,
                credit,
                announcement: notice,
            })
            .await?;
        if !applied {
            return Err(CoreError::InvalidTransition(format!(
                "session {} changed concurrently",
                next.id
            )));
        }
        next.last_seq = notice.seq;
        next.last_message_at = Some(notice.created_at);
        next.last_message_summary = Some(notice.summary());

        self.hub.publish(next.id, LiveEvent::Appended { seq: notice.seq });
        self.hub.publish(
            next.id,
            LiveEvent::State {
                status: next.status(),
            },
        );
        Ok(())
    }
}

fn invalid_edge(session: &ChatSession, action: &str) -> CoreError {
    CoreError::InvalidTransition(format!(
        "cannot {} session {} while {}",
        action,
        session.id,
        session.status().as_str()
    ))
}

/// System message announcing a lifecycle change, placed after the
/// session's current last message.
fn announcement(session: &ChatSession, actor_id: Uuid, actor_role: Role, body: &str) -> Message {
    let (seq, created_at) = next_slot(session, Utc::now());
    Message {
        id: Uuid::new_v4(),
        session_id: session.id,
        seq,
        sender_id: actor_id,
        sender_role: actor_role,
        message_type: MessageType::System,
        body: body.to_string(),
        read: false,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counsel::catalog::Catalog;
    use crate::counsel::directory::Directory;
    use crate::counsel::payments::{ObligationTarget, PaymentGate};
    use crate::models::payments::PaymentOutcome;
    use crate::store::MemoryStore;

    struct Fixture {
        machine: SessionMachine,
        gate: PaymentGate,
        directory: Directory,
        counselor: Uuid,
        user: Uuid,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let directory = Directory::new(
            store.clone(),
            Catalog::new(store.clone(), std::time::Duration::ZERO),
        );
        let broadcaster =
            Broadcaster::new(store.clone(), directory.clone(), chrono::Duration::minutes(15));
        let machine =
            SessionMachine::new(store.clone(), KeyedLocks::new(), LiveHub::new(), broadcaster);
        let gate = PaymentGate::new(store, directory.clone());
        let counselor = directory.register("Meriem", 1000).await.unwrap().id;
        Fixture {
            machine,
            gate,
            directory,
            counselor,
            user: Uuid::new_v4(),
        }
    }

    async fn paid(f: &Fixture, target: ObligationTarget) -> Uuid {
        let o = f
            .gate
            .create_obligation(f.user, f.counselor, target)
            .await
            .unwrap();
        f.gate
            .on_payment_confirmed(o.id, PaymentOutcome::Confirmed)
            .await
            .unwrap();
        o.id
    }

    #[tokio::test]
    async fn pending_obligation_cannot_open_session() {
        let f = fixture().await;
        let o = f
            .gate
            .create_obligation(f.user, f.counselor, ObligationTarget::default())
            .await
            .unwrap();
        let err = f.machine.create_session(o.id).await.unwrap_err();
        assert!(matches!(err, CoreError::PaymentNotConfirmed(id) if id == o.id));
    }

    #[tokio::test]
    async fn opening_message_is_not_counted_as_unread() {
        let f = fixture().await;
        let session = f
            .machine
            .create_session(paid(&f, ObligationTarget::default()).await)
            .await
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.payment_paid());
        assert_eq!(session.last_seq, 1);
        let stored = f.machine.get(session.id).await.unwrap();
        assert_eq!(stored.unread_count_user, 0);
        assert_eq!(stored.unread_count_counselor, 0);
    }

    #[tokio::test]
    async fn only_the_counselor_may_dismiss() {
        let f = fixture().await;
        let session = f
            .machine
            .create_session(paid(&f, ObligationTarget::default()).await)
            .await
            .unwrap();

        let err = f.machine.dismiss(session.id, f.user).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let dismissed = f.machine.dismiss(session.id, f.counselor).await.unwrap();
        assert_eq!(dismissed.status(), SessionStatus::Dismissed);
        assert!(!dismissed.payment_paid());

        let twice = f.machine.dismiss(session.id, f.counselor).await.unwrap_err();
        assert!(matches!(twice, CoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn reactivation_requires_matching_parties() {
        let f = fixture().await;
        let session = f
            .machine
            .create_session(paid(&f, ObligationTarget::default()).await)
            .await
            .unwrap();
        f.machine.dismiss(session.id, f.counselor).await.unwrap();

        let other = f.directory.register("Other", 1000).await.unwrap().id;
        let stray = f
            .gate
            .create_obligation(f.user, other, ObligationTarget::default())
            .await
            .unwrap();
        f.gate
            .on_payment_confirmed(stray.id, PaymentOutcome::Confirmed)
            .await
            .unwrap();
        let err = f.machine.reactivate(session.id, stray.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let repay = paid(
            &f,
            ObligationTarget {
                session_id: Some(session.id),
                ..Default::default()
            },
        )
        .await;
        let active = f.machine.reactivate(session.id, repay).await.unwrap();
        assert_eq!(active.status(), SessionStatus::Active);
        assert!(active.state.dismissal().is_none());
    }

    #[tokio::test]
    async fn ended_session_is_terminal() {
        let f = fixture().await;
        let session = f
            .machine
            .create_session(paid(&f, ObligationTarget::default()).await)
            .await
            .unwrap();
        f.machine
            .end(session.id, f.user, EndOutcome::Completed)
            .await
            .unwrap();

        assert!(matches!(
            f.machine.end(session.id, f.counselor, EndOutcome::Completed).await,
            Err(CoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            f.machine.dismiss(session.id, f.counselor).await,
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(
            f.machine.get(session.id).await.unwrap().status(),
            SessionStatus::Ended
        );
    }

    #[tokio::test]
    async fn ending_a_dismissed_session_is_abandoned() {
        let f = fixture().await;
        let session = f
            .machine
            .create_session(paid(&f, ObligationTarget::default()).await)
            .await
            .unwrap();
        f.machine.dismiss(session.id, f.counselor).await.unwrap();
        let ended = f
            .machine
            .end(session.id, f.user, EndOutcome::Completed)
            .await
            .unwrap();
        assert_eq!(ended.state.end_outcome(), Some(EndOutcome::Abandoned));
        assert!(!ended.payment_paid());
    }

    #[tokio::test]
    async fn outsiders_cannot_end() {
        let f = fixture().await;
        let session = f
            .machine
            .create_session(paid(&f, ObligationTarget::default()).await)
            .await
            .unwrap();
        let err = f
            .machine
            .end(session.id, Uuid::new_v4(), EndOutcome::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
