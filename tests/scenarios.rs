mod common;

use chrono::{Duration, Utc};
use counsel_backend::counsel::broadcaster::NewRequest;
use counsel_backend::counsel::engine::PaymentResolution;
use counsel_backend::counsel::payments::ObligationTarget;
use counsel_backend::counsel::Engine;
use counsel_backend::error::CoreError;
use counsel_backend::models::identity::Role;
use counsel_backend::models::messages::MessageType;
use counsel_backend::models::payments::PaymentOutcome;
use counsel_backend::models::requests::HelpRequestStatus;
use counsel_backend::models::sessions::{ChatSession, EndOutcome, SessionBlock, SessionStatus};
use uuid::Uuid;

fn help(requester_id: Uuid) -> NewRequest {
    NewRequest {
        requester_id,
        region: "Oran".into(),
        category: "family".into(),
        note: "need advice".into(),
        phone: None,
    }
}

#[tokio::test]
async fn unanswered_request_expires_after_ttl() {
    let engine = common::engine_with_ttl(Duration::minutes(10));
    let requester = Uuid::new_v4();
    let request = engine.broadcaster.create_request(help(requester)).await.unwrap();

    assert!(engine.broadcaster.poll_matches(request.id).await.unwrap().is_empty());
    assert_eq!(engine.broadcaster.sweep_expired(Utc::now()).await.unwrap(), 0);

    let later = Utc::now() + Duration::minutes(11);
    assert_eq!(engine.broadcaster.sweep_expired(later).await.unwrap(), 1);
    let expired = engine.broadcaster.get(request.id).await.unwrap();
    assert_eq!(expired.status, HelpRequestStatus::Expired);
    assert_eq!(expired.broadcast_count, 1);

    // Re-running the sweep is a no-op, and an expired request cannot be cancelled.
    assert_eq!(engine.broadcaster.sweep_expired(later).await.unwrap(), 0);
    let cancel = engine
        .broadcaster
        .cancel_request(request.id, requester, None)
        .await;
    assert!(matches!(cancel, Err(CoreError::InvalidTransition(_))));
}

#[tokio::test]
async fn paid_booking_opens_session_and_counts_unread() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Hana", 1000).await;
    let user = Uuid::new_v4();

    let obligation = engine
        .payments
        .create_obligation(user, counselor.id, ObligationTarget::default())
        .await
        .unwrap();
    assert_eq!(obligation.amount_cents, 1000);

    let session = match engine
        .handle_payment_event(obligation.id, PaymentOutcome::Confirmed)
        .await
        .unwrap()
    {
        PaymentResolution::SessionOpened(session) => session,
        other => panic!("unexpected resolution: {:?}", other),
    };
    assert_eq!(session.status(), SessionStatus::Active);
    assert!(session.payment_paid());

    for body in ["hello", "are you there?", "thanks"] {
        engine
            .channel
            .send(session.id, user, Role::User, body, MessageType::Text)
            .await
            .unwrap();
    }

    let stored = engine.sessions.get(session.id).await.unwrap();
    assert_eq!(stored.unread_count_counselor, 3);
    assert_eq!(stored.unread_count_user, 0);
    assert_eq!(stored.last_message_summary.as_deref(), Some("thanks"));
}

#[tokio::test]
async fn dismissed_session_resumes_after_repayment() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Rym", 1500).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;

    engine.sessions.dismiss(session.id, counselor.id).await.unwrap();
    let blocked = engine
        .channel
        .send(session.id, user, Role::User, "still here", MessageType::Text)
        .await;
    assert!(matches!(
        blocked,
        Err(CoreError::SessionNotSendable {
            reason: SessionBlock::PaymentRequired,
            ..
        })
    ));

    let repay = engine
        .payments
        .create_obligation(
            user,
            counselor.id,
            ObligationTarget {
                session_id: Some(session.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let resolution = engine
        .handle_payment_event(repay.id, PaymentOutcome::Confirmed)
        .await
        .unwrap();
    let resumed = match resolution {
        PaymentResolution::SessionReactivated(s) => s,
        other => panic!("unexpected resolution: {:?}", other),
    };
    assert_eq!(resumed.id, session.id);
    assert!(resumed.payment_paid());

    engine
        .channel
        .send(session.id, user, Role::User, "back again", MessageType::Text)
        .await
        .unwrap();

    // The same repayment cannot be spent twice.
    engine.sessions.dismiss(session.id, counselor.id).await.unwrap();
    let reuse = engine.sessions.reactivate(session.id, repay.id).await;
    assert!(matches!(reuse, Err(CoreError::InvalidTransition(_))));
}

#[tokio::test]
async fn failed_payment_leaves_session_dismissed() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Ines", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;
    engine.sessions.dismiss(session.id, counselor.id).await.unwrap();

    let repay = engine
        .payments
        .create_obligation(
            user,
            counselor.id,
            ObligationTarget {
                session_id: Some(session.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let resolution = engine
        .handle_payment_event(repay.id, PaymentOutcome::Failed)
        .await
        .unwrap();
    assert!(matches!(resolution, PaymentResolution::Failed(_)));

    let reactivate = engine.sessions.reactivate(session.id, repay.id).await;
    assert!(matches!(reactivate, Err(CoreError::PaymentNotConfirmed(_))));
    assert_eq!(
        engine.sessions.get(session.id).await.unwrap().status(),
        SessionStatus::Dismissed
    );
}

#[tokio::test]
async fn rating_after_session_recomputes_aggregate() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Walid", 1000).await;
    let user = Uuid::new_v4();
    let other_user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;
    let other = common::paid_session(&engine, other_user, counselor.id).await;

    let early = engine
        .ratings
        .submit(counselor.id, user, session.id, 4, None)
        .await;
    assert!(matches!(early, Err(CoreError::InvalidTransition(_))));

    engine
        .sessions
        .end(session.id, user, EndOutcome::Completed)
        .await
        .unwrap();
    engine
        .sessions
        .end(other.id, other_user, EndOutcome::Completed)
        .await
        .unwrap();

    let (_, aggregate) = engine
        .ratings
        .submit(counselor.id, user, session.id, 4, None)
        .await
        .unwrap();
    assert_eq!(aggregate.rating, 4.0);
    assert_eq!(aggregate.rating_count, 1);

    let (_, aggregate) = engine
        .ratings
        .submit(counselor.id, other_user, other.id, 5, None)
        .await
        .unwrap();
    assert_eq!(aggregate.rating, 4.5);

    let (_, aggregate) = engine
        .ratings
        .submit(counselor.id, user, session.id, 2, None)
        .await
        .unwrap();
    assert_eq!(aggregate.rating, 3.5);
    assert_eq!(aggregate.rating_count, 2);

    // Someone else's session cannot be used to rate.
    let stranger = engine
        .ratings
        .submit(counselor.id, Uuid::new_v4(), session.id, 1, None)
        .await;
    assert!(matches!(stranger, Err(CoreError::Forbidden(_))));
}

#[tokio::test]
async fn linked_request_is_completed_and_credited_once() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Samir", 2000).await;
    let user = Uuid::new_v4();

    let mut new = help(user);
    new.region = "Algiers".into();
    let request = engine.broadcaster.create_request(new).await.unwrap();
    let matches = engine.broadcaster.poll_matches(request.id).await.unwrap();
    assert_eq!(matches.len(), 1);
    engine
        .broadcaster
        .accept(request.id, counselor.id)
        .await
        .unwrap();

    let obligation = engine
        .payments
        .create_obligation(
            user,
            counselor.id,
            ObligationTarget {
                request_id: Some(request.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let session = match engine
        .handle_payment_event(obligation.id, PaymentOutcome::Confirmed)
        .await
        .unwrap()
    {
        PaymentResolution::SessionOpened(s) => s,
        other => panic!("unexpected resolution: {:?}", other),
    };
    assert_eq!(session.request_id, Some(request.id));

    engine
        .sessions
        .end(session.id, counselor.id, EndOutcome::Completed)
        .await
        .unwrap();
    let _ = engine
        .sessions
        .end(session.id, user, EndOutcome::Completed)
        .await;

    let credited = engine.directory.get(counselor.id).await.unwrap();
    assert_eq!(credited.total_cases, 1);
    assert_eq!(credited.completed_cases, 1);
    assert_eq!(credited.gross_earnings_cents, 2000);
    assert_eq!(
        engine.broadcaster.get(request.id).await.unwrap().status,
        HelpRequestStatus::Completed
    );
}

#[tokio::test]
async fn going_offline_keeps_active_sessions() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Fatima", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;

    engine
        .directory
        .set_online(counselor.id, false, None, &[])
        .await
        .unwrap();
    assert!(engine.directory.list_online(None).await.unwrap().is_empty());
    assert_eq!(
        engine.sessions.get(session.id).await.unwrap().status(),
        SessionStatus::Active
    );
    engine
        .channel
        .send(session.id, counselor.id, Role::Counselor, "still with you", MessageType::Text)
        .await
        .unwrap();
}

async fn open_session(engine: &Engine, obligation_id: Uuid) -> ChatSession {
    match engine
        .handle_payment_event(obligation_id, PaymentOutcome::Confirmed)
        .await
        .unwrap()
    {
        PaymentResolution::SessionOpened(s) => s,
        other => panic!("unexpected resolution: {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_request_earns_no_credit() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Leila", 1500).await;
    let user = Uuid::new_v4();
    let request = engine.broadcaster.create_request(help(user)).await.unwrap();
    let linked = ObligationTarget {
        request_id: Some(request.id),
        ..Default::default()
    };

    // Paid before the cancel landed: the session opens but is not linked.
    let obligation = engine
        .payments
        .create_obligation(user, counselor.id, linked)
        .await
        .unwrap();
    engine
        .broadcaster
        .cancel_request(request.id, user, None)
        .await
        .unwrap();
    let session = open_session(&engine, obligation.id).await;
    assert_eq!(session.request_id, None);

    engine
        .sessions
        .end(session.id, user, EndOutcome::Completed)
        .await
        .unwrap();
    let after = engine.directory.get(counselor.id).await.unwrap();
    assert_eq!(after.total_cases, 0);
    assert_eq!(after.completed_cases, 0);
    assert_eq!(after.gross_earnings_cents, 0);
    assert_eq!(
        engine.broadcaster.get(request.id).await.unwrap().status,
        HelpRequestStatus::Cancelled
    );

    // Booking against the cancelled request is refused up front.
    let late = engine
        .payments
        .create_obligation(user, counselor.id, linked)
        .await;
    assert!(matches!(late, Err(CoreError::InvalidTransition(_))));
}

#[tokio::test]
async fn another_counselors_session_cannot_complete_the_request() {
    let engine = common::engine();
    let paid = common::online_counselor(&engine, "Adel", 1000).await;
    let matched = common::online_counselor(&engine, "Meriem", 1000).await;
    let user = Uuid::new_v4();
    let request = engine.broadcaster.create_request(help(user)).await.unwrap();
    let linked = ObligationTarget {
        request_id: Some(request.id),
        ..Default::default()
    };

    let obligation = engine
        .payments
        .create_obligation(user, paid.id, linked)
        .await
        .unwrap();
    engine
        .broadcaster
        .accept(request.id, matched.id)
        .await
        .unwrap();

    let session = open_session(&engine, obligation.id).await;
    assert_eq!(session.request_id, None);
    engine
        .sessions
        .end(session.id, paid.id, EndOutcome::Completed)
        .await
        .unwrap();

    let request = engine.broadcaster.get(request.id).await.unwrap();
    assert_eq!(request.status, HelpRequestStatus::Accepted);
    assert_eq!(request.matched_counselor_id, Some(matched.id));
    assert_eq!(engine.directory.get(paid.id).await.unwrap().total_cases, 0);

    let rebook = engine
        .payments
        .create_obligation(user, paid.id, linked)
        .await;
    assert!(matches!(rebook, Err(CoreError::InvalidTransition(_))));
    engine
        .payments
        .create_obligation(user, matched.id, linked)
        .await
        .unwrap();
}
