mod common;

use counsel_backend::error::CoreError;
use counsel_backend::models::identity::Role;
use counsel_backend::models::messages::MessageType;
use counsel_backend::models::payments::PaymentOutcome;
use counsel_backend::models::sessions::{EndOutcome, SessionBlock, SessionStatus};
use counsel_backend::counsel::payments::ObligationTarget;
use uuid::Uuid;

#[tokio::test]
async fn ended_sessions_never_change_status() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Amina", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;
    engine.sessions.dismiss(session.id, counselor.id).await.unwrap();
    let repay = common::repayment(&engine, &session).await;

    engine
        .sessions
        .end(session.id, counselor.id, EndOutcome::Completed)
        .await
        .unwrap();

    let attempts = [
        engine.sessions.dismiss(session.id, counselor.id).await.err(),
        engine.sessions.reactivate(session.id, repay).await.err(),
        engine
            .sessions
            .end(session.id, user, EndOutcome::Completed)
            .await
            .err(),
    ];
    for err in attempts {
        assert!(matches!(err, Some(CoreError::InvalidTransition(_))), "{:?}", err);
    }

    let send = engine
        .channel
        .send(session.id, user, Role::User, "hello?", MessageType::Text)
        .await;
    assert!(matches!(
        send,
        Err(CoreError::SessionNotSendable {
            reason: SessionBlock::Ended,
            ..
        })
    ));
    assert_eq!(
        engine.sessions.get(session.id).await.unwrap().status(),
        SessionStatus::Ended
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_send_is_accepted_after_a_concurrent_dismiss() {
    for _ in 0..10 {
        let engine = common::engine();
        let counselor = common::online_counselor(&engine, "Karim", 500).await;
        let user = Uuid::new_v4();
        let session = common::paid_session(&engine, user, counselor.id).await;

        let mut sends = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            sends.push(tokio::spawn(async move {
                engine
                    .channel
                    .send(session.id, user, Role::User, &format!("msg {}", i), MessageType::Text)
                    .await
            }));
        }
        let dismiss = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sessions.dismiss(session.id, counselor.id).await })
        };

        let dismissed = dismiss.await.unwrap().unwrap();
        let dismiss_seq = dismissed.last_seq;

        for handle in sends {
            match handle.await.unwrap() {
                Ok(message) => assert!(
                    message.seq < dismiss_seq,
                    "message {} accepted after dismiss at {}",
                    message.seq,
                    dismiss_seq
                ),
                Err(CoreError::SessionNotSendable { reason, .. }) => {
                    assert_eq!(reason, SessionBlock::PaymentRequired)
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        let log = engine
            .channel
            .history(session.id, user, None, 200)
            .await
            .unwrap();
        let after_dismiss = log
            .iter()
            .filter(|m| m.seq > dismiss_seq && !m.is_system())
            .count();
        assert_eq!(after_dismiss, 0);
    }
}

#[tokio::test]
async fn unread_counters_track_the_other_role() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Sara", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;

    for i in 0..5 {
        engine
            .channel
            .send(session.id, user, Role::User, &format!("u{}", i), MessageType::Text)
            .await
            .unwrap();
    }
    let s = engine.sessions.get(session.id).await.unwrap();
    assert_eq!(s.unread_count_counselor, 5);
    assert_eq!(s.unread_count_user, 0);

    let flipped = engine.channel.mark_read(session.id, counselor.id).await.unwrap();
    assert_eq!(flipped, 5);
    let s = engine.sessions.get(session.id).await.unwrap();
    assert_eq!(s.unread_count_counselor, 0);
    assert_eq!(s.unread_count_user, 0);

    for i in 0..2 {
        engine
            .channel
            .send(
                session.id,
                counselor.id,
                Role::Counselor,
                &format!("c{}", i),
                MessageType::Text,
            )
            .await
            .unwrap();
    }
    let s = engine.sessions.get(session.id).await.unwrap();
    assert_eq!(s.unread_count_user, 2);
    assert_eq!(s.unread_count_counselor, 0);
}

#[tokio::test]
async fn rating_resubmission_replaces_the_previous_one() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Nadia", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;
    engine
        .sessions
        .end(session.id, user, EndOutcome::Completed)
        .await
        .unwrap();

    engine
        .ratings
        .submit(counselor.id, user, session.id, 5, None)
        .await
        .unwrap();
    let (rating, aggregate) = engine
        .ratings
        .submit(counselor.id, user, session.id, 2, Some("changed my mind".into()))
        .await
        .unwrap();

    assert_eq!(rating.rating, 2);
    assert_eq!(aggregate.rating_count, 1);
    assert_eq!(aggregate.rating, 2.0);
    let stored = engine.ratings.get_for_pair(counselor.id, user).await.unwrap();
    assert_eq!(stored.id, rating.id);
    assert_eq!(stored.rating, 2);
}

#[tokio::test]
async fn out_of_range_rating_is_rejected() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Omar", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;
    engine
        .sessions
        .end(session.id, user, EndOutcome::Completed)
        .await
        .unwrap();

    for bad in [0, 6, -1] {
        let err = engine
            .ratings
            .submit(counselor.id, user, session.id, bad, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue(_)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirmed_obligation_opens_at_most_one_session() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Yasmine", 1000).await;
    let user = Uuid::new_v4();
    let obligation = engine
        .payments
        .create_obligation(user, counselor.id, ObligationTarget::default())
        .await
        .unwrap();
    engine
        .payments
        .on_payment_confirmed(obligation.id, PaymentOutcome::Confirmed)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.sessions.create_session(obligation.id).await
        }));
    }

    let mut opened = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(CoreError::InvalidTransition(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(opened, 1);
    assert_eq!(engine.sessions.list_for(user).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replayed_payment_callbacks_resolve_to_the_same_session() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Lina", 1000).await;
    let user = Uuid::new_v4();
    let obligation = engine
        .payments
        .create_obligation(user, counselor.id, ObligationTarget::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .handle_payment_event(obligation.id, PaymentOutcome::Confirmed)
                .await
        }));
    }

    let mut session_ids = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            counsel_backend::counsel::engine::PaymentResolution::SessionOpened(s) => {
                session_ids.push(s.id)
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }
    session_ids.dedup();
    assert_eq!(session_ids.len(), 1);
}
