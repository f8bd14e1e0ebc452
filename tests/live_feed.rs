mod common;

use std::time::Duration;

use counsel_backend::counsel::channel::{FeedEvent, SessionFeed};
use counsel_backend::error::CoreError;
use counsel_backend::models::identity::Role;
use counsel_backend::models::messages::{Message, MessageType};
use counsel_backend::models::sessions::SessionStatus;
use futures_util::StreamExt;
use uuid::Uuid;

async fn next(feed: &mut SessionFeed) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("feed stalled")
        .expect("feed closed")
        .expect("feed error")
}

async fn next_message(feed: &mut SessionFeed) -> Message {
    loop {
        if let FeedEvent::Message(message) = next(feed).await {
            return message;
        }
    }
}

#[tokio::test]
async fn snapshot_then_live_messages_in_order() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Mona", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;

    let mut feed = engine
        .channel
        .subscribe(session.id, counselor.id, None)
        .await
        .unwrap();
    let opening = next_message(&mut feed).await;
    assert_eq!(opening.seq, 1);
    assert_eq!(opening.message_type, MessageType::System);

    engine
        .channel
        .send(session.id, user, Role::User, "first", MessageType::Text)
        .await
        .unwrap();
    engine
        .channel
        .send(session.id, user, Role::User, "second", MessageType::Voice)
        .await
        .unwrap();

    let first = next_message(&mut feed).await;
    let second = next_message(&mut feed).await;
    assert_eq!((first.seq, first.body.as_str()), (2, "first"));
    assert_eq!(second.seq, 3);
    assert!(first.created_at < second.created_at);
}

#[tokio::test]
async fn resubscribing_replays_everything_missed() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Aya", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;

    let mut feed = engine
        .channel
        .subscribe(session.id, user, None)
        .await
        .unwrap();
    let last_seen = next_message(&mut feed).await.seq;
    drop(feed);
    assert_eq!(engine.hub.subscriber_count(session.id), 0);

    for i in 0..5 {
        engine
            .channel
            .send(
                session.id,
                counselor.id,
                Role::Counselor,
                &format!("while away {}", i),
                MessageType::Text,
            )
            .await
            .unwrap();
    }

    let mut feed = engine
        .channel
        .subscribe(session.id, user, Some(last_seen))
        .await
        .unwrap();
    let mut seqs = Vec::new();
    for _ in 0..5 {
        seqs.push(next_message(&mut feed).await.seq);
    }
    assert_eq!(seqs, vec![2, 3, 4, 5, 6]);

    engine
        .channel
        .send(session.id, counselor.id, Role::Counselor, "live", MessageType::Text)
        .await
        .unwrap();
    assert_eq!(next_message(&mut feed).await.seq, 7);
}

#[tokio::test]
async fn lifecycle_changes_reach_subscribers() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Zina", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;

    let mut feed = engine
        .channel
        .subscribe(session.id, user, Some(1))
        .await
        .unwrap();
    engine.sessions.dismiss(session.id, counselor.id).await.unwrap();

    let notice = next_message(&mut feed).await;
    assert_eq!(notice.message_type, MessageType::System);
    let state = loop {
        if let FeedEvent::State { status } = next(&mut feed).await {
            break status;
        }
    };
    assert_eq!(state, SessionStatus::Dismissed);

    engine.channel.mark_read(session.id, counselor.id).await.unwrap();
    let reader = loop {
        if let FeedEvent::Read { reader } = next(&mut feed).await {
            break reader;
        }
    };
    assert_eq!(reader, Role::Counselor);
}

#[tokio::test]
async fn outsiders_cannot_subscribe() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Dalia", 1000).await;
    let session = common::paid_session(&engine, Uuid::new_v4(), counselor.id).await;

    let result = engine
        .channel
        .subscribe(session.id, Uuid::new_v4(), None)
        .await;
    assert!(matches!(result, Err(CoreError::Forbidden(_))));
}

#[tokio::test]
async fn ended_session_channels_are_pruned_after_disconnect() {
    let engine = common::engine();
    let counselor = common::online_counselor(&engine, "Hiba", 1000).await;
    let user = Uuid::new_v4();
    let session = common::paid_session(&engine, user, counselor.id).await;
    engine
        .sessions
        .end(session.id, user, counsel_backend::models::sessions::EndOutcome::Completed)
        .await
        .unwrap();

    let feed = engine.channel.subscribe(session.id, user, None).await.unwrap();
    drop(feed);
    assert_eq!(engine.hub.prune(), 1);
    assert_eq!(engine.hub.active_sessions(), 0);
}
