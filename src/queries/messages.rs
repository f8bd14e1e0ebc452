use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::identity::Role;
use crate::models::messages::Message;

pub async fn insert_message(conn: &mut PgConnection, m: &Message) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO messages (id, session_id, seq, sender_id, sender_role, message_type, body, \
         read, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(m.id)
    .bind(m.session_id)
    .bind(m.seq)
    .bind(m.sender_id)
    .bind(m.sender_role)
    .bind(m.message_type)
    .bind(&m.body)
    .bind(m.read)
    .bind(m.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Moves the session's summary and cursor forward, bumping the recipient's
/// counter unless the message is a system announcement.
pub async fn touch_session_for_message(conn: &mut PgConnection, m: &Message) -> CoreResult<()> {
    let (bump_user, bump_counselor) = match (m.is_system(), m.sender_role) {
        (true, _) => (0_i64, 0_i64),
        (false, Role::User) => (0, 1),
        (false, Role::Counselor) => (1, 0),
    };
    sqlx::query(
        "UPDATE chat_sessions SET last_seq = $2, last_message_at = $3, last_message_summary = $4, \
         unread_count_user = unread_count_user + $5, \
         unread_count_counselor = unread_count_counselor + $6, updated_at = $3 \
         WHERE id = $1",
    )
    .bind(m.session_id)
    .bind(m.seq)
    .bind(m.created_at)
    .bind(m.summary())
    .bind(bump_user)
    .bind(bump_counselor)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn get_messages_after(
    conn: &mut PgConnection,
    session_id: Uuid,
    after_seq: i64,
    limit: i64,
) -> CoreResult<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE session_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3",
    )
    .bind(session_id)
    .bind(after_seq)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(messages)
}

pub async fn get_messages_before(
    conn: &mut PgConnection,
    session_id: Uuid,
    before_seq: Option<i64>,
    limit: i64,
) -> CoreResult<Vec<Message>> {
    let mut messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE session_id = $1 AND ($2::BIGINT IS NULL OR seq < $2) \
         ORDER BY seq DESC LIMIT $3",
    )
    .bind(session_id)
    .bind(before_seq)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    messages.reverse();
    Ok(messages)
}

pub async fn mark_messages_read(
    conn: &mut PgConnection,
    session_id: Uuid,
    reader: Role,
) -> CoreResult<u64> {
    let result = sqlx::query(
        "UPDATE messages SET read = TRUE WHERE session_id = $1 AND sender_role <> $2 AND NOT read",
    )
    .bind(session_id)
    .bind(reader)
    .execute(&mut *conn)
    .await?;

    let column = match reader {
        Role::User => "unread_count_user",
        Role::Counselor => "unread_count_counselor",
    };
    sqlx::query(&format!(
        "UPDATE chat_sessions SET {} = 0 WHERE id = $1",
        column
    ))
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Rewrites every session's counters from the unread, non-system messages in its log.
pub async fn reconcile_unread_counters(conn: &mut PgConnection) -> CoreResult<u64> {
    let result = sqlx::query(
        "UPDATE chat_sessions s SET \
         unread_count_user = agg.for_user, unread_count_counselor = agg.for_counselor \
         FROM ( \
             SELECT cs.id, \
                 COUNT(m.id) FILTER (WHERE m.sender_role = 'counselor') AS for_user, \
                 COUNT(m.id) FILTER (WHERE m.sender_role = 'user') AS for_counselor \
             FROM chat_sessions cs \
             LEFT JOIN messages m ON m.session_id = cs.id \
                 AND NOT m.read AND m.message_type <> 'system' \
             GROUP BY cs.id \
         ) agg \
         WHERE s.id = agg.id \
         AND (s.unread_count_user <> agg.for_user OR s.unread_count_counselor <> agg.for_counselor)",
    )
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}
