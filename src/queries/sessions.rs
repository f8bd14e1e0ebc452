use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::sessions::{ChatSession, EndOutcome, SessionState, SessionStatus};

/*
The lifecycle enum is spread over status, dismissed_at/by, ended_at and
end_outcome; rows go through SessionState::from_columns on the way out.
*/
#[derive(sqlx::FromRow)]
struct ChatSessionRow {
    id: Uuid,
    request_id: Option<Uuid>,
    obligation_id: Uuid,
    user_id: Uuid,
    counselor_id: Uuid,
    booking_fee_cents: i64,
    status: SessionStatus,
    dismissed_at: Option<DateTime<Utc>>,
    dismissed_by: Option<Uuid>,
    ended_at: Option<DateTime<Utc>>,
    end_outcome: Option<EndOutcome>,
    last_message_summary: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    last_seq: i64,
    unread_count_user: i64,
    unread_count_counselor: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChatSessionRow> for ChatSession {
    type Error = CoreError;

    fn try_from(row: ChatSessionRow) -> Result<Self, Self::Error> {
        let state = SessionState::from_columns(
            row.status,
            row.dismissed_at,
            row.dismissed_by,
            row.ended_at,
            row.end_outcome,
        )
        .map_err(|e| CoreError::Storage(format!("session {}: {}", row.id, e)))?;

        Ok(ChatSession {
            id: row.id,
            request_id: row.request_id,
            obligation_id: row.obligation_id,
            user_id: row.user_id,
            counselor_id: row.counselor_id,
            booking_fee_cents: row.booking_fee_cents,
            state,
            last_message_summary: row.last_message_summary,
            last_message_at: row.last_message_at,
            last_seq: row.last_seq,
            unread_count_user: row.unread_count_user,
            unread_count_counselor: row.unread_count_counselor,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert_session(conn: &mut PgConnection, s: &ChatSession) -> CoreResult<()> {
    let dismissal = s.state.dismissal();
    sqlx::query(
        "INSERT INTO chat_sessions (id, request_id, obligation_id, user_id, counselor_id, \
         booking_fee_cents, status, dismissed_at, dismissed_by, ended_at, end_outcome, \
         last_message_summary, last_message_at, last_seq, unread_count_user, \
         unread_count_counselor, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(s.id)
    .bind(s.request_id)
    .bind(s.obligation_id)
    .bind(s.user_id)
    .bind(s.counselor_id)
    .bind(s.booking_fee_cents)
    .bind(s.status())
    .bind(dismissal.map(|d| d.at))
    .bind(dismissal.map(|d| d.by))
    .bind(s.state.ended_at())
    .bind(s.state.end_outcome())
    .bind(&s.last_message_summary)
    .bind(s.last_message_at)
    .bind(s.last_seq)
    .bind(s.unread_count_user)
    .bind(s.unread_count_counselor)
    .bind(s.created_at)
    .bind(s.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Claims an obligation for a session. Fails if the obligation was already used.
pub async fn claim_obligation(
    conn: &mut PgConnection,
    obligation_id: Uuid,
    session_id: Uuid,
) -> CoreResult<()> {
    sqlx::query("INSERT INTO obligation_sessions (obligation_id, session_id) VALUES ($1, $2)")
        .bind(obligation_id)
        .bind(session_id)
        .execute(conn)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => CoreError::InvalidTransition(
                format!("obligation {} already consumed", obligation_id),
            ),
            _ => CoreError::from(e),
        })?;

    Ok(())
}

pub async fn get_session_by_id(conn: &mut PgConnection, id: Uuid) -> CoreResult<Option<ChatSession>> {
    let row = sqlx::query_as::<_, ChatSessionRow>("SELECT * FROM chat_sessions WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.map(ChatSession::try_from).transpose()
}

pub async fn list_sessions_for_account(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> CoreResult<Vec<ChatSession>> {
    let rows = sqlx::query_as::<_, ChatSessionRow>(
        "SELECT * FROM chat_sessions WHERE user_id = $1 OR counselor_id = $1 \
         ORDER BY updated_at DESC",
    )
    .bind(account_id)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(ChatSession::try_from).collect()
}

pub async fn session_id_for_obligation(
    conn: &mut PgConnection,
    obligation_id: Uuid,
) -> CoreResult<Option<Uuid>> {
    let session_id: Option<Uuid> =
        sqlx::query_scalar("SELECT session_id FROM obligation_sessions WHERE obligation_id = $1")
            .bind(obligation_id)
            .fetch_optional(conn)
            .await?;

    Ok(session_id)
}

/// Writes the lifecycle columns if the row's status is one of `from`.
pub async fn update_state_if_status(
    conn: &mut PgConnection,
    s: &ChatSession,
    from: &[SessionStatus],
) -> CoreResult<bool> {
    let dismissal = s.state.dismissal();
    let result = sqlx::query(
        "UPDATE chat_sessions SET status = $2, dismissed_at = $3, dismissed_by = $4, \
         ended_at = $5, end_outcome = $6, updated_at = $7 \
         WHERE id = $1 AND status::TEXT = ANY($8)",
    )
    .bind(s.id)
    .bind(s.status())
    .bind(dismissal.map(|d| d.at))
    .bind(dismissal.map(|d| d.by))
    .bind(s.state.ended_at())
    .bind(s.state.end_outcome())
    .bind(s.updated_at)
    .bind(from.iter().map(|st| st.as_str().to_string()).collect::<Vec<_>>())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Whether the stored row already carries an end timestamp.
pub async fn is_ended(conn: &mut PgConnection, id: Uuid) -> CoreResult<bool> {
    let ended: Option<bool> =
        sqlx::query_scalar("SELECT ended_at IS NOT NULL FROM chat_sessions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;

    ended.ok_or_else(|| CoreError::NotFound(format!("session {}", id)))
}
