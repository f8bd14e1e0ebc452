use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::requests::{HelpRequest, HelpRequestStatus};

pub async fn insert_request(conn: &mut PgConnection, r: &HelpRequest) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO help_requests (id, requester_id, region, category, note, phone, status, \
         matched_counselor_id, broadcast_count, cancel_reason, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(r.id)
    .bind(r.requester_id)
    .bind(&r.region)
    .bind(&r.category)
    .bind(&r.note)
    .bind(&r.phone)
    .bind(r.status)
    .bind(r.matched_counselor_id)
    .bind(r.broadcast_count)
    .bind(&r.cancel_reason)
    .bind(r.created_at)
    .bind(r.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn get_request_by_id(conn: &mut PgConnection, id: Uuid) -> CoreResult<Option<HelpRequest>> {
    let request = sqlx::query_as::<_, HelpRequest>("SELECT * FROM help_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(request)
}

/// Compare-and-set on status; returns whether a row was written.
pub async fn update_request_if_status(
    conn: &mut PgConnection,
    r: &HelpRequest,
    expected: HelpRequestStatus,
) -> CoreResult<bool> {
    let result = sqlx::query(
        "UPDATE help_requests SET status = $2, matched_counselor_id = $3, broadcast_count = $4, \
         cancel_reason = $5, updated_at = $6 WHERE id = $1 AND status = $7",
    )
    .bind(r.id)
    .bind(r.status)
    .bind(r.matched_counselor_id)
    .bind(r.broadcast_count)
    .bind(&r.cancel_reason)
    .bind(r.updated_at)
    .bind(expected)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn list_stale_broadcasting(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> CoreResult<Vec<HelpRequest>> {
    let requests = sqlx::query_as::<_, HelpRequest>(
        "SELECT * FROM help_requests WHERE status = 'broadcasting' AND created_at < $1 \
         ORDER BY created_at",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;

    Ok(requests)
}
