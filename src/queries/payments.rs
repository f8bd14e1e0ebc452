use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::payments::{ObligationStatus, PaymentObligation};

pub async fn insert_obligation(conn: &mut PgConnection, o: &PaymentObligation) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO payment_obligations (id, payer_id, payee_counselor_id, amount_cents, purpose, \
         status, session_id, request_id, created_at, resolved_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(o.id)
    .bind(o.payer_id)
    .bind(o.payee_counselor_id)
    .bind(o.amount_cents)
    .bind(o.purpose)
    .bind(o.status)
    .bind(o.session_id)
    .bind(o.request_id)
    .bind(o.created_at)
    .bind(o.resolved_at)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn get_obligation_by_id(
    conn: &mut PgConnection,
    id: Uuid,
) -> CoreResult<Option<PaymentObligation>> {
    let obligation =
        sqlx::query_as::<_, PaymentObligation>("SELECT * FROM payment_obligations WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;

    Ok(obligation)
}

/// Resolves a pending obligation. `None` means it was already resolved.
pub async fn resolve_pending_obligation(
    conn: &mut PgConnection,
    id: Uuid,
    status: ObligationStatus,
    now: DateTime<Utc>,
) -> CoreResult<Option<PaymentObligation>> {
    let obligation = sqlx::query_as::<_, PaymentObligation>(
        "UPDATE payment_obligations SET status = $2, resolved_at = $3 \
         WHERE id = $1 AND status = 'pending' RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(now)
    .fetch_optional(conn)
    .await?;

    Ok(obligation)
}
