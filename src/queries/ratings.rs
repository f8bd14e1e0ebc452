use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::ratings::Rating;

/// Inserts or replaces the single rating a user holds for a counselor.
pub async fn upsert_rating(conn: &mut PgConnection, r: &Rating) -> CoreResult<Rating> {
    let rating = sqlx::query_as::<_, Rating>(
        "INSERT INTO ratings (id, counselor_id, user_id, session_id, rating, comment, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (counselor_id, user_id) DO UPDATE SET \
         session_id = EXCLUDED.session_id, rating = EXCLUDED.rating, \
         comment = EXCLUDED.comment, updated_at = EXCLUDED.updated_at \
         RETURNING *",
    )
    .bind(r.id)
    .bind(r.counselor_id)
    .bind(r.user_id)
    .bind(r.session_id)
    .bind(r.rating)
    .bind(&r.comment)
    .bind(r.created_at)
    .bind(r.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(rating)
}

pub async fn get_rating_for_pair(
    conn: &mut PgConnection,
    counselor_id: Uuid,
    user_id: Uuid,
) -> CoreResult<Option<Rating>> {
    let rating = sqlx::query_as::<_, Rating>(
        "SELECT * FROM ratings WHERE counselor_id = $1 AND user_id = $2",
    )
    .bind(counselor_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;

    Ok(rating)
}
