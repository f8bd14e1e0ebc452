use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::catalog::CatalogSnapshot;
use crate::models::counselors::{CaseCredit, Counselor};

pub async fn insert_counselor(conn: &mut PgConnection, c: &Counselor) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO counselors (id, name, region, specializations, online, booking_fee_cents, \
         rating, rating_count, total_cases, completed_cases, gross_earnings_cents, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(c.id)
    .bind(&c.name)
    .bind(&c.region)
    .bind(&c.specializations)
    .bind(c.online)
    .bind(c.booking_fee_cents)
    .bind(c.rating)
    .bind(c.rating_count)
    .bind(c.total_cases)
    .bind(c.completed_cases)
    .bind(c.gross_earnings_cents)
    .bind(c.created_at)
    .bind(c.updated_at)
    .execute(conn)
    .await
    .map_err(|e| match e.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => {
            CoreError::InvalidValue(format!("counselor {} already registered", c.id))
        }
        _ => CoreError::from(e),
    })?;

    Ok(())
}

pub async fn get_counselor_by_id(conn: &mut PgConnection, id: Uuid) -> CoreResult<Option<Counselor>> {
    let counselor = sqlx::query_as::<_, Counselor>("SELECT * FROM counselors WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(counselor)
}

pub async fn update_presence(
    conn: &mut PgConnection,
    id: Uuid,
    online: bool,
    region: Option<&str>,
    specializations: &[String],
    now: DateTime<Utc>,
) -> CoreResult<Option<Counselor>> {
    let specs: Option<Vec<String>> = if specializations.is_empty() {
        None
    } else {
        Some(specializations.to_vec())
    };
    let counselor = sqlx::query_as::<_, Counselor>(
        "UPDATE counselors SET online = $2, region = COALESCE($3, region), \
         specializations = COALESCE($4, specializations), updated_at = $5 \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(online)
    .bind(region)
    .bind(specs)
    .bind(now)
    .fetch_optional(conn)
    .await?;

    Ok(counselor)
}

pub async fn list_online_counselors(
    conn: &mut PgConnection,
    region: Option<&str>,
) -> CoreResult<Vec<Counselor>> {
    let counselors = sqlx::query_as::<_, Counselor>(
        "SELECT * FROM counselors WHERE online \
         AND ($1::TEXT IS NULL OR lower(region) = lower($1)) \
         ORDER BY name, id",
    )
    .bind(region)
    .fetch_all(conn)
    .await?;

    Ok(counselors)
}

pub async fn load_catalog(conn: &mut PgConnection) -> CoreResult<CatalogSnapshot> {
    let regions: Vec<String> = sqlx::query_scalar(
        "SELECT MIN(region) AS region FROM counselors WHERE region IS NOT NULL \
         GROUP BY lower(region) ORDER BY lower(region)",
    )
    .fetch_all(&mut *conn)
    .await?;

    let categories: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT unnest(specializations) AS category FROM counselors ORDER BY category",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(CatalogSnapshot {
        regions,
        categories,
    })
}

pub async fn apply_case_credit(conn: &mut PgConnection, credit: CaseCredit) -> CoreResult<()> {
    sqlx::query(
        "UPDATE counselors SET total_cases = total_cases + 1, \
         completed_cases = completed_cases + CASE WHEN $2 THEN 1 ELSE 0 END, \
         gross_earnings_cents = gross_earnings_cents + $3, updated_at = now() \
         WHERE id = $1",
    )
    .bind(credit.counselor_id)
    .bind(credit.completed)
    .bind(credit.earnings_cents)
    .execute(conn)
    .await?;

    Ok(())
}

/// Recomputes the rating aggregate from every stored rating for the counselor.
pub async fn recompute_rating(conn: &mut PgConnection, counselor_id: Uuid) -> CoreResult<Counselor> {
    let counselor = sqlx::query_as::<_, Counselor>(
        "UPDATE counselors c SET \
         rating = COALESCE(agg.avg_rating, 0), rating_count = agg.cnt, updated_at = now() \
         FROM (SELECT ROUND(AVG(rating)::NUMERIC, 2)::DOUBLE PRECISION AS avg_rating, COUNT(*) AS cnt \
               FROM ratings WHERE counselor_id = $1) agg \
         WHERE c.id = $1 RETURNING c.*",
    )
    .bind(counselor_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("counselor {}", counselor_id)))?;

    Ok(counselor)
}
