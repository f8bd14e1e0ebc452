use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::counsel::locks::KeyedLocks;
use crate::error::{CoreError, CoreResult};
use crate::models::counselors::Counselor;
use crate::models::ratings::Rating;
use crate::models::sessions::SessionStatus;
use crate::store::Store;

pub const MAX_COMMENT_CHARS: usize = 1000;

/// One rating per (counselor, user) pair, re-submission overwrites.
/// The counselor aggregate is recomputed in the same write.
#[derive(Clone)]
pub struct RatingLedger {
    store: Arc<dyn Store>,
    counselor_locks: KeyedLocks,
}

impl RatingLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            counselor_locks: KeyedLocks::new(),
        }
    }

    pub async fn submit(
        &self,
        counselor_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        rating: i16,
        comment: Option<String>,
    ) -> CoreResult<(Rating, Counselor)> {
        if !(1..=5).contains(&rating) {
            return Err(CoreError::InvalidValue(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if comment
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS)
        {
            return Err(CoreError::InvalidValue(format!(
                "comment exceeds {} characters",
                MAX_COMMENT_CHARS
            )));
        }

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("session {}", session_id)))?;
        if session.user_id != user_id || session.counselor_id != counselor_id {
            return Err(CoreError::Forbidden(format!(
                "session {} was not held between this user and counselor",
                session_id
            )));
        }
        if session.status() != SessionStatus::Ended {
            return Err(CoreError::InvalidTransition(format!(
                "session {} must end before it can be rated",
                session_id
            )));
        }

        let _guard = self.counselor_locks.lock(counselor_id).await;
        let now = Utc::now();
        let candidate = Rating {
            id: Uuid::new_v4(),
            counselor_id,
            user_id,
            session_id,
            rating,
            comment,
            created_at: now,
            updated_at: now,
        };
        let (stored, counselor) = self.store.upsert_rating(&candidate).await?;
        tracing::info!(
            counselor_id = %counselor_id,
            user_id = %user_id,
            rating,
            average = counselor.rating,
            count = counselor.rating_count,
            "counselor rated"
        );
        Ok((stored, counselor))
    }

    pub async fn get_for_pair(&self, counselor_id: Uuid, user_id: Uuid) -> CoreResult<Rating> {
        self.store
            .get_rating(counselor_id, user_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "rating of counselor {} by user {}",
                    counselor_id, user_id
                ))
            })
    }

    pub fn prune_locks(&self) -> usize {
        self.counselor_locks.prune()
    }
}
