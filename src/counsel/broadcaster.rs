use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::counsel::directory::Directory;
use crate::counsel::locks::KeyedLocks;
use crate::error::{CoreError, CoreResult};
use crate::models::counselors::Counselor;
use crate::models::requests::{HelpRequest, HelpRequestStatus};
use crate::store::Store;

/// Fields a client supplies when asking for help.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub requester_id: Uuid,
    pub region: String,
    pub category: String,
    pub note: String,
    pub phone: Option<String>,
}

/// Offers help requests to matching online counselors and walks them
/// through their forward-only lifecycle.
#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn Store>,
    directory: Directory,
    locks: KeyedLocks,
    ttl: Duration,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn Store>, directory: Directory, ttl: Duration) -> Self {
        Self {
            store,
            directory,
            locks: KeyedLocks::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create_request(&self, new: NewRequest) -> CoreResult<HelpRequest> {
        let region = new.region.trim().to_string();
        let category = new.category.trim().to_lowercase();
        if region.is_empty() {
            return Err(CoreError::InvalidValue("region is required".into()));
        }
        if category.is_empty() {
            return Err(CoreError::InvalidValue("category is required".into()));
        }

        let phone = new.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        let request = HelpRequest::new(
            new.requester_id,
            region,
            category,
            new.note.trim().to_string(),
            phone,
        );
        self.store.insert_request(&request).await?;
        tracing::info!(
            request_id = %request.id,
            region = %request.region,
            category = %request.category,
            "help request broadcasting"
        );
        Ok(request)
    }

    pub async fn get(&self, request_id: Uuid) -> CoreResult<HelpRequest> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("request {}", request_id)))
    }

    /// Current matches for a broadcasting request. Each poll bumps the
    /// request's broadcast counter.
    pub async fn poll_matches(&self, request_id: Uuid) -> CoreResult<Vec<Counselor>> {
        let _guard = self.locks.lock(request_id).await;
        let mut request = self.get(request_id).await?;
        if request.status != HelpRequestStatus::Broadcasting {
            return Err(CoreError::InvalidTransition(format!(
                "request {} is {}, not broadcasting",
                request_id,
                request.status.as_str()
            )));
        }

        let matches = self
            .directory
            .matching(&request.region, &request.category)
            .await?;

        let expected = request.status;
        request.broadcast_count += 1;
        request.updated_at = Utc::now();
        self.store.update_request(&request, expected).await?;
        tracing::debug!(
            request_id = %request_id,
            matches = matches.len(),
            broadcast_count = request.broadcast_count,
            "request polled"
        );
        Ok(matches)
    }

    /// A counselor picks up a broadcasting request.
    pub async fn accept(&self, request_id: Uuid, counselor_id: Uuid) -> CoreResult<HelpRequest> {
        let _guard = self.locks.lock(request_id).await;
        let request = self.get(request_id).await?;
        let counselor = self.directory.get(counselor_id).await?;
        if !counselor.online {
            return Err(CoreError::InvalidTransition(format!(
                "counselor {} is offline",
                counselor_id
            )));
        }
        if !counselor.has_specialization(&request.category) {
            return Err(CoreError::Forbidden(format!(
                "counselor {} does not handle {}",
                counselor_id, request.category
            )));
        }

        self.advance(request, HelpRequestStatus::Accepted, |r| {
            r.matched_counselor_id = Some(counselor_id);
        })
        .await
    }

    /// Links a request to the counselor the client paid. Broadcasting
    /// requests become accepted; requests already matched to the same
    /// counselor are left as they are.
    pub async fn select(&self, request_id: Uuid, counselor_id: Uuid) -> CoreResult<HelpRequest> {
        let _guard = self.locks.lock(request_id).await;
        let request = self.get(request_id).await?;
        match request.status {
            HelpRequestStatus::Broadcasting => {
                self.advance(request, HelpRequestStatus::Accepted, |r| {
                    r.matched_counselor_id = Some(counselor_id);
                })
                .await
            }
            HelpRequestStatus::Accepted | HelpRequestStatus::Scheduled
                if request.matched_counselor_id == Some(counselor_id) =>
            {
                Ok(request)
            }
            other => Err(CoreError::InvalidTransition(format!(
                "request {} is {} and cannot be linked to counselor {}",
                request_id,
                other.as_str(),
                counselor_id
            ))),
        }
    }

    pub async fn schedule(&self, request_id: Uuid, counselor_id: Uuid) -> CoreResult<HelpRequest> {
        let _guard = self.locks.lock(request_id).await;
        let request = self.get(request_id).await?;
        if request.matched_counselor_id != Some(counselor_id) {
            return Err(CoreError::Forbidden(format!(
                "request {} is not matched to counselor {}",
                request_id, counselor_id
            )));
        }
        self.advance(request, HelpRequestStatus::Scheduled, |_| {}).await
    }

    /// Marks an accepted or scheduled request done. Only the matched
    /// counselor's session can complete it.
    pub async fn complete(&self, request_id: Uuid, counselor_id: Uuid) -> CoreResult<HelpRequest> {
        let _guard = self.locks.lock(request_id).await;
        let request = self.get(request_id).await?;
        if request.matched_counselor_id != Some(counselor_id) {
            return Err(CoreError::Forbidden(format!(
                "request {} is not matched to counselor {}",
                request_id, counselor_id
            )));
        }
        self.advance(request, HelpRequestStatus::Completed, |_| {}).await
    }

    pub async fn cancel_request(
        &self,
        request_id: Uuid,
        requester_id: Uuid,
        reason: Option<String>,
    ) -> CoreResult<HelpRequest> {
        let _guard = self.locks.lock(request_id).await;
        let request = self.get(request_id).await?;
        if request.requester_id != requester_id {
            return Err(CoreError::Forbidden(format!(
                "request {} belongs to another requester",
                request_id
            )));
        }
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        self.advance(request, HelpRequestStatus::Cancelled, move |r| {
            r.cancel_reason = reason;
        })
        .await
    }

    /// Expires requests that have been broadcasting longer than the TTL.
    /// A request that fails to update is left untouched for the next tick.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let cutoff = now - self.ttl;
        let stale = self.store.list_stale_requests(cutoff).await?;
        let mut expired = 0;

        for candidate in stale {
            let _guard = self.locks.lock(candidate.id).await;
            // Re-read under the lock: a cancel may have landed since listing.
            let request = match self.store.get_request(candidate.id).await {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(request_id = %candidate.id, error = %e, "sweep skipped request");
                    continue;
                }
            };
            if request.status != HelpRequestStatus::Broadcasting || request.created_at >= cutoff {
                continue;
            }

            let mut next = request.clone();
            next.status = HelpRequestStatus::Expired;
            next.updated_at = now;
            match self
                .store
                .update_request(&next, HelpRequestStatus::Broadcasting)
                .await
            {
                Ok(true) => {
                    expired += 1;
                    tracing::info!(request_id = %next.id, "help request expired");
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(request_id = %next.id, error = %e, "sweep skipped request");
                }
            }
        }

        Ok(expired)
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn advance<F>(
        &self,
        request: HelpRequest,
        next: HelpRequestStatus,
        mutate: F,
    ) -> CoreResult<HelpRequest>
    where
        F: FnOnce(&mut HelpRequest),
    {
        let current = request.status;
        if !current.can_transition_to(next) {
            return Err(CoreError::InvalidTransition(format!(
                "request {} cannot move from {} to {}",
                request.id,
                current.as_str(),
                next.as_str()
            )));
        }

        let mut updated = request;
        updated.status = next;
        updated.updated_at = Utc::now();
        mutate(&mut updated);

        if !self.store.update_request(&updated, current).await? {
            return Err(CoreError::InvalidTransition(format!(
                "request {} changed concurrently",
                updated.id
            )));
        }
        tracing::info!(
            request_id = %updated.id,
            from = current.as_str(),
            to = next.as_str(),
            "help request transitioned"
        );
        Ok(updated)
    }
}
