use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::counsel::catalog::Catalog;
use crate::error::{CoreError, CoreResult};
use crate::models::counselors::{normalize_specializations, Counselor};
use crate::store::Store;

/// Counselor availability by region and specialization.
#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn Store>,
    catalog: Catalog,
}

impl Directory {
    pub fn new(store: Arc<dyn Store>, catalog: Catalog) -> Self {
        Self { store, catalog }
    }

    /// Entry point for the admin approval workflow.
    pub async fn register(&self, name: &str, booking_fee_cents: i64) -> CoreResult<Counselor> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidValue("counselor name is required".into()));
        }
        if booking_fee_cents < 0 {
            return Err(CoreError::InvalidValue(format!(
                "booking fee must be >= 0, got {}",
                booking_fee_cents
            )));
        }
        let counselor = Counselor::new(name, booking_fee_cents);
        self.store.insert_counselor(&counselor).await?;
        tracing::info!(counselor_id = %counselor.id, "counselor registered");
        Ok(counselor)
    }

    pub async fn get(&self, id: Uuid) -> CoreResult<Counselor> {
        self.store
            .get_counselor(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("counselor {}", id)))
    }

    pub async fn list_online(&self, region: Option<&str>) -> CoreResult<Vec<Counselor>> {
        let region = region.map(str::trim).filter(|r| !r.is_empty());
        self.store.list_online_counselors(region).await
    }

    /// Toggles availability. Going online needs a region and at least one
    /// specialization, either supplied now or already on record. Going
    /// offline leaves any active sessions alone.
    pub async fn set_online(
        &self,
        counselor_id: Uuid,
        online: bool,
        region: Option<&str>,
        specializations: &[String],
    ) -> CoreResult<Counselor> {
        let current = self.get(counselor_id).await?;
        let region = region.map(str::trim).filter(|r| !r.is_empty());
        let specializations = normalize_specializations(specializations);

        if online {
            let known_region = current
                .region
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
            if region.is_none() && !known_region {
                return Err(CoreError::InvalidValue(
                    "a region is required to go online".into(),
                ));
            }
            if specializations.is_empty() && current.specializations.is_empty() {
                return Err(CoreError::InvalidValue(
                    "at least one specialization is required to go online".into(),
                ));
            }
        }

        let updated = self
            .store
            .update_presence(counselor_id, online, region, &specializations, Utc::now())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("counselor {}", counselor_id)))?;

        if updated.region != current.region || updated.specializations != current.specializations {
            self.catalog.invalidate().await;
        }
        tracing::info!(
            counselor_id = %counselor_id,
            online,
            region = ?updated.region,
            "counselor presence changed"
        );
        Ok(updated)
    }

    /// Online counselors able to take `category` in `region`, falling back
    /// to every online counselor with the specialization when the region is empty.
    pub async fn matching(&self, region: &str, category: &str) -> CoreResult<Vec<Counselor>> {
        let regional: Vec<Counselor> = self
            .list_online(Some(region))
            .await?
            .into_iter()
            .filter(|c| c.has_specialization(category))
            .collect();
        if !regional.is_empty() {
            return Ok(regional);
        }

        let global = self
            .list_online(None)
            .await?
            .into_iter()
            .filter(|c| c.has_specialization(category))
            .collect();
        Ok(global)
    }
}
