use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::models::catalog::CatalogSnapshot;
use crate::store::Store;

/// Read-through cache of the regions and categories the directory knows
/// about. Owned by the engine; refreshed on TTL expiry or `invalidate`.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
    ttl: Duration,
    cached: Arc<RwLock<Option<(Instant, CatalogSnapshot)>>>,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get(&self) -> CoreResult<CatalogSnapshot> {
        if let Some((loaded_at, snapshot)) = self.cached.read().await.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another caller may have refreshed while we waited for the write lock.
        if let Some((loaded_at, snapshot)) = slot.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }
        let snapshot = self.store.catalog().await?;
        tracing::debug!(
            regions = snapshot.regions.len(),
            categories = snapshot.categories.len(),
            "catalog refreshed"
        );
        *slot = Some((Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::counselors::Counselor;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn serves_cached_value_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Catalog::new(store.clone(), Duration::from_secs(3600));
        assert!(catalog.get().await.unwrap().regions.is_empty());

        let mut counselor = Counselor::new("Karim", 500);
        counselor.region = Some("oran".into());
        counselor.specializations = vec!["family".into()];
        store.insert_counselor(&counselor).await.unwrap();

        assert!(catalog.get().await.unwrap().regions.is_empty());
        catalog.invalidate().await;
        let fresh = catalog.get().await.unwrap();
        assert_eq!(fresh.regions, vec!["oran".to_string()]);
        assert_eq!(fresh.categories, vec!["family".to_string()]);
    }

    #[tokio::test]
    async fn zero_ttl_always_reads_through() {
        let store = Arc::new(MemoryStore::new());
        let catalog = Catalog::new(store.clone(), Duration::ZERO);
        catalog.get().await.unwrap();

        let mut counselor = Counselor::new("Lina", 500);
        counselor.region = Some("annaba".into());
        store.insert_counselor(&counselor).await.unwrap();

        assert_eq!(catalog.get().await.unwrap().regions.len(), 1);
    }
}
