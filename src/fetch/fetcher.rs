//! CohortFetcher: lazily fetched, memoized size and rows per cohort
//!
//! The first read of a cohort's size or rows goes to the service; later reads return the
//! cached value. Concurrent first reads are not coalesced: each issues its own call and
//! each writes back the same value. A write-back is dropped if the cohort's source or
//! filter was reassigned while the call was in flight.

use super::cache::{AttributeCache, CacheKey, Histogram};
use crate::graph::{Cohort, ElementId, LineageError, LineageStore, Row};
use crate::service::{canonical, CohortQuery, CohortService, ServiceError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors raised while fetching cohort data
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Lineage error: {0}")]
    Lineage(#[from] LineageError),

    #[error("Cohort {0} has contradictory constraints")]
    FilterConflict(ElementId),

    #[error("Cohort {0} has no service handle")]
    NotMaterialized(ElementId),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for fetches
pub type FetchResult<T> = Result<T, FetchError>;

fn query_for(cohort: &Cohort) -> FetchResult<CohortQuery> {
    CohortQuery::for_cohort(cohort).ok_or_else(|| FetchError::NotMaterialized(cohort.id.clone()))
}

fn lock(store: &Mutex<LineageStore>) -> FetchResult<MutexGuard<'_, LineageStore>> {
    store
        .lock()
        .map_err(|e| FetchError::Internal(format!("lock poisoned: {}", e)))
}

/// Reads sizes, rows and histograms through the cohort service, caching on the cohort
#[derive(Clone)]
pub struct CohortFetcher {
    service: Arc<dyn CohortService>,
    cache: Arc<AttributeCache>,
}

impl std::fmt::Debug for CohortFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortFetcher")
            .field("cached_histograms", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl CohortFetcher {
    pub fn new(service: Arc<dyn CohortService>) -> Self {
        Self::with_cache(service, Arc::new(AttributeCache::new()))
    }

    /// Use an injected histogram cache
    pub fn with_cache(service: Arc<dyn CohortService>, cache: Arc<AttributeCache>) -> Self {
        Self { service, cache }
    }

    pub fn cache(&self) -> &Arc<AttributeCache> {
        &self.cache
    }

    /// Size of a cohort owned by the caller
    pub async fn size(&self, cohort: &mut Cohort) -> FetchResult<u64> {
        if let Some(size) = cohort.cached_size() {
            return Ok(size);
        }
        let revision = cohort.revision();
        let query = query_for(cohort)?;
        tracing::debug!(cohort = %cohort.id, "fetching size");
        let size = self.service.size(&query).await?;
        cohort.store_size(revision, size);
        Ok(size)
    }

    /// Rows of a cohort owned by the caller
    pub async fn rows(&self, cohort: &mut Cohort) -> FetchResult<Arc<Vec<Row>>> {
        if let Some(rows) = cohort.cached_rows() {
            return Ok(rows);
        }
        let revision = cohort.revision();
        let query = query_for(cohort)?;
        tracing::debug!(cohort = %cohort.id, "fetching rows");
        let rows = Arc::new(self.service.rows(&query).await?);
        cohort.store_rows(revision, rows.clone());
        Ok(rows)
    }

    /// Size of a cohort in a shared store. The lock is not held across the service call.
    pub async fn size_of(&self, store: &Mutex<LineageStore>, id: &ElementId) -> FetchResult<u64> {
        let (revision, query) = {
            let guard = lock(store)?;
            let cohort = guard.cohort(id)?;
            if let Some(size) = cohort.cached_size() {
                return Ok(size);
            }
            (cohort.revision(), query_for(cohort)?)
        };
        tracing::debug!(cohort = %id, "fetching size");
        let size = self.service.size(&query).await?;

        let mut guard = lock(store)?;
        if let Ok(cohort) = guard.cohort_mut(id) {
            if !cohort.store_size(revision, size) {
                tracing::debug!(cohort = %id, "cohort changed during size fetch, not cached");
            }
        }
        Ok(size)
    }

    /// Rows of a cohort in a shared store. The lock is not held across the service call.
    pub async fn rows_of(
        &self,
        store: &Mutex<LineageStore>,
        id: &ElementId,
    ) -> FetchResult<Arc<Vec<Row>>> {
        let (revision, query) = {
            let guard = lock(store)?;
            let cohort = guard.cohort(id)?;
            if let Some(rows) = cohort.cached_rows() {
                return Ok(rows);
            }
            (cohort.revision(), query_for(cohort)?)
        };
        tracing::debug!(cohort = %id, "fetching rows");
        let rows = Arc::new(self.service.rows(&query).await?);

        let mut guard = lock(store)?;
        if let Ok(cohort) = guard.cohort_mut(id) {
            cohort.store_rows(revision, rows.clone());
        }
        Ok(rows)
    }

    /// Category counts of `attribute` within a cohort.
    ///
    /// Refused with `FilterConflict` when the cohort's constraints contradict each other.
    pub async fn histogram(
        &self,
        store: &Mutex<LineageStore>,
        id: &ElementId,
        attribute: &str,
    ) -> FetchResult<Histogram> {
        let key = CacheKey::new(id.clone(), attribute);
        let revision = {
            let guard = lock(store)?;
            let cohort = guard.cohort(id)?;
            if cohort.has_filter_conflict() {
                tracing::warn!(cohort = %id, attribute, "histogram refused: filter conflict");
                return Err(FetchError::FilterConflict(id.clone()));
            }
            cohort.revision()
        };
        if let Some(histogram) = self.cache.get(&key, revision) {
            return Ok(histogram);
        }

        let rows = self.rows_of(store, id).await?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut missing = 0;
        for row in rows.iter() {
            match row.get(attribute).and_then(canonical) {
                Some(value) => *counts.entry(value).or_insert(0) += 1,
                None => missing += 1,
            }
        }
        let histogram = Histogram {
            attribute: attribute.to_string(),
            counts,
            missing,
        };
        self.cache.insert(key, revision, histogram.clone());
        Ok(histogram)
    }
}
