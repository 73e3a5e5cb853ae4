//! AttributeCache: per (cohort, attribute) histogram cache shared across fetchers

use crate::graph::ElementId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cohort: ElementId,
    pub attribute: String,
}

impl CacheKey {
    pub fn new(cohort: ElementId, attribute: impl Into<String>) -> Self {
        Self {
            cohort,
            attribute: attribute.into(),
        }
    }
}

/// Category counts of one attribute within one cohort
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub attribute: String,
    pub counts: BTreeMap<String, u64>,
    /// Rows where the attribute is missing
    pub missing: u64,
}

impl Histogram {
    pub fn total(&self) -> u64 {
        self.counts.values().sum::<u64>() + self.missing
    }
}

#[derive(Debug, Clone)]
struct Entry {
    revision: u64,
    histogram: Histogram,
}

/// Histograms keyed by (cohort, attribute), valid for one cohort revision
#[derive(Debug, Default)]
pub struct AttributeCache {
    entries: DashMap<CacheKey, Entry>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached histogram, if it was computed at `revision`
    pub fn get(&self, key: &CacheKey, revision: u64) -> Option<Histogram> {
        self.entries
            .get(key)
            .filter(|e| e.revision == revision)
            .map(|e| e.histogram.clone())
    }

    pub fn insert(&self, key: CacheKey, revision: u64, histogram: Histogram) {
        self.entries.insert(
            key,
            Entry {
                revision,
                histogram,
            },
        );
    }

    /// Drop every entry of a cohort
    pub fn evict_cohort(&self, cohort: &ElementId) {
        self.entries.retain(|k, _| &k.cohort != cohort);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_from_older_revisions_miss() {
        let cache = AttributeCache::new();
        let key = CacheKey::new(ElementId::from("cohort-1"), "sex");
        cache.insert(key.clone(), 3, Histogram::default());
        assert!(cache.get(&key, 3).is_some());
        assert!(cache.get(&key, 4).is_none());
    }

    #[test]
    fn evict_cohort_keeps_other_cohorts() {
        let cache = AttributeCache::new();
        cache.insert(CacheKey::new("cohort-1".into(), "sex"), 0, Histogram::default());
        cache.insert(CacheKey::new("cohort-1".into(), "age"), 0, Histogram::default());
        cache.insert(CacheKey::new("cohort-2".into(), "sex"), 0, Histogram::default());
        cache.evict_cohort(&ElementId::from("cohort-1"));
        assert_eq!(cache.len(), 1);
    }
}
