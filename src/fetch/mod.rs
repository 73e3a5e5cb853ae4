//! Memoized size, row and histogram reads

mod cache;
mod fetcher;

pub use cache::{AttributeCache, CacheKey, Histogram};
pub use fetcher::{CohortFetcher, FetchError, FetchResult};
