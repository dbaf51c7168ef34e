use crate::core::parsing::fetchers::{StoredData, StoredRequestFetcher};
use anyhow::{Error, bail};
use async_trait::async_trait;
use moka::sync::Cache;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// Wraps a stored request fetcher with in process caches so
/// that hot stored requests skip the backend entirely
pub struct CachingFetcher<F> {
    inner: F,
    requests: Cache<String, Value>,
    imps: Cache<String, Value>,
}

fn build_cache(max_size: u64, ttl: Duration) -> Cache<String, Value> {
    let mut cache_builder = Cache::<String, Value>::builder();
    if max_size > 0 {
        cache_builder = cache_builder.max_capacity(max_size);
    }

    if !ttl.is_zero() {
        cache_builder = cache_builder.time_to_live(ttl);
    }

    cache_builder.build()
}

impl<F: StoredRequestFetcher> CachingFetcher<F> {
    pub fn try_new(inner: F, max_size: u64, ttl: Duration) -> Result<Self, Error> {
        if max_size == 0 && ttl.is_zero() {
            bail!("Cache max size and ttl cannot both be zero");
        }

        Ok(CachingFetcher {
            inner,
            requests: build_cache(max_size, ttl),
            imps: build_cache(max_size, ttl),
        })
    }

    fn split_cached(
        cache: &Cache<String, Value>,
        ids: &[String],
    ) -> (Vec<(String, Value)>, Vec<String>) {
        let mut hits = Vec::new();
        let mut misses = Vec::new();

        for id in ids {
            match cache.get(id) {
                Some(value) => hits.push((id.clone(), value)),
                None => misses.push(id.clone()),
            }
        }

        (hits, misses)
    }
}

#[async_trait]
impl<F: StoredRequestFetcher> StoredRequestFetcher for CachingFetcher<F> {
    async fn fetch_requests(
        &self,
        request_ids: &[String],
        imp_ids: &[String],
    ) -> Result<StoredData, Error> {
        let (req_hits, req_misses) = Self::split_cached(&self.requests, request_ids);
        let (imp_hits, imp_misses) = Self::split_cached(&self.imps, imp_ids);

        trace!(
            "Stored cache hits req {} imp {}, misses req {} imp {}",
            req_hits.len(),
            imp_hits.len(),
            req_misses.len(),
            imp_misses.len()
        );

        let mut data = if req_misses.is_empty() && imp_misses.is_empty() {
            StoredData::default()
        } else {
            self.inner.fetch_requests(&req_misses, &imp_misses).await?
        };

        for (id, value) in &data.requests {
            self.requests.insert(id.clone(), value.clone());
        }

        for (id, value) in &data.imps {
            self.imps.insert(id.clone(), value.clone());
        }

        data.requests.extend(req_hits);
        data.imps.extend(imp_hits);

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StoredRequestFetcher for CountingFetcher {
        async fn fetch_requests(
            &self,
            request_ids: &[String],
            imp_ids: &[String],
        ) -> Result<StoredData, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            Ok(StoredData {
                requests: request_ids
                    .iter()
                    .map(|id| (id.clone(), json!({"id": id})))
                    .collect(),
                imps: imp_ids
                    .iter()
                    .map(|id| (id.clone(), json!({"id": id})))
                    .collect(),
            })
        }
    }

    #[test]
    fn test_rejects_unbounded_cache() {
        let inner = CountingFetcher {
            calls: Arc::new(AtomicUsize::new(0)),
        };

        assert!(CachingFetcher::try_new(inner, 0, Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_repeated_ids_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = CachingFetcher::try_new(
            CountingFetcher {
                calls: calls.clone(),
            },
            100,
            Duration::from_secs(60),
        )
        .unwrap();

        let ids = vec!["r1".to_string()];
        let imp_ids = vec!["i1".to_string()];

        let first = fetcher.fetch_requests(&ids, &imp_ids).await.unwrap();
        let second = fetcher.fetch_requests(&ids, &imp_ids).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.requests["r1"], second.requests["r1"]);
        assert_eq!(second.imps["i1"], json!({"id": "i1"}));
    }

    #[tokio::test]
    async fn test_only_misses_hit_backend() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = CachingFetcher::try_new(
            CountingFetcher {
                calls: calls.clone(),
            },
            100,
            Duration::ZERO,
        )
        .unwrap();

        fetcher
            .fetch_requests(&["r1".to_string()], &[])
            .await
            .unwrap();
        let data = fetcher
            .fetch_requests(&["r1".to_string(), "r2".to_string()], &[])
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(data.requests.len(), 2);
    }
}
