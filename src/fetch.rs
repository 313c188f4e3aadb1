//! Read-through helpers
//!
//! Combine a cache lookup with a caller-supplied fetcher. Fetch failures are
//! logged and degrade to "no data"; they never reach the caller as errors.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache_manager::CacheManager;
use crate::entry::SetOptions;
use crate::error::CacheError;

/// Value returned by [`CacheManager::get_cache_with_fallback`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult<T> {
    /// `None` only when the cache missed and the fetcher failed
    pub data: Option<T>,
    pub from_cache: bool,
}

impl<T> FetchResult<T> {
    fn cached(data: T) -> Self {
        Self {
            data: Some(data),
            from_cache: true,
        }
    }

    fn fetched(data: Option<T>) -> Self {
        Self {
            data,
            from_cache: false,
        }
    }
}

impl CacheManager {
    /// Read `key`, calling `fetcher` once on a miss and caching its result
    ///
    /// A failed fetch yields `FetchResult { data: None, from_cache: false }`.
    pub async fn get_cache_with_fallback<T, F, Fut>(&self, key: &str, fetcher: F) -> FetchResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.get_cache_with_fallback_and_options(key, SetOptions::default(), fetcher)
            .await
    }

    /// Like [`get_cache_with_fallback`](Self::get_cache_with_fallback), storing
    /// fetched data with `options`
    pub async fn get_cache_with_fallback_and_options<T, F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        fetcher: F,
    ) -> FetchResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(cached) = self.get_cache::<T>(key).await {
            return FetchResult::cached(cached);
        }

        debug!(key = %key, "Cache miss, calling fetcher");
        FetchResult::fetched(self.fetch_and_store(key, options, fetcher).await)
    }

    /// Populate `key` in the background unless it is already cached
    ///
    /// The returned handle may be dropped; the task runs to completion either
    /// way and only logs failures.
    pub fn prefetch_cache<T, F, Fut>(self: &Arc<Self>, key: impl Into<String>, fetcher: F) -> JoinHandle<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.prefetch_cache_with_options(key, SetOptions::default(), fetcher)
    }

    pub fn prefetch_cache_with_options<T, F, Fut>(
        self: &Arc<Self>,
        key: impl Into<String>,
        options: SetOptions,
        fetcher: F,
    ) -> JoinHandle<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let key = key.into();

        tokio::spawn(async move {
            if manager.get_cache::<T>(&key).await.is_some() {
                debug!(key = %key, "Prefetch skipped, already cached");
                return;
            }
            if manager.fetch_and_store(&key, options, fetcher).await.is_some() {
                debug!(key = %key, "Prefetched entry");
            }
        })
    }

    /// Run several loaders concurrently and cache what they return
    ///
    /// Every loader runs, so keys that are already cached are refreshed with
    /// the loaded value. Returns the number of entries written.
    pub async fn warm_up<T, K, Fut, I>(&self, loaders: I, options: SetOptions) -> usize
    where
        T: Serialize,
        K: Into<String>,
        Fut: Future<Output = anyhow::Result<T>>,
        I: IntoIterator<Item = (K, Fut)>,
    {
        let results = join_all(loaders.into_iter().map(|(key, loader)| {
            let key: String = key.into();
            let options = options.clone();
            async move {
                self.fetch_and_store(&key, options, || loader)
                    .await
                    .is_some()
            }
        }))
        .await;

        let warmed = results.into_iter().filter(|stored| *stored).count();
        debug!(warmed, "Cache warm-up finished");
        warmed
    }

    async fn fetch_and_store<T, F, Fut>(&self, key: &str, options: SetOptions, fetcher: F) -> Option<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let data = match fetcher().await {
            Ok(data) => data,
            Err(e) => {
                let error = CacheError::Fetch(e);
                warn!(key = %key, error = %error, "Fetch failed, no data available");
                return None;
            }
        };

        if let Err(e) = self.set_cache(key, &data, options).await {
            warn!(key = %key, error = %e, "Fetched data could not be cached");
        }
        Some(data)
    }
}
