use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use shared::protocol::{Metadata, ResultPage};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cache::{CachePolicy, ResultCache, Subscription},
    error::FetchError,
    normalize::{CacheKey, WireRequest},
    transport::SalesApi,
};

pub struct FetchOrchestrator {
    api: Arc<dyn SalesApi>,
    results: ResultCache<ResultPage>,
    metadata: ResultCache<Metadata>,
    latest_results: Mutex<Option<CacheKey>>,
}

impl FetchOrchestrator {
    pub fn new(
        api: Arc<dyn SalesApi>,
        results_policy: CachePolicy,
        metadata_policy: CachePolicy,
    ) -> Self {
        Self {
            api,
            results: ResultCache::new("results", results_policy),
            metadata: ResultCache::new("metadata", metadata_policy),
            latest_results: Mutex::new(None),
        }
    }

    pub fn results_cache(&self) -> &ResultCache<ResultPage> {
        &self.results
    }

    pub fn metadata_cache(&self) -> &ResultCache<Metadata> {
        &self.metadata
    }

    pub async fn execute<T, Fut>(call: Fut, cancel: CancellationToken) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            outcome = call => outcome,
        }
    }

    pub fn results(&self, request: WireRequest, key: CacheKey) -> Subscription<ResultPage> {
        self.supersede(&key);
        let api = Arc::clone(&self.api);
        self.results.get(&key, move |cancel| async move {
            Self::execute(api.fetch_results(&request, cancel.clone()), cancel).await
        })
    }

    pub fn retry_results(&self, request: WireRequest, key: CacheKey) -> Subscription<ResultPage> {
        self.supersede(&key);
        let api = Arc::clone(&self.api);
        self.results.refetch(&key, move |cancel| async move {
            Self::execute(api.fetch_results(&request, cancel.clone()), cancel).await
        })
    }

    pub fn metadata(&self) -> Subscription<Metadata> {
        let api = Arc::clone(&self.api);
        self.metadata.get(&CacheKey::metadata(), move |cancel| async move {
            Self::execute(api.fetch_metadata(cancel.clone()), cancel).await
        })
    }

    pub fn retry_metadata(&self) -> Subscription<Metadata> {
        let api = Arc::clone(&self.api);
        self.metadata.refetch(&CacheKey::metadata(), move |cancel| async move {
            Self::execute(api.fetch_metadata(cancel.clone()), cancel).await
        })
    }

    fn supersede(&self, key: &CacheKey) {
        let mut latest = self
            .latest_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = latest.as_ref().filter(|previous| *previous != key) {
            if self.results.cancel(previous) {
                info!("orchestrator: superseded results fetch previous={previous} next={key}");
            }
        }
        *latest = Some(key.clone());
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
