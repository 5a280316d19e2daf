//! In-memory [`SalesApi`] for unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use shared::{
    error::RequestError,
    protocol::{Metadata, ResultPage, SalesRecord},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{FetchError, SalesApi, WireRequest};

/// Serves a synthetic dataset of `total` rows. Responses can be held back
/// behind a gate to keep fetches in flight.
pub(crate) struct ScriptedApi {
    total: u64,
    gate: watch::Sender<bool>,
    results_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
    cancellations: AtomicUsize,
    requests: Mutex<Vec<WireRequest>>,
    results_failure: Mutex<Option<RequestError>>,
    metadata_failure: Mutex<Option<RequestError>>,
}

impl ScriptedApi {
    pub(crate) fn new(total: u64) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            total,
            gate,
            results_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            cancellations: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            results_failure: Mutex::new(None),
            metadata_failure: Mutex::new(None),
        }
    }

    pub(crate) fn gated(total: u64) -> Self {
        let api = Self::new(total);
        api.close_gate();
        api
    }

    pub(crate) fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub(crate) fn fail_results_with(&self, err: Option<RequestError>) {
        *self.results_failure.lock().expect("lock") = err;
    }

    pub(crate) fn fail_metadata_with(&self, err: Option<RequestError>) {
        *self.metadata_failure.lock().expect("lock") = err;
    }

    pub(crate) fn results_calls(&self) -> usize {
        self.results_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().expect("lock").clone()
    }

    async fn pass_gate(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        let mut gate = self.gate.subscribe();
        let opened = async { gate.wait_for(|open| *open).await.is_ok() };
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancellations.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Cancelled)
            }
            _ = opened => Ok(()),
        }
    }

    fn page_for(&self, request: &WireRequest) -> ResultPage {
        let number = |name: &str, default: u32| {
            request
                .get_all(name)
                .first()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(default)
        };
        let page = number("page", 1);
        let page_size = number("page_size", 10);
        let start = u64::from(page - 1) * u64::from(page_size);
        let end = (start + u64::from(page_size)).min(self.total);
        let items = (start..end)
            .map(|n| SalesRecord {
                customer_id: format!("CUST-{n}"),
                customer_name: format!("Customer {n}"),
                quantity: (n % 7) as u32 + 1,
                ..SalesRecord::default()
            })
            .collect();

        ResultPage {
            items,
            total: self.total,
            page,
            page_size,
            total_pages: ResultPage::total_pages_for(self.total, page_size),
        }
    }
}

#[async_trait]
impl SalesApi for ScriptedApi {
    async fn fetch_results(
        &self,
        request: &WireRequest,
        cancel: CancellationToken,
    ) -> Result<ResultPage, FetchError> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock").push(request.clone());
        self.pass_gate(&cancel).await?;

        if let Some(err) = self.results_failure.lock().expect("lock").clone() {
            return Err(err.into());
        }
        Ok(self.page_for(request))
    }

    async fn fetch_metadata(&self, cancel: CancellationToken) -> Result<Metadata, FetchError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate(&cancel).await?;

        if let Some(err) = self.metadata_failure.lock().expect("lock").clone() {
            return Err(err.into());
        }
        Ok(Metadata {
            regions: vec!["East".into(), "North".into(), "South".into(), "West".into()],
            genders: vec!["Female".into(), "Male".into()],
            product_categories: vec!["Beauty".into(), "Clothing".into(), "Electronics".into()],
            tags: vec!["fashion".into(), "organic".into()],
            payment_methods: vec!["Cash".into(), "Credit Card".into(), "UPI".into()],
        })
    }
}
