use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{
    domain::{FilterField, QueryModel, QueryUpdate},
    protocol::{Metadata, ResultPage},
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    cache::{EntryStatus, QuerySnapshot, Subscription},
    config::Settings,
    controller::QueryController,
    error::FetchError,
    normalize::normalize,
    orchestrator::FetchOrchestrator,
    transport::SalesApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Loading,
    Success,
    Error,
}

#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<FetchError>,
    pub is_revalidating: bool,
    /// `data` is from the previous query.
    pub is_placeholder: bool,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_revalidating: self.is_revalidating,
            is_placeholder: self.is_placeholder,
        }
    }
}

impl<T> QueryState<T> {
    fn loading() -> Self {
        Self {
            status: QueryStatus::Loading,
            data: None,
            error: None,
            is_revalidating: false,
            is_placeholder: false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }
}

impl<T> From<QuerySnapshot<T>> for QueryState<T> {
    fn from(snapshot: QuerySnapshot<T>) -> Self {
        let status = match snapshot.status {
            EntryStatus::Pending => QueryStatus::Loading,
            EntryStatus::Success => QueryStatus::Success,
            EntryStatus::Error => QueryStatus::Error,
        };
        Self {
            status,
            data: snapshot.data,
            error: snapshot.error,
            is_revalidating: snapshot.is_revalidating,
            is_placeholder: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    QueryChanged(QueryModel),
}

struct SessionState {
    controller: QueryController,
    results: Subscription<ResultPage>,
    placeholder: Option<Arc<ResultPage>>,
    metadata: Subscription<Metadata>,
}

impl SessionState {
    fn latest_page(&self) -> Option<Arc<ResultPage>> {
        self.results.current().data.or_else(|| self.placeholder.clone())
    }

    fn results_state(&self) -> QueryState<ResultPage> {
        let snapshot = self.results.current();
        if snapshot.status == EntryStatus::Pending && snapshot.data.is_none() {
            if let Some(previous) = &self.placeholder {
                return QueryState {
                    status: QueryStatus::Success,
                    data: Some(Arc::clone(previous)),
                    error: None,
                    is_revalidating: true,
                    is_placeholder: true,
                };
            }
        }
        snapshot.into()
    }
}

/// Must be created and used inside a Tokio runtime.
pub struct SalesBrowser {
    orchestrator: FetchOrchestrator,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SalesBrowser {
    pub fn new(api: Arc<dyn SalesApi>, settings: &Settings) -> Self {
        let model = QueryModel {
            page_size: settings.page_size,
            ..QueryModel::default()
        };
        Self::with_model(api, settings, model)
    }

    pub fn with_model(api: Arc<dyn SalesApi>, settings: &Settings, model: QueryModel) -> Self {
        let orchestrator = FetchOrchestrator::new(
            api,
            settings.results_policy(),
            settings.metadata_policy(),
        );
        let controller = QueryController::with_model(model);
        let normalized = normalize(controller.model());
        let results = orchestrator.results(normalized.request, normalized.cache_key);
        let metadata = orchestrator.metadata();
        let (events, _) = broadcast::channel(64);

        Self {
            orchestrator,
            state: Mutex::new(SessionState {
                controller,
                results,
                placeholder: None,
                metadata,
            }),
            events,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    pub fn query(&self) -> QueryModel {
        self.lock_state().controller.model().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn apply_partial(&self, update: QueryUpdate) -> QueryModel {
        self.update(|controller, _| {
            controller.apply_partial(update);
        })
    }

    pub fn apply_filter_change(&self, update: QueryUpdate) -> QueryModel {
        self.update(|controller, _| {
            controller.apply_filter_change(update);
        })
    }

    pub fn apply_page_change(&self, page: u32) -> QueryModel {
        self.update(|controller, total_pages| {
            controller.apply_page_change(page, total_pages);
        })
    }

    pub fn toggle(&self, field: FilterField, option: &str) -> QueryModel {
        self.update(|controller, _| {
            controller.toggle(field, option);
        })
    }

    pub fn clear(&self, field: FilterField) -> QueryModel {
        self.update(|controller, _| {
            controller.clear(field);
        })
    }

    fn update<F>(&self, mutate: F) -> QueryModel
    where
        F: FnOnce(&mut QueryController, Option<u32>),
    {
        let model = {
            let mut state = self.lock_state();
            let total_pages = state.latest_page().map(|page| page.total_pages);
            mutate(&mut state.controller, total_pages);
            self.refresh_locked(&mut state);
            state.controller.model().clone()
        };
        let _ = self.events.send(SessionEvent::QueryChanged(model.clone()));
        model
    }

    fn refresh_locked(&self, state: &mut SessionState) {
        let normalized = normalize(state.controller.model());
        if state.results.key() == &normalized.cache_key {
            return;
        }
        debug!("session: query changed key={}", normalized.cache_key);

        if let Some(data) = state.results.current().data {
            state.placeholder = Some(data);
        }
        state.results = self
            .orchestrator
            .results(normalized.request, normalized.cache_key);
    }

    pub fn results(&self) -> QueryState<ResultPage> {
        self.lock_state().results_state()
    }

    pub fn metadata(&self) -> QueryState<Metadata> {
        self.lock_state().metadata.current().into()
    }

    /// Follows the latest query if it changes while waiting.
    pub async fn wait_for_results(&self) -> QueryState<ResultPage> {
        let mut events = self.events.subscribe();
        loop {
            let (key, mut receiver) = {
                let state = self.lock_state();
                (state.results.key().clone(), state.results.watch())
            };
            tokio::select! {
                _ = receiver.wait_for(QuerySnapshot::is_settled) => {}
                _ = events.recv() => continue,
            }

            let state = self.lock_state();
            if state.results.key() == &key {
                return state.results_state();
            }
        }
    }

    pub async fn wait_for_metadata(&self) -> QueryState<Metadata> {
        let mut receiver = self.lock_state().metadata.watch();
        let _ = receiver.wait_for(QuerySnapshot::is_settled).await;
        self.metadata()
    }

    pub fn retry_results(&self) {
        let mut state = self.lock_state();
        let normalized = normalize(state.controller.model());
        state.results = self
            .orchestrator
            .retry_results(normalized.request, normalized.cache_key);
    }

    pub fn retry_metadata(&self) {
        let mut state = self.lock_state();
        state.metadata = self.orchestrator.retry_metadata();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
