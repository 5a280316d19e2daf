pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod session;
pub mod transport;

pub use cache::{CacheLookup, CachePolicy, EntryStatus, QuerySnapshot, ResultCache, Subscription};
pub use config::{load_settings, Settings};
pub use controller::{coerce_age, coerce_date, coerce_text, QueryController};
pub use error::FetchError;
pub use normalize::{normalize, CacheKey, NormalizedRequest, WireRequest};
pub use orchestrator::FetchOrchestrator;
pub use session::{QueryState, QueryStatus, SalesBrowser, SessionEvent};
pub use transport::{HttpSalesApi, SalesApi};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
