use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{
    error::RequestError,
    protocol::{Metadata, ResultPage},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{error::FetchError, normalize::WireRequest};

#[async_trait]
pub trait SalesApi: Send + Sync {
    async fn fetch_results(
        &self,
        request: &WireRequest,
        cancel: CancellationToken,
    ) -> Result<ResultPage, FetchError>;

    async fn fetch_metadata(&self, cancel: CancellationToken) -> Result<Metadata, FetchError>;
}

pub struct HttpSalesApi {
    http: Client,
    api_base: String,
}

impl HttpSalesApi {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_base)
    }

    pub fn with_client(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str, request: Option<&WireRequest>) -> Result<Url, FetchError> {
        let raw = format!("{}/{path}", self.api_base.trim_end_matches('/'));
        let mut url = Url::parse(&raw)
            .map_err(|err| FetchError::Transport(format!("invalid api url '{raw}': {err}")))?;
        if let Some(request) = request.filter(|r| !r.is_empty()) {
            url.set_query(Some(&request.to_query_string()));
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: CancellationToken,
    ) -> Result<T, FetchError> {
        let call = async {
            debug!("transport: GET {url}");
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|err| FetchError::Transport(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = RequestError::from_response_body(status.as_u16(), &body);
                warn!("transport: request failed url={url} status={}", err.status);
                return Err(err.into());
            }

            response
                .json::<T>()
                .await
                .map_err(|err| FetchError::Decode(err.to_string()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            outcome = call => outcome,
        }
    }
}

#[async_trait]
impl SalesApi for HttpSalesApi {
    async fn fetch_results(
        &self,
        request: &WireRequest,
        cancel: CancellationToken,
    ) -> Result<ResultPage, FetchError> {
        let url = self.endpoint("sales", Some(request))?;
        self.get_json(url, cancel).await
    }

    async fn fetch_metadata(&self, cancel: CancellationToken) -> Result<Metadata, FetchError> {
        let url = self.endpoint("meta", None)?;
        self.get_json(url, cancel).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
