//! `reqwest`-backed page source for REST collections.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{FetchError, PageSource};
use crate::error::PipelineError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches `GET <base_url>/<endpoint>?<page_param>=<page>` and expects a
/// JSON array of records in return.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPageSource {
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("loadbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(
        &self,
        endpoint: &str,
        page_param: &str,
        page: u32,
    ) -> Result<Vec<Value>, FetchError> {
        let url = self.endpoint_url(endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[(page_param, page)])
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("GET {url}: {e}")))?
            .error_for_status()
            .map_err(|e| FetchError::Transport(format!("GET {url}: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("GET {url}: {e}")))?;
        match body {
            Value::Array(records) => Ok(records),
            other => Err(FetchError::Decode(format!(
                "GET {url}: expected a JSON array, got {}",
                json_kind(&other)
            ))),
        }
    }
}
