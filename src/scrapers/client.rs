use crate::config::ProviderConfig;
use crate::error::ProviderError;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Thin wrapper over the upstream v3 JSON API shared by the search and
/// detail providers
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    currency: String,
}

impl ApiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            currency: config.currency.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `/api/v3/<operation>` with the request variables as JSON
    pub async fn get_operation(
        &self,
        operation: &str,
        variables: Value,
    ) -> std::result::Result<Value, ProviderError> {
        let url = format!("{}/api/v3/{}", self.base_url, operation);
        let extensions = json!({"persistedQuery": {"version": 1}}).to_string();
        let variables = variables.to_string();

        debug!("Fetching {} {}", operation, variables);

        let mut request = self.client.get(&url).query(&[
            ("operationName", operation),
            ("locale", "en"),
            ("currency", self.currency.as_str()),
            ("variables", variables.as_str()),
            ("extensions", extensions.as_str()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("X-Airbnb-API-Key", key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!("{} returned status: {}", operation, status);
            return Err(classify_status(status));
        }

        let body = response.text().await.map_err(classify_transport_error)?;
        debug!("Downloaded {} bytes from {}", body.len(), operation);

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Schema(format!("{} returned invalid JSON: {}", operation, e)))
    }
}

fn classify_status(status: StatusCode) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(format!("status {}", status))
    } else {
        ProviderError::Schema(format!("status {}", status))
    }
}

fn classify_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_decode() || error.is_builder() {
        ProviderError::Schema(error.to_string())
    } else {
        ProviderError::Transient(error.to_string())
    }
}

/// Parse a display price such as "$1,234" or "$2,310 total"
pub fn parse_money(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
