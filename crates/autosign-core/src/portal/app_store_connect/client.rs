//! HTTP plumbing for the App Store Connect API: authentication, transport
//! retries, error decoding and cursor pagination.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{AutosignError, Result};

use super::models::{ErrorResponse, PagedDocument};
use super::token::TokenEncoder;

pub const DEFAULT_BASE_URL: &str = "https://api.appstoreconnect.apple.com/v1/";

/// Maximum number of attempts for one request.
const MAX_ATTEMPTS: u32 = 3;
/// Base delay between attempts, doubled after each failure.
const RETRY_BASE_DELAY_MS: u64 = 1000;

pub(crate) const PAGE_LIMIT: &str = "200";

/// Client for the App Store Connect API.
pub struct AppStoreConnectClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenEncoder,
}

impl AppStoreConnectClient {
    pub fn new(tokens: TokenEncoder) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("autosign/{}", crate::VERSION))
            .build()?;

        Ok(Self {
            http,
            base_url: Url::parse(DEFAULT_BASE_URL)?,
            tokens,
        })
    }

    /// Points the client at another API root.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let mut url = Url::parse(base_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.base_url = url;
        Ok(self)
    }

    pub(crate) fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Sends one request, retrying throttled requests, server errors and
    /// connection failures with exponential backoff.
    async fn send(&self, method: Method, url: Url, body: Option<&serde_json::Value>) -> Result<String> {
        let mut attempt = 1;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(self.tokens.token()?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let outcome = request.send().await;
            let retryable = match &outcome {
                Ok(response) => is_retryable(response.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if retryable && attempt < MAX_ATTEMPTS {
                let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                tracing::debug!(
                    "{} {} failed (attempt {}/{}), retrying in {}ms",
                    method,
                    url.path(),
                    attempt,
                    MAX_ATTEMPTS,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            let response = outcome?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(decode_error(status, &text));
            }
            return Ok(text);
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let body = self.send(Method::GET, url, None).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetches every page of a collection by following `links.next`.
    pub(crate) async fn get_all<T: DeserializeOwned + Send>(&self, url: Url) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let page: PagedDocument<T> = self.get(url).await?;
            items.extend(page.data);
            next = page.links.next.as_deref().map(Url::parse).transpose()?;
        }
        Ok(items)
    }

    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<T> {
        let text = self.send(Method::POST, url, Some(body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub(crate) async fn post_no_content(&self, url: Url, body: &serde_json::Value) -> Result<()> {
        self.send(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, url: Url) -> Result<()> {
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Turns an error response into a typed error.
pub(crate) fn decode_error(status: StatusCode, body: &str) -> AutosignError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|response| response.message())
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AutosignError::Unauthorized(message),
        _ => AutosignError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
