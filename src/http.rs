//! Thin HTTP layer over `reqwest`.
//!
//! Task code never touches `reqwest` directly; it goes through the
//! [`RestClient`] trait so the request/response shaping stays testable with
//! hand-written fakes. Transport failures (connection refused, timeout, DNS)
//! surface as [`HttpError::Transport`] and are therefore distinguishable from
//! a completed exchange with a non-success status.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::auth::AuthHeader;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Request/response contract consumed by probes and tasks.
pub trait RestClient: Send + Sync + 'static {
    fn get(
        &self,
        url: &str,
        auth: Option<&AuthHeader>,
    ) -> impl Future<Output = Result<ApiResponse, HttpError>> + Send;

    fn post_json(
        &self,
        url: &str,
        auth: Option<&AuthHeader>,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<ApiResponse, HttpError>> + Send;
}

/// Join a base URL and an endpoint path, tolerating a trailing slash on the
/// base.
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Production [`RestClient`] backed by a pooled `reqwest::Client`.
pub struct HttpClient {
    client: Client,
    user_agent: String,
    session_id: String,
}

impl HttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            user_agent: format!("demo-bootstrap/{}", DEFAULT_VERSION),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse, HttpError> {
        let response = request
            .header("User-Agent", &self.user_agent)
            .header("x-request-id", Uuid::new_v4().to_string())
            .header("x-request-session-id", &self.session_id)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Response status: {}", status);

        Ok(ApiResponse { status, body })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RestClient for HttpClient {
    async fn get(&self, url: &str, auth: Option<&AuthHeader>) -> Result<ApiResponse, HttpError> {
        let url = Url::parse(url)?;
        debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(auth) = auth {
            request = request.header("Authorization", auth.header_value());
        }

        self.execute(request).await
    }

    async fn post_json(
        &self,
        url: &str,
        auth: Option<&AuthHeader>,
        body: &serde_json::Value,
    ) -> Result<ApiResponse, HttpError> {
        let url = Url::parse(url)?;
        debug!("POST {}", url);

        let mut request = self.client.post(url).json(body);
        if let Some(auth) = auth {
            request = request.header("Authorization", auth.header_value());
        }

        self.execute(request).await
    }
}
