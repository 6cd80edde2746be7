//! Detection service client.
//!
//! [`DetectionService`] is the seam the overlay talks through; [`ShieldApiClient`]
//! implements it over HTTP with per-attempt timeouts and exponential backoff.

use std::future::Future;
use std::time::Duration;

use n0_future::time::{sleep, timeout};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use web_time::Instant;

use crate::config::ShieldConfig;
use crate::error::ApiError;
use crate::wire::{
    CreateSessionRequest, DetectionRequest, MaskRequest, MaskResponse, PiiSession, UnmaskRequest,
    UnmaskResponse,
};

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const SESSION_TTL: &str = "24h";

const REQUESTS_TOTAL: &str = "shield_api_requests_total";
const FAILURES_TOTAL: &str = "shield_api_failures_total";
const RETRIES_TOTAL: &str = "shield_api_retries_total";
const REQUEST_SECONDS: &str = "shield_api_request_duration_seconds";

/// Anything that can turn text into detected entities.
pub trait DetectionService: Send + Sync + 'static {
    fn detect(
        &self,
        request: DetectionRequest,
    ) -> impl Future<Output = Result<MaskResponse, ApiError>> + Send;
}

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ShieldConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            base_delay: config.retry_delay(),
        }
    }

    /// Wait after the `attempt`-th failure (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op_name: &'static str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        ?delay,
                        error = %err,
                        "detection request failed, retrying"
                    );
                    metrics::counter!(RETRIES_TOTAL, "op" => op_name).increment(1);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    metrics::counter!(FAILURES_TOTAL, "op" => op_name).increment(1);
                    return Err(err);
                }
            }
        }
    }
}

/// HTTP client for the detection service.
#[derive(Debug, Clone)]
pub struct ShieldApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
    quiet: bool,
    retry: RetryPolicy,
}

impl ShieldApiClient {
    pub fn new(config: &ShieldConfig) -> Result<Self, ApiError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ApiError::MissingApiKey)?
            .to_owned();
        // Trailing slash so joins append rather than replace the last segment.
        let normalized = format!("{}/", config.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|_| ApiError::InvalidUrl {
            url: config.base_url.clone(),
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            timeout: config.timeout(),
            quiet: config.quiet,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Use a preconfigured reqwest client, e.g. one with proxies set.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|_| ApiError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
            })
    }

    pub(crate) fn mask_url(
        &self,
        session_id: Option<&str>,
        create_session: bool,
    ) -> Result<Url, ApiError> {
        let mut url = match session_id {
            Some(id) => self.endpoint(&format!("sessions/{id}/text/mask"))?,
            None => self.endpoint("text/mask")?,
        };
        {
            let mut query = url.query_pairs_mut();
            if create_session && session_id.is_none() {
                query.append_pair("create_session", "true");
            }
            if self.quiet {
                query.append_pair("quiet", "true");
            }
        }
        // query_pairs_mut leaves a bare `?` behind when nothing was appended
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// Send one request per attempt; non-2xx statuses become [`ApiError::Status`].
    async fn execute(
        &self,
        op: &'static str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, ApiError> {
        metrics::counter!(REQUESTS_TOTAL, "op" => op).increment(1);
        let started = Instant::now();
        let result = self
            .retry
            .run(op, |attempt| {
                let request = build().header(API_KEY_HEADER, &self.api_key);
                async move {
                    tracing::trace!(op, attempt, "sending detection service request");
                    let response = timeout(self.timeout, request.send())
                        .await
                        .map_err(|_| ApiError::Timeout {
                            timeout: self.timeout,
                        })?
                        .map_err(|e| ApiError::from_reqwest(e, self.timeout))?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ApiError::Status {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    Ok(response)
                }
            })
            .await;
        metrics::histogram!(REQUEST_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
        result
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response.json::<T>().await.map_err(ApiError::Decode)
    }

    /// Detect and mask PII without a session, optionally asking the service
    /// to create one.
    pub async fn mask_text(
        &self,
        request: &MaskRequest,
        create_session: bool,
    ) -> Result<MaskResponse, ApiError> {
        let url = self.mask_url(None, create_session)?;
        let response = self
            .execute("mask", || {
                self.http.request(Method::POST, url.clone()).json(request)
            })
            .await?;
        let masked: MaskResponse = Self::decode(response).await?;
        tracing::debug!(
            texts = masked.text.len(),
            entities = masked.first_entities().len(),
            "mask response"
        );
        Ok(masked)
    }

    pub async fn mask_text_with_session(
        &self,
        session_id: &str,
        request: &MaskRequest,
    ) -> Result<MaskResponse, ApiError> {
        let url = self.mask_url(Some(session_id), false)?;
        let response = self
            .execute("mask_session", || {
                self.http.request(Method::POST, url.clone()).json(request)
            })
            .await?;
        Self::decode(response).await
    }

    /// Restore original text using entities from an earlier mask call.
    pub async fn unmask_text(&self, request: &UnmaskRequest) -> Result<UnmaskResponse, ApiError> {
        let url = self.endpoint("text/unmask")?;
        let response = self
            .execute("unmask", || {
                self.http.request(Method::POST, url.clone()).json(request)
            })
            .await?;
        Self::decode(response).await
    }

    /// Restore original text using the mapping the service keeps for a session.
    pub async fn unmask_text_with_session(
        &self,
        session_id: &str,
        text: Vec<String>,
    ) -> Result<UnmaskResponse, ApiError> {
        let url = self.endpoint(&format!("sessions/{session_id}/text/unmask"))?;
        let body = serde_json::json!({ "text": text });
        let response = self
            .execute("unmask_session", || {
                self.http.request(Method::POST, url.clone()).json(&body)
            })
            .await?;
        Self::decode(response).await
    }

    pub async fn create_session(&self, description: &str) -> Result<PiiSession, ApiError> {
        let url = self.endpoint("sessions")?;
        let body = CreateSessionRequest {
            ttl: SESSION_TTL.to_owned(),
            description: description.to_owned(),
        };
        let response = self
            .execute("create_session", || {
                self.http.request(Method::POST, url.clone()).json(&body)
            })
            .await?;
        let session: PiiSession = Self::decode(response).await?;
        tracing::debug!(session_id = %session.session_id, "created pii session");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<PiiSession, ApiError> {
        let url = self.endpoint(&format!("sessions/{session_id}"))?;
        let response = self
            .execute("get_session", || self.http.request(Method::GET, url.clone()))
            .await?;
        Self::decode(response).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("sessions/{session_id}"))?;
        self.execute("delete_session", || {
            self.http.request(Method::DELETE, url.clone())
        })
        .await?;
        tracing::debug!(session_id, "deleted pii session");
        Ok(())
    }
}

impl DetectionService for ShieldApiClient {
    async fn detect(&self, request: DetectionRequest) -> Result<MaskResponse, ApiError> {
        let body = request.to_mask_request();
        match request.session_id.as_deref() {
            Some(id) => self.mask_text_with_session(id, &body).await,
            None => self.mask_text(&body, false).await,
        }
    }
}
