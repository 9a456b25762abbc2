//! The single network seam of the engine.

use crate::portal::errors::PortalError;
use crate::portal::models::FormPayload;
use crate::portal::session::PortalSession;
use crate::utils::log_if_slow;
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::{Duration, Instant};
use tracing::trace;

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(5);

/// Status and body of a portal response, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs HTTP calls on behalf of a session.
///
/// Implementations must enforce their own timeout; an elapsed timeout is a
/// [`PortalError::RequestFailed`], never a panic.
#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn get(&self, session: &PortalSession, url: &str) -> Result<RawResponse, PortalError>;

    async fn post_form(
        &self,
        session: &PortalSession,
        url: &str,
        payload: &FormPayload,
    ) -> Result<RawResponse, PortalError>;
}

/// `reqwest`-backed transport used in production.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );

        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            // A redirect is the portal bouncing to its login page; report the 302 as-is.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http })
    }

    fn cookie_header(session: &PortalSession) -> Result<HeaderValue, PortalError> {
        HeaderValue::from_str(session.credential().trim()).map_err(|_| {
            PortalError::RequestFailed("credential is not a valid header value".into())
        })
    }

    async fn finish(
        response: reqwest::Response,
        started: Instant,
        label: &str,
    ) -> Result<RawResponse, PortalError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        log_if_slow(started, SLOW_REQUEST_THRESHOLD, label);
        trace!(status, bytes = body.len(), "{label} finished");
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl PortalTransport for HttpTransport {
    async fn get(&self, session: &PortalSession, url: &str) -> Result<RawResponse, PortalError> {
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .header(header::COOKIE, Self::cookie_header(session)?)
            .send()
            .await?;
        Self::finish(response, started, "portal GET").await
    }

    async fn post_form(
        &self,
        session: &PortalSession,
        url: &str,
        payload: &FormPayload,
    ) -> Result<RawResponse, PortalError> {
        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .header(header::COOKIE, Self::cookie_header(session)?)
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded;charset=UTF-8",
            )
            .body(payload.to_urlencoded())
            .send()
            .await?;
        Self::finish(response, started, "portal POST").await
    }
}
