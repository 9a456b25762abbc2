//! Client for the legacy course-selection portal.
//!
//! The portal has no API: state lives in hidden form fields, category tabs are
//! inline click handlers, and listings and selections are form POSTs against
//! session-bound endpoints. [`PortalApi`] is the entry point; the submodules
//! hold the individual stages.

pub mod errors;
pub mod extract;
pub mod fetcher;
pub mod json;
pub mod models;
pub mod payload;
pub mod selection;
pub mod session;
pub mod transport;

pub use errors::PortalError;
pub use fetcher::{ChunkOutcome, ChunkReport, CourseFetcher, FetchReport, ListingPage};
pub use models::{
    Category, CategoryScope, CategoryTab, CourseRecord, FormPayload, HarvestedParameters,
    SelectionOutcome, SelectionRequest, SelectionResult,
};
pub use selection::SelectionExecutor;
pub use session::{EndpointConfig, PortalSession, Protocol};
pub use transport::{HttpTransport, PortalTransport, RawResponse};

use crate::config::Config;
use std::sync::Arc;
use std::time::Duration;

/// Engine entry point for fetching and selecting.
///
/// Holds no per-school or per-user state; every call names its session.
#[derive(Clone)]
pub struct PortalApi {
    fetcher: CourseFetcher,
    executor: SelectionExecutor,
}

impl PortalApi {
    /// Build an API backed by a real HTTP transport.
    pub fn new_with_config(config: &Config) -> Result<Self, PortalError> {
        let transport = HttpTransport::new(config.request_timeout, &config.user_agent)?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    pub fn with_transport(transport: Arc<dyn PortalTransport>) -> Self {
        Self {
            fetcher: CourseFetcher::new(transport.clone()),
            executor: SelectionExecutor::new(transport),
        }
    }

    /// All courses in `scope`. Fails only when the credential is missing.
    pub async fn fetch_courses(
        &self,
        session: &PortalSession,
        scope: &CategoryScope,
    ) -> Result<Vec<CourseRecord>, PortalError> {
        Ok(self.fetch_report(session, scope).await?.courses)
    }

    /// Like [`PortalApi::fetch_courses`], with per-request outcomes.
    pub async fn fetch_report(
        &self,
        session: &PortalSession,
        scope: &CategoryScope,
    ) -> Result<FetchReport, PortalError> {
        session.ensure_credential()?;
        Ok(self.fetcher.fetch(session, scope).await)
    }

    pub async fn select_single(
        &self,
        session: &PortalSession,
        request: &SelectionRequest,
    ) -> Result<SelectionResult, PortalError> {
        session.ensure_credential()?;
        Ok(self.executor.submit_single(session, request).await)
    }

    pub async fn select_batch(
        &self,
        session: &PortalSession,
        requests: &[SelectionRequest],
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Result<Vec<SelectionResult>, PortalError> {
        session.ensure_credential()?;
        Ok(self
            .executor
            .submit_batch(session, requests, batch_size, inter_batch_delay)
            .await)
    }
}
