//! Session and per-school endpoint context.
//!
//! Both are owned by whoever logged the user in. The engine only reads them;
//! nothing here is cached or persisted between calls.

use crate::portal::errors::PortalError;
use crate::portal::models::CategoryTab;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

const DEFAULT_BASE_PATH: &str = "/jwglxt";

/// Query code of the student course-selection feature on stock installs.
pub const DEFAULT_SELECTION_CODE: &str = "N253512";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// Portal feature whose query code (`gnmkdm`) must accompany a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    CourseSelection,
}

impl Feature {
    fn key(self) -> &'static str {
        match self {
            Feature::CourseSelection => "selection",
        }
    }
}

/// The portal pages the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalPage {
    /// Landing page listing the category tabs.
    SelectionIndex,
    /// Tab-scoped page carrying the complete hidden parameter set.
    CompleteParameters,
    /// JSON course listing.
    CourseListing,
    /// JSON selection submission.
    SelectionSubmit,
}

impl PortalPage {
    fn path(self) -> &'static str {
        match self {
            PortalPage::SelectionIndex => "xsxk/zzxkyzb_cxZzxkYzbIndex.html",
            PortalPage::CompleteParameters => "xsxk/zzxkyzb_cxZzxkYzbDisplay.html",
            PortalPage::CourseListing => "xsxk/zzxkyzb_cxZzxkYzbPartDisplay.html",
            PortalPage::SelectionSubmit => "xsxk/zzxkyzbjk_xkBcZyZzxkYzb.html",
        }
    }

    fn feature(self) -> Feature {
        Feature::CourseSelection
    }
}

/// Where one school's portal lives and which query codes it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub domain: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Feature name → `gnmkdm` code. Missing entries fall back to stock codes.
    #[serde(default)]
    pub query_codes: BTreeMap<String, String>,
    /// Replaces the built-in degraded-mode tab for this school.
    #[serde(default)]
    pub fallback_tab: Option<CategoryTab>,
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

impl EndpointConfig {
    pub fn new(domain: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            domain: domain.into(),
            protocol,
            base_path: default_base_path(),
            query_codes: BTreeMap::new(),
            fallback_tab: None,
        }
    }

    pub fn query_code(&self, feature: Feature) -> &str {
        self.query_codes
            .get(feature.key())
            .map(String::as_str)
            .unwrap_or(match feature {
                Feature::CourseSelection => DEFAULT_SELECTION_CODE,
            })
    }

    /// Build the absolute URL of a portal page, including its `gnmkdm` code.
    pub fn url(&self, page: PortalPage) -> Result<String, PortalError> {
        let base_path = self.base_path.trim_matches('/');
        let root = if base_path.is_empty() {
            format!("{}://{}/", self.protocol.as_str(), self.domain)
        } else {
            format!("{}://{}/{base_path}/", self.protocol.as_str(), self.domain)
        };

        let mut url = Url::parse(&root)
            .and_then(|u| u.join(page.path()))
            .map_err(|e| PortalError::RequestFailed(format!("invalid portal URL {root}: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("gnmkdm", self.query_code(page.feature()));
            if page == PortalPage::SelectionIndex {
                query.append_pair("layout", "default");
            }
        }
        Ok(url.into())
    }
}

/// A logged-in portal session: opaque credential plus the school's endpoints.
#[derive(custom_debug_derive::Debug, Clone)]
pub struct PortalSession {
    /// Sent verbatim as the `Cookie` header.
    #[debug(skip)]
    credential: String,
    pub endpoint: EndpointConfig,
}

impl PortalSession {
    pub fn new(credential: impl Into<String>, endpoint: EndpointConfig) -> Self {
        Self {
            credential: credential.into(),
            endpoint,
        }
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Precondition for every network-bound operation.
    pub fn ensure_credential(&self) -> Result<(), PortalError> {
        if self.credential.trim().is_empty() {
            Err(PortalError::CredentialMissing)
        } else {
            Ok(())
        }
    }
}
