//! Paginated course discovery across every category tab of a session.
//!
//! A fetch never fails as a whole once its precondition holds: every tab and
//! every page chunk is isolated, and a failure only costs the rows it would
//! have produced. [`FetchReport`] records what happened to each chunk.

use crate::portal::errors::{PortalError, body_snippet, is_session_expired};
use crate::portal::extract::{
    builtin_fallback_tab, extract_category_tabs, extract_hidden_fields, parse_category_tabs,
};
use crate::portal::json::{looks_like_json, parse_json_with_context};
use crate::portal::models::{CategoryScope, CategoryTab, CourseRecord, HarvestedParameters};
use crate::portal::payload::{
    PageWindow, build_listing_payload, build_tab_parameters_payload, page_windows,
};
use crate::portal::session::{PortalPage, PortalSession};
use crate::portal::transport::PortalTransport;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hidden field on the complete-parameters page holding the tab's page count.
const PAGE_HINT_FIELD: &str = "jspage";

/// What happened to one request of a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Rows(usize),
    SessionExpired { status: u16 },
    RequestFailed(String),
    NotJson(String),
    ParseFailed(String),
}

impl ChunkOutcome {
    fn from_error(err: &PortalError) -> Self {
        match err {
            PortalError::SessionExpired { status } => {
                ChunkOutcome::SessionExpired { status: *status }
            }
            PortalError::ResponseNotJson { snippet, .. } => ChunkOutcome::NotJson(snippet.clone()),
            PortalError::ParseFailed { source, .. } => {
                ChunkOutcome::ParseFailed(format!("{source:#}"))
            }
            other => ChunkOutcome::RequestFailed(other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, ChunkOutcome::Rows(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub category_code: String,
    pub selection_window_id: String,
    /// `None` for the tab's complete-parameters request.
    pub window: Option<PageWindow>,
    pub outcome: ChunkOutcome,
}

/// Courses from one fetch plus the fate of every request that produced them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub courses: Vec<CourseRecord>,
    pub chunks: Vec<ChunkReport>,
    /// True when the index page exposed no tabs and the fallback tab was walked.
    pub used_fallback_tab: bool,
}

impl FetchReport {
    /// Any request was answered with a session-expired status.
    pub fn session_expired(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| matches!(c.outcome, ChunkOutcome::SessionExpired { .. }))
    }

    pub fn failed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.outcome.is_failure()).count()
    }
}

/// Walks tabs and page windows, accumulating normalized course records.
#[derive(Clone)]
pub struct CourseFetcher {
    transport: Arc<dyn PortalTransport>,
}

impl CourseFetcher {
    pub fn new(transport: Arc<dyn PortalTransport>) -> Self {
        Self { transport }
    }

    /// Fetch every course visible to `session` within `scope`.
    ///
    /// Callers are expected to have checked the credential.
    pub async fn fetch(&self, session: &PortalSession, scope: &CategoryScope) -> FetchReport {
        let index_html = self.fetch_index(session).await;
        let index_params = extract_hidden_fields(&index_html);

        let fallback = session
            .endpoint
            .fallback_tab
            .clone()
            .unwrap_or_else(builtin_fallback_tab);
        let used_fallback_tab = parse_category_tabs(&index_html).is_empty();
        let tabs = extract_category_tabs(&index_html, &fallback);

        let mut report = FetchReport {
            used_fallback_tab,
            ..FetchReport::default()
        };

        if used_fallback_tab {
            let error =
                PortalError::ParameterHarvestIncomplete("no category tabs on index page".into());
            warn!(
                error = %error,
                hidden_fields = index_params.len(),
                "Continuing with fallback tab"
            );
        }

        for tab in tabs.iter().filter(|t| scope.includes(&t.category_code)) {
            self.fetch_tab(session, &index_params, tab, &mut report).await;
        }

        info!(
            courses = report.courses.len(),
            requests = report.chunks.len(),
            failed = report.failed_chunks(),
            session_expired = report.session_expired(),
            "Course fetch complete"
        );
        report
    }

    /// Index page HTML, or an empty document when it cannot be loaded.
    async fn fetch_index(&self, session: &PortalSession) -> String {
        let url = match session.endpoint.url(PortalPage::SelectionIndex) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build index URL, continuing without it");
                return String::new();
            }
        };

        match self.transport.get(session, &url).await {
            Ok(resp) if resp.is_success() => resp.body,
            Ok(resp) => {
                warn!(status = resp.status, "Index page request failed, continuing without it");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "Index page request failed, continuing without it");
                String::new()
            }
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(category = %tab.category_code, window = %tab.selection_window_id)
    )]
    async fn fetch_tab(
        &self,
        session: &PortalSession,
        index_params: &HarvestedParameters,
        tab: &CategoryTab,
        report: &mut FetchReport,
    ) {
        let chunk_report = |window: Option<PageWindow>, outcome: ChunkOutcome| ChunkReport {
            category_code: tab.category_code.clone(),
            selection_window_id: tab.selection_window_id.clone(),
            window,
            outcome,
        };

        let tab_html = match self.fetch_tab_parameters(session, tab).await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Failed to load tab parameters, skipping category");
                report.chunks.push(chunk_report(None, ChunkOutcome::from_error(&e)));
                return;
            }
        };
        let tab_params = extract_hidden_fields(&tab_html);
        let page_hint = tab_params
            .get(PAGE_HINT_FIELD)
            .and_then(|v| v.trim().parse::<u32>().ok());
        let harvested = index_params.overlay(&tab_params);

        let listing_url = match session.endpoint.url(PortalPage::CourseListing) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build listing URL, skipping category");
                report.chunks.push(chunk_report(None, ChunkOutcome::from_error(&e)));
                return;
            }
        };

        let windows = page_windows(tab.category(), page_hint);
        debug!(chunks = windows.len(), ?page_hint, "Walking listing pages");

        for window in windows {
            let payload = build_listing_payload(&harvested, tab, window.start, window.end);
            let outcome = match self.transport.post_form(session, &listing_url, &payload).await {
                Ok(resp) => parse_listing(resp.status, &resp.body, &listing_url, tab),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(page) => {
                    let count = page.records.len();
                    debug!(
                        pages = %window,
                        rows = page.raw_rows,
                        kept = count,
                        "Listing chunk fetched"
                    );
                    report.courses.extend(page.records);
                    report.chunks.push(chunk_report(Some(window), ChunkOutcome::Rows(count)));
                    if page.raw_rows == 0 {
                        break;
                    }
                }
                Err(e) => {
                    match &e {
                        PortalError::SessionExpired { status } => {
                            warn!(pages = %window, status, "Session expired, abandoning chunk")
                        }
                        _ => warn!(pages = %window, error = %e, "Listing chunk failed, continuing"),
                    }
                    report.chunks.push(chunk_report(Some(window), ChunkOutcome::from_error(&e)));
                }
            }
        }
    }

    async fn fetch_tab_parameters(
        &self,
        session: &PortalSession,
        tab: &CategoryTab,
    ) -> Result<String, PortalError> {
        let url = session.endpoint.url(PortalPage::CompleteParameters)?;
        let resp = self
            .transport
            .post_form(session, &url, &build_tab_parameters_payload(tab))
            .await?;
        check_status(resp.status, &resp.body)?;
        Ok(resp.body)
    }
}

/// Map a non-2xx status onto the error taxonomy.
pub(crate) fn check_status(status: u16, body: &str) -> Result<(), PortalError> {
    if is_session_expired(status) {
        return Err(PortalError::SessionExpired { status });
    }
    if !(200..300).contains(&status) {
        return Err(PortalError::RequestFailed(format!(
            "HTTP {status}: {}",
            body_snippet(body)
        )));
    }
    Ok(())
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Envelope {
        #[serde(rename = "tmpList", default)]
        tmp_list: Vec<Value>,
    },
    Rows(Vec<Value>),
}

/// One decoded listing chunk.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Normalized records; rows without a section id are dropped.
    pub records: Vec<CourseRecord>,
    /// Rows the portal sent, before any were dropped.
    pub raw_rows: usize,
}

/// Interpret one listing response as course records for `tab`.
pub fn parse_listing(
    status: u16,
    body: &str,
    url: &str,
    tab: &CategoryTab,
) -> Result<ListingPage, PortalError> {
    check_status(status, body)?;
    if !looks_like_json(body) {
        return Err(PortalError::ResponseNotJson {
            status,
            snippet: body_snippet(body),
        });
    }

    let rows = match parse_json_with_context::<ListingBody>(body) {
        Ok(ListingBody::Envelope { tmp_list }) => tmp_list,
        Ok(ListingBody::Rows(rows)) => rows,
        Err(source) => {
            return Err(PortalError::ParseFailed {
                status,
                url: url.to_string(),
                source,
            });
        }
    };

    let records = rows
        .iter()
        .filter_map(|row| match row {
            Value::Object(fields) => normalize_row(fields, tab),
            _ => None,
        })
        .collect();
    Ok(ListingPage {
        records,
        raw_rows: rows.len(),
    })
}

/// Normalize one listing row. Rows without a section id are dropped.
pub fn normalize_row(row: &Map<String, Value>, tab: &CategoryTab) -> Option<CourseRecord> {
    let Some(section_id) = text(row, "jxb_id") else {
        debug!(row = ?row.keys().collect::<Vec<_>>(), "Listing row without jxb_id, skipping");
        return None;
    };

    Some(CourseRecord {
        course_id: text(row, "kch_id").unwrap_or_else(|| section_id.clone()),
        execution_section_id: text(row, "do_jxb_id").unwrap_or_else(|| section_id.clone()),
        name: text(row, "kcmc").unwrap_or_default(),
        class_name: text(row, "jxbmc"),
        instructor: text(row, "jsxx").map(|raw| instructor_names(&raw)),
        schedule: text(row, "sksj"),
        room: text(row, "jxdd"),
        credit: number(row, "xf"),
        capacity: number(row, "jxbrl"),
        enrolled_count: number(row, "yxzrs"),
        category_code: tab.category_code.clone(),
        selection_window_id: tab.selection_window_id.clone(),
        original: row.clone(),
        section_id,
    })
}

fn text(row: &Map<String, Value>, key: &str) -> Option<String> {
    let raw = match row.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    if raw.contains('&') {
        Some(htmlize::unescape(raw.as_str()).to_string())
    } else {
        Some(raw)
    }
}

fn number<T: FromStr>(row: &Map<String, Value>, key: &str) -> Option<T> {
    text(row, key)?.parse().ok()
}

/// `"10086/张三/教授;10087/李四/讲师"` → `"张三, 李四"`.
fn instructor_names(raw: &str) -> String {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split('/').map(str::trim).collect();
            match parts.as_slice() {
                [_, name, ..] if !name.is_empty() => name.to_string(),
                _ => entry.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
