#![allow(dead_code)]

use async_trait::async_trait;
use coursegrab::portal::{
    EndpointConfig, FormPayload, PortalError, PortalSession, PortalTransport, Protocol, RawResponse,
};
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Which portal page a request went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Index,
    Parameters,
    Listing,
    Select,
    Other,
}

impl Page {
    fn of(url: &str) -> Self {
        if url.contains("zzxkyzb_cxZzxkYzbIndex") {
            Page::Index
        } else if url.contains("zzxkyzb_cxZzxkYzbPartDisplay") {
            Page::Listing
        } else if url.contains("zzxkyzb_cxZzxkYzbDisplay") {
            Page::Parameters
        } else if url.contains("zzxkyzbjk_xkBcZyZzxkYzb") {
            Page::Select
        } else {
            Page::Other
        }
    }
}

/// One request as seen by the fake portal.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub page: Page,
    pub url: String,
    pub form: Vec<(String, String)>,
    pub at: Instant,
}

impl Recorded {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

type Handler = dyn Fn(&Recorded) -> Result<RawResponse, PortalError> + Send + Sync;
type Delay = dyn Fn(&Recorded) -> Duration + Send + Sync;

/// Scripted in-process portal.
///
/// Every request is recorded and answered by the handler. Selection posts are
/// counted so tests can assert on concurrency.
pub struct FakeTransport {
    handler: Box<Handler>,
    delay: Box<Delay>,
    requests: Mutex<Vec<Recorded>>,
    selects_in_flight: AtomicUsize,
    max_selects_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new(
        handler: impl Fn(&Recorded) -> Result<RawResponse, PortalError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Box::new(|_| Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            selects_in_flight: AtomicUsize::new(0),
            max_selects_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every response for `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delays(move |_| delay)
    }

    /// Hold each response for a duration chosen from its request.
    pub fn with_delays(
        mut self,
        delay: impl Fn(&Recorded) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, page: Page) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.page == page)
            .collect()
    }

    pub fn max_concurrent_selects(&self) -> usize {
        self.max_selects_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(
        &self,
        url: &str,
        payload: Option<&FormPayload>,
    ) -> Result<RawResponse, PortalError> {
        let recorded = Recorded {
            page: Page::of(url),
            url: url.to_string(),
            form: payload
                .map(|p| p.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
                .unwrap_or_default(),
            at: Instant::now(),
        };
        self.requests.lock().unwrap().push(recorded.clone());

        let is_select = recorded.page == Page::Select;
        if is_select {
            let now = self.selects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_selects_in_flight.fetch_max(now, Ordering::SeqCst);
        }
        let delay = (self.delay)(&recorded);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let response = (self.handler)(&recorded);
        if is_select {
            self.selects_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        response
    }
}

#[async_trait]
impl PortalTransport for FakeTransport {
    async fn get(&self, _session: &PortalSession, url: &str) -> Result<RawResponse, PortalError> {
        self.respond(url, None).await
    }

    async fn post_form(
        &self,
        _session: &PortalSession,
        url: &str,
        payload: &FormPayload,
    ) -> Result<RawResponse, PortalError> {
        self.respond(url, Some(payload)).await
    }
}

pub fn session() -> PortalSession {
    PortalSession::new(
        "JSESSIONID=test",
        EndpointConfig::new("jwxt.test.edu.cn", Protocol::Https),
    )
}

/// Index page with one tab per `(category, window id)`.
pub fn index_html(tabs: &[(&str, &str)]) -> String {
    let items: String = tabs
        .iter()
        .map(|(code, window)| {
            format!(
                r#"<li><a onclick="queryCourse(this,'{code}','{window}','2023','0801')">tab</a></li>"#
            )
        })
        .collect();
    format!(
        r#"<html><body>
        <input type="hidden" name="xkxnm" id="xkxnm" value="2025"/>
        <input type="hidden" name="xkxqm" id="xkxqm" value="3"/>
        <ul>{items}</ul>
        </body></html>"#
    )
}

/// Complete-parameters page, optionally carrying a page-count hint.
pub fn parameters_html(page_hint: Option<u32>) -> String {
    let hint = page_hint
        .map(|h| format!(r#"<input type="hidden" name="jspage" value="{h}"/>"#))
        .unwrap_or_default();
    format!(r#"<html><input type="hidden" name="njdm_id" value="2023"/>{hint}</html>"#)
}

pub fn course_row(section: &str, name: &str) -> Value {
    json!({
        "jxb_id": section,
        "do_jxb_id": format!("do-{section}"),
        "kch_id": format!("K{section}"),
        "kcmc": name,
        "jsxx": "10086/张三/教授",
        "jxbrl": "60",
        "yxzrs": "12",
        "xf": "3.0",
    })
}

pub fn listing(rows: Vec<Value>) -> RawResponse {
    RawResponse::new(200, json!({ "tmpList": rows }).to_string())
}

pub fn selected() -> RawResponse {
    RawResponse::new(200, r#"{"flag":"1","msg":"选课成功"}"#)
}

pub fn rejected(message: &str) -> RawResponse {
    RawResponse::new(200, json!({ "flag": "0", "msg": message }).to_string())
}
