//! Course-selection submission, single and batched.

use crate::portal::errors::{PortalError, body_snippet, is_session_expired};
use crate::portal::json::{looks_like_json, parse_json_with_context};
use crate::portal::models::{SelectionOutcome, SelectionRequest, SelectionResult};
use crate::portal::payload::build_selection_payload;
use crate::portal::session::{PortalPage, PortalSession};
use crate::portal::transport::PortalTransport;
use crate::utils::fmt_duration;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The only flag value the portal documents as success.
pub const SUCCESS_FLAG: &str = "1";

/// Submits selection requests. Every outcome, including transport errors,
/// comes back as a [`SelectionResult`].
#[derive(Clone)]
pub struct SelectionExecutor {
    transport: Arc<dyn PortalTransport>,
}

impl SelectionExecutor {
    pub fn new(transport: Arc<dyn PortalTransport>) -> Self {
        Self { transport }
    }

    /// Submit one request.
    #[tracing::instrument(
        skip_all,
        fields(section = %req.section_id, category = %req.category_code)
    )]
    pub async fn submit_single(
        &self,
        session: &PortalSession,
        req: &SelectionRequest,
    ) -> SelectionResult {
        let url = match session.endpoint.url(PortalPage::SelectionSubmit) {
            Ok(url) => url,
            Err(e) => {
                return SelectionResult::failure(SelectionOutcome::RequestFailed, e.to_string());
            }
        };

        let payload = build_selection_payload(req);
        let result = match self.transport.post_form(session, &url, &payload).await {
            Ok(resp) => interpret_response(resp.status, &resp.body),
            Err(e) => SelectionResult::failure(SelectionOutcome::RequestFailed, e.to_string()),
        };

        if result.success {
            info!(flag = ?result.flag, "Selection accepted");
        } else {
            debug!(
                outcome = ?result.outcome,
                flag = ?result.flag,
                message = %result.message,
                "Selection not accepted"
            );
        }
        result
    }

    /// Submit `reqs` in chunks of `batch_size`, each chunk concurrently, with
    /// `inter_batch_delay` between chunks. Results are in input order.
    pub async fn submit_batch(
        &self,
        session: &PortalSession,
        reqs: &[SelectionRequest],
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Vec<SelectionResult> {
        let batch_size = batch_size.max(1);
        let chunk_count = reqs.len().div_ceil(batch_size);
        let started = Instant::now();
        let mut results = Vec::with_capacity(reqs.len());

        for (index, chunk) in reqs.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(inter_batch_delay).await;
            }
            debug!(
                chunk = index + 1,
                of = chunk_count,
                size = chunk.len(),
                "Submitting selection chunk"
            );
            let chunk_results =
                join_all(chunk.iter().map(|req| self.submit_single(session, req))).await;
            results.extend(chunk_results);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            total = reqs.len(),
            succeeded,
            failed = reqs.len() - succeeded,
            chunks = chunk_count,
            duration = fmt_duration(started.elapsed()),
            "Batch selection complete"
        );
        results
    }
}

/// Turn a raw selection response into a result. Never fails.
pub fn interpret_response(status: u16, body: &str) -> SelectionResult {
    if is_session_expired(status) {
        return SelectionResult::failure(
            SelectionOutcome::SessionExpired,
            PortalError::SessionExpired { status }.to_string(),
        );
    }
    if !(200..300).contains(&status) {
        return SelectionResult::failure(
            SelectionOutcome::RequestFailed,
            format!("HTTP {status}: {}", body_snippet(body)),
        );
    }
    if !looks_like_json(body) {
        warn!(status, "Selection response was not JSON");
        return SelectionResult::failure(SelectionOutcome::NotJson, body_snippet(body));
    }

    let value: Value = match parse_json_with_context(body) {
        Ok(v) => v,
        Err(e) => return SelectionResult::failure(SelectionOutcome::NotJson, format!("{e:#}")),
    };

    let flag = match value.get("flag") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    };
    let message = value
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let success = flag.as_deref() == Some(SUCCESS_FLAG);
    SelectionResult {
        success,
        flag,
        message,
        outcome: if success {
            SelectionOutcome::Selected
        } else {
            SelectionOutcome::Rejected
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_one_is_success() {
        let r = interpret_response(200, r#"{"flag":"1","msg":""}"#);
        assert!(r.success);
        assert_eq!(r.outcome, SelectionOutcome::Selected);
        assert_eq!(r.flag.as_deref(), Some("1"));
    }

    #[test]
    fn numeric_flag_is_accepted() {
        assert!(interpret_response(200, r#"{"flag":1}"#).success);
    }

    #[test]
    fn other_flags_pass_message_through() {
        let r = interpret_response(200, r#"{"flag":"0","msg":"该教学班已满，不可选！"}"#);
        assert!(!r.success);
        assert_eq!(r.outcome, SelectionOutcome::Rejected);
        assert_eq!(r.message, "该教学班已满，不可选！");

        let r = interpret_response(200, r#"{"msg":"  spaces kept  "}"#);
        assert!(!r.success);
        assert_eq!(r.flag, None);
        assert_eq!(r.message, "  spaces kept  ");
    }

    #[test]
    fn transport_level_failures() {
        assert_eq!(interpret_response(901, "").outcome, SelectionOutcome::SessionExpired);
        assert_eq!(interpret_response(502, "bad gateway").outcome, SelectionOutcome::RequestFailed);
        let r = interpret_response(200, "<html>系统维护中</html>");
        assert_eq!(r.outcome, SelectionOutcome::NotJson);
        assert!(r.message.contains("系统维护中"));
    }
}
