//! JSON decoding helpers for portal responses.
//!
//! The portal answers most XHR endpoints with JSON, but an expired session or
//! a server fault yields an HTML page with a 200 status. Callers first check
//! [`looks_like_json`] so those bodies are reported as "not JSON" instead of a
//! confusing parse error at column 1.

use anyhow::Result;

/// Cheap sniff: does the body start (after whitespace and a BOM) like a JSON document?
pub fn looks_like_json(body: &str) -> bool {
    let trimmed = body.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Parse JSON and, on failure, report the serde path, the type mismatch and a
/// snippet of the offending line.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let body = body.trim_start_matches('\u{feff}');
    let jd = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize(jd) {
        Ok(value) => Ok(value),
        Err(err) => {
            let inner_err = err.inner();
            let (line, column) = (inner_err.line(), inner_err.column());
            let path = err.path().to_string();

            let msg = inner_err.to_string();
            let loc = format!(" at line {line} column {column}");
            let msg_without_loc = msg.strip_suffix(&loc).unwrap_or(&msg).to_string();

            let mut final_err = String::new();
            if !path.is_empty() && path != "." {
                final_err.push_str(&format!("at path '{path}': "));
            }
            final_err.push_str(&format!(
                "{} (line {line} col {column})\n{}",
                describe_mismatch(&msg_without_loc),
                error_snippet(body, line, column, 20)
            ));

            Err(anyhow::anyhow!(final_err))
        }
    }
}

/// Turn "invalid type: null, expected a string" into "expected a string, got null".
fn describe_mismatch(error_msg: &str) -> String {
    if let Some(rest) = error_msg.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {actual}", expected.trim());
    }
    error_msg.to_string()
}

fn error_snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .chars()
        .collect();
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    // serde reports a 1-based byte column; clamp it onto the char vector
    let error_idx = column.saturating_sub(1).min(target.len() - 1);
    let half = context_len / 2;
    let start = error_idx.saturating_sub(half);
    let end = (error_idx + half).min(target.len());

    let slice: String = target[start..end].iter().collect();
    let indicator = " ".repeat(error_idx - start) + "^";
    format!("...{slice}...\n   {indicator}")
}
