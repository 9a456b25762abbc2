//! Harvesting session-scoped parameters and category tabs from portal HTML.
//!
//! The selection portal keeps most of its state in hidden `<input>` fields and
//! encodes each category tab as an inline `onclick="queryCourse(this,'10',...)"`
//! handler. Both are read here without executing any script.

use crate::portal::models::{CategoryTab, HarvestedParameters};
use html_scraper::{Html, Selector};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Name of the portal's client-side course-query function.
pub const QUERY_FUNCTION: &str = "queryCourse";

static INPUT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("input").unwrap());
static ONCLICK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[onclick]").unwrap());
static QUERY_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{}\s*\(([^)]*)\)", regex::escape(QUERY_FUNCTION))).unwrap()
});

/// Tab substituted when a page exposes none.
///
/// This is one school's compulsory tab. It keeps the pipeline alive when the
/// index page is unavailable or restyled; schools can override it through
/// [`crate::portal::EndpointConfig::fallback_tab`].
pub fn builtin_fallback_tab() -> CategoryTab {
    CategoryTab {
        category_code: "01".to_string(),
        selection_window_id: "D5C3E6A5F1B04C0BE0530A0A1E0A7B9C".to_string(),
        grade_cohort_id: "2023".to_string(),
        major_id: "0801".to_string(),
    }
}

/// Collect every named hidden input. Empty names are ignored; the first
/// occurrence of a repeated name wins.
pub fn extract_hidden_fields(html: &str) -> HarvestedParameters {
    let document = Html::parse_document(html);
    let mut fields = HarvestedParameters::new();

    for input in document.select(&INPUT_SEL) {
        let element = input.value();
        let is_hidden = element
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("hidden"));
        if !is_hidden {
            continue;
        }
        let name = match element.attr("name") {
            Some(n) if !n.trim().is_empty() => n.trim(),
            _ => continue,
        };
        fields.insert_if_absent(name, element.attr("value").unwrap_or_default());
    }

    fields
}

/// Discover category tabs from `queryCourse(...)` click handlers.
///
/// Never returns an empty list: when nothing parses, `fallback` is returned
/// alone.
pub fn extract_category_tabs(html: &str, fallback: &CategoryTab) -> Vec<CategoryTab> {
    let tabs = parse_category_tabs(html);
    if tabs.is_empty() {
        warn!(
            fallback_category = fallback.category_code.as_str(),
            fallback_window = fallback.selection_window_id.as_str(),
            "No category tabs found on page, using fallback tab"
        );
        return vec![fallback.clone()];
    }
    debug!(count = tabs.len(), "Extracted category tabs");
    tabs
}

/// Tabs actually present on the page, in document order, without duplicates.
pub fn parse_category_tabs(html: &str) -> Vec<CategoryTab> {
    let document = Html::parse_document(html);
    let mut tabs: Vec<CategoryTab> = Vec::new();

    for element in document.select(&ONCLICK_SEL) {
        let Some(handler) = element.value().attr("onclick") else {
            continue;
        };
        for caps in QUERY_CALL_RE.captures_iter(handler) {
            let Some(tab) = tab_from_arguments(&caps[1]) else {
                continue;
            };
            if !tabs.contains(&tab) {
                tabs.push(tab);
            }
        }
    }

    tabs
}

/// Arguments are `(this, kklxdm, xkkz_id, njdm_id, zyh_id, ...)`.
fn tab_from_arguments(raw: &str) -> Option<CategoryTab> {
    let args: Vec<String> = raw.split(',').map(strip_quotes).collect();
    if args.len() < 5 {
        return None;
    }
    Some(CategoryTab {
        category_code: args[1].clone(),
        selection_window_id: args[2].clone(),
        grade_cohort_id: args[3].clone(),
        major_id: args[4].clone(),
    })
}

fn strip_quotes(arg: &str) -> String {
    let arg = arg.trim();
    let unquoted = ['\'', '"']
        .iter()
        .find_map(|q| arg.strip_prefix(*q).and_then(|a| a.strip_suffix(*q)))
        .unwrap_or(arg);
    unquoted.trim().to_string()
}
