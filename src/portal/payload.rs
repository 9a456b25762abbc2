//! Pure construction of the portal's form bodies.
//!
//! Listing payloads resolve every field through one ordered merge:
//!
//! 1. the fixed default table ([`LISTING_FIELDS`]), empty string when no default exists
//! 2. harvested hidden-field values, which replace defaults
//! 3. tab identity and category constants, which replace both
//! 4. page bounds
//!
//! Nothing outside [`LISTING_FIELDS`] is sent, so stray hidden inputs never leak
//! into a request.

use crate::portal::models::{
    Category, CategoryTab, FormPayload, HarvestedParameters, SelectionRequest,
};
use indexmap::IndexMap;

/// Pages covered by one listing request.
pub const PAGE_CHUNK: u32 = 10;

/// Flags that are `"0"` normally and forced to `"1"` for physical education.
pub const PE_ONLY_FLAGS: [&str; 5] = ["sfkknj", "sfkkzy", "kzybkxy", "sfznkx", "sfkxq"];

/// Every listing field, in wire order, with its default.
pub const LISTING_FIELDS: &[(&str, Option<&str>)] = &[
    ("rwlx", None),
    ("xkly", Some("0")),
    ("bklx_id", Some("0")),
    ("sfkkjyxdxnxq", Some("0")),
    ("xqh_id", None),
    ("jg_id", None),
    ("njdm_id_1", None),
    ("zyh_id_1", None),
    ("gnjkxdnj", Some("0")),
    ("zyh_id", None),
    ("zyfx_id", Some("wfx")),
    ("njdm_id", None),
    ("bh_id", None),
    ("bjgkczxbbjwcx", Some("0")),
    ("xbm", None),
    ("xslbdm", Some("wlb")),
    ("mzm", None),
    ("xz", None),
    ("ccdm", None),
    ("xsbj", None),
    ("sfkknj", Some("0")),
    ("sfkkzy", Some("0")),
    ("kzybkxy", Some("0")),
    ("sfznkx", Some("0")),
    ("zdkxms", Some("0")),
    ("sfkxq", Some("0")),
    ("sfkcfx", Some("0")),
    ("kkbk", Some("0")),
    ("kkbkdj", Some("0")),
    ("sfkgbcx", Some("0")),
    ("sfrxtgkcxd", Some("0")),
    ("tykczgxdcs", Some("0")),
    ("xkxnm", None),
    ("xkxqm", None),
    ("kklxdm", None),
    ("bbhzxjxb", Some("0")),
    ("rlkz", Some("0")),
    ("xkzgbj", Some("0")),
    ("xkkz_id", None),
    ("xklc", None),
    ("kspage", None),
    ("jspage", None),
    ("jxbzb", None),
];

/// An inclusive page range stamped onto one listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PageWindow {
    pub start: u32,
    pub end: u32,
}

impl std::fmt::Display for PageWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Page windows for a category, lowered (never raised) by a positive `page_hint`.
pub fn page_windows(category: Category, page_hint: Option<u32>) -> Vec<PageWindow> {
    let ceiling = match page_hint {
        Some(hint) if hint > 0 => hint.min(category.page_ceiling()),
        _ => category.page_ceiling(),
    };
    (1..=ceiling)
        .step_by(PAGE_CHUNK as usize)
        .map(|start| PageWindow {
            start,
            end: (start + PAGE_CHUNK - 1).min(ceiling),
        })
        .collect()
}

/// Build the listing body for one tab and page window. Pure and deterministic.
pub fn build_listing_payload(
    harvested: &HarvestedParameters,
    tab: &CategoryTab,
    page_start: u32,
    page_end: u32,
) -> FormPayload {
    let category = tab.category();

    let mut fields: IndexMap<String, String> = LISTING_FIELDS
        .iter()
        .map(|(name, default)| {
            let value = harvested
                .get(name)
                .or(*default)
                .unwrap_or_default();
            (name.to_string(), value.to_string())
        })
        .collect();

    let mut set = |name: &str, value: &str| {
        if let Some(slot) = fields.get_mut(name) {
            *slot = value.to_string();
        }
    };

    set("kklxdm", &tab.category_code);
    set("xkkz_id", &tab.selection_window_id);
    set("njdm_id", &tab.grade_cohort_id);
    set("njdm_id_1", &tab.grade_cohort_id);
    set("zyh_id", &tab.major_id);
    set("zyh_id_1", &tab.major_id);
    set("rwlx", category.task_type());
    set("xklc", category.round());
    if category == Category::PhysicalEducation {
        for flag in PE_ONLY_FLAGS {
            set(flag, "1");
        }
    }
    set("kspage", &page_start.to_string());
    set("jspage", &page_end.to_string());

    FormPayload::from_fields(fields)
}

/// Body for the tab-scoped complete-parameters page.
pub fn build_tab_parameters_payload(tab: &CategoryTab) -> FormPayload {
    let fields = [
        ("xkkz_id", tab.selection_window_id.as_str()),
        ("xszxzt", "1"),
        ("kspage", "0"),
        ("jspage", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    FormPayload::from_fields(fields)
}

/// Body for a selection submission, with the category's constants.
pub fn build_selection_payload(req: &SelectionRequest) -> FormPayload {
    let category = Category::resolve(&req.category_code);
    let mut fields: IndexMap<String, String> = IndexMap::new();
    let mut push = |k: &str, v: &str| {
        fields.insert(k.to_string(), v.to_string());
    };

    push("jxb_ids", &req.execution_section_id);
    push("jxb_id", &req.section_id);
    push("kch_id", &req.course_id);
    push("jxbzls", &req.section_count.max(1).to_string());
    push("kklxdm", &req.category_code);
    push("rwlx", category.task_type());
    push("xklc", category.round());
    if let Some(window) = req.selection_window_id.as_deref().filter(|w| !w.is_empty()) {
        push("xkkz_id", window);
    }
    push("qz", "0");
    push("rlkz", "0");
    push("rlzlkz", "1");
    push("sxbj", "1");
    push("xxkbj", "0");
    push("cxbj", "0");

    FormPayload::from_fields(fields)
}
