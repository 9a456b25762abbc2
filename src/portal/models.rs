//! Data model shared by the extractor, builder, fetcher and executor.

use crate::portal::errors::PortalError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Portal course category (`kklxdm`).
///
/// Codes the engine does not recognize are served with compulsory constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Compulsory,
    ElectivePool,
    PhysicalEducation,
}

impl Category {
    pub const COMPULSORY_CODE: &'static str = "01";
    pub const ELECTIVE_POOL_CODE: &'static str = "10";
    pub const PHYSICAL_EDUCATION_CODE: &'static str = "05";

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            Self::COMPULSORY_CODE => Some(Self::Compulsory),
            Self::ELECTIVE_POOL_CODE => Some(Self::ElectivePool),
            Self::PHYSICAL_EDUCATION_CODE => Some(Self::PhysicalEducation),
            _ => None,
        }
    }

    /// Like [`Category::from_code`], but unknown codes resolve to compulsory.
    pub fn resolve(code: &str) -> Self {
        Self::from_code(code).unwrap_or(Self::Compulsory)
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Compulsory => Self::COMPULSORY_CODE,
            Self::ElectivePool => Self::ELECTIVE_POOL_CODE,
            Self::PhysicalEducation => Self::PHYSICAL_EDUCATION_CODE,
        }
    }

    /// `rwlx` value.
    pub fn task_type(self) -> &'static str {
        match self {
            Self::Compulsory => "1",
            Self::ElectivePool | Self::PhysicalEducation => "2",
        }
    }

    /// `xklc` value.
    pub fn round(self) -> &'static str {
        match self {
            Self::Compulsory => "2",
            Self::ElectivePool => "4",
            Self::PhysicalEducation => "3",
        }
    }

    /// Highest page the listing is walked to.
    pub fn page_ceiling(self) -> u32 {
        match self {
            Self::Compulsory | Self::PhysicalEducation => 10,
            Self::ElectivePool => 120,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compulsory => "compulsory",
            Self::ElectivePool => "elective-pool",
            Self::PhysicalEducation => "physical-education",
        })
    }
}

/// Which discovered tabs a fetch should walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryScope {
    #[default]
    All,
    /// Only tabs whose raw `kklxdm` is listed.
    Codes(Vec<String>),
}

impl CategoryScope {
    pub fn includes(&self, category_code: &str) -> bool {
        match self {
            CategoryScope::All => true,
            CategoryScope::Codes(codes) => codes.iter().any(|c| c.trim() == category_code),
        }
    }
}

/// One selectable category tab harvested from the index page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryTab {
    /// `kklxdm`
    pub category_code: String,
    /// `xkkz_id`
    pub selection_window_id: String,
    /// `njdm_id`
    pub grade_cohort_id: String,
    /// `zyh_id`
    pub major_id: String,
}

impl CategoryTab {
    pub fn category(&self) -> Category {
        Category::resolve(&self.category_code)
    }
}

/// Hidden `<input>` values harvested from a portal page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestedParameters(HashMap<String, String>);

impl HarvestedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps the first value seen for a name.
    pub(crate) fn insert_if_absent(&mut self, name: &str, value: &str) {
        self.0
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Layer `other` on top of `self`; `other` wins on conflicts.
    pub fn overlay(&self, other: &HarvestedParameters) -> HarvestedParameters {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        HarvestedParameters(merged)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HarvestedParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// An ordered, flat form body. Built once per request and never edited afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormPayload(IndexMap<String, String>);

impl FormPayload {
    pub(crate) fn from_fields(fields: IndexMap<String, String>) -> Self {
        Self(fields)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `application/x-www-form-urlencoded` body, in field order.
    pub fn to_urlencoded(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

/// One offered class section, normalized from a listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    pub course_id: String,
    pub section_id: String,
    pub execution_section_id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub instructor: Option<String>,
    pub schedule: Option<String>,
    pub room: Option<String>,
    pub credit: Option<f64>,
    pub capacity: Option<u32>,
    pub enrolled_count: Option<u32>,
    pub category_code: String,
    pub selection_window_id: String,
    /// The listing row as the portal sent it.
    pub original: serde_json::Map<String, serde_json::Value>,
}

impl CourseRecord {
    /// Remaining seats, when both capacity and enrollment are known.
    pub fn seats_left(&self) -> Option<i64> {
        match (self.capacity, self.enrolled_count) {
            (Some(cap), Some(enrolled)) => Some(i64::from(cap) - i64::from(enrolled)),
            _ => None,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self.capacity, Some(cap) if cap > 0) && self.seats_left().is_some_and(|s| s <= 0)
    }
}

/// Everything one selection submission needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub section_id: String,
    pub execution_section_id: String,
    pub course_id: String,
    #[serde(default = "default_section_count")]
    pub section_count: u32,
    pub category_code: String,
    /// `xkkz_id` of the tab the section was listed under, when known.
    #[serde(default)]
    pub selection_window_id: Option<String>,
}

fn default_section_count() -> u32 {
    1
}

impl From<&CourseRecord> for SelectionRequest {
    fn from(record: &CourseRecord) -> Self {
        Self {
            section_id: record.section_id.clone(),
            execution_section_id: record.execution_section_id.clone(),
            course_id: record.course_id.clone(),
            section_count: default_section_count(),
            category_code: record.category_code.clone(),
            selection_window_id: Some(record.selection_window_id.clone())
                .filter(|id| !id.is_empty()),
        }
    }
}

/// How a submission ended, for callers that react differently per failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOutcome {
    Selected,
    /// The portal answered with a non-success flag.
    Rejected,
    /// HTTP 901/910; the user has to log in again.
    SessionExpired,
    /// Transport error or unexpected HTTP status; retrying may help.
    RequestFailed,
    /// The portal answered with something other than JSON.
    NotJson,
}

/// Result of one submission. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub success: bool,
    /// Raw portal `flag`, when one was returned.
    pub flag: Option<String>,
    /// Portal message verbatim, or a diagnostic for non-portal failures.
    pub message: String,
    pub outcome: SelectionOutcome,
}

impl SelectionResult {
    pub fn failure(outcome: SelectionOutcome, message: impl Into<String>) -> Self {
        Self {
            success: false,
            flag: None,
            message: message.into(),
            outcome,
        }
    }

    /// The portal's refusal as an error, when the portal refused.
    pub fn rejection(&self) -> Option<PortalError> {
        (self.outcome == SelectionOutcome::Rejected).then(|| PortalError::SelectionRejected {
            flag: self.flag.clone().unwrap_or_else(|| "none".to_string()),
            message: self.message.clone(),
        })
    }
}
