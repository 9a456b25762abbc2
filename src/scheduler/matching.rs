//! Keyword scoring for scheduled grabs.
//!
//! Keywords and course text are normalized the same way (lowercased, NFKD,
//! combining marks and punctuation dropped) before comparison, so "高等数学（A）"
//! and "高等数学a" compare equal and accents never block a match.

use crate::portal::CourseRecord;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Candidates must score above this to be submitted.
pub const MIN_SCORE: f32 = 0.5;

/// Lowercase, decompose, and keep only alphanumeric non-combining characters.
pub fn normalize_for_matching(s: &str) -> String {
    s.to_lowercase()
        .nfkd()
        .filter(|c| c.is_alphanumeric() && !is_combining_mark(*c))
        .collect()
}

/// Similarity of `keyword` to `text` in `0.0..=1.0`.
///
/// Exact matches score 1.0. A keyword contained in the text scores between 0.7
/// and 1.0 depending on how much of the text it covers. Text contained in a
/// longer keyword scores between 0.55 and 0.7, but only when it covers more
/// than half of the keyword. Anything else falls back to a character-bigram
/// Dice coefficient, scaled below the substring band.
pub fn similarity(keyword: &str, text: &str) -> f32 {
    let keyword = normalize_for_matching(keyword);
    let text = normalize_for_matching(text);
    if keyword.is_empty() || text.is_empty() {
        return 0.0;
    }
    if keyword == text {
        return 1.0;
    }

    let keyword_len = keyword.chars().count() as f32;
    let text_len = text.chars().count() as f32;

    if text.contains(&keyword) {
        return 0.7 + 0.3 * (keyword_len / text_len);
    }
    let coverage = text_len / keyword_len;
    if coverage > 0.5 && keyword.contains(&text) {
        return 0.4 + 0.3 * coverage;
    }
    0.69 * dice_coefficient(&keyword, &text)
}

fn bigrams(s: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn dice_coefficient(a: &str, b: &str) -> f32 {
    let (a, b) = (bigrams(a), bigrams(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    (2 * shared) as f32 / (a.len() + b.len()) as f32
}

/// Best score of one keyword against a record's name, class name, course id
/// and instructor. Secondary fields are discounted so a name hit wins.
fn score_keyword(keyword: &str, record: &CourseRecord) -> f32 {
    if record.course_id.eq_ignore_ascii_case(keyword.trim()) {
        return 1.0;
    }
    let mut best = similarity(keyword, &record.name);
    if let Some(class_name) = &record.class_name {
        best = best.max(0.95 * similarity(keyword, class_name));
    }
    if let Some(instructor) = &record.instructor {
        best = best.max(0.9 * similarity(keyword, instructor));
    }
    best
}

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub record: &'a CourseRecord,
    pub score: f32,
    /// Index of the keyword that produced the score; lower is preferred.
    pub keyword_index: usize,
}

/// Highest-scoring record strictly above [`MIN_SCORE`].
///
/// Ties go to the earlier keyword, then to the record with more seats left,
/// then to listing order. With `skip_full`, full sections are not candidates.
pub fn best_candidate<'a>(
    records: &'a [CourseRecord],
    keywords: &[String],
    skip_full: bool,
) -> Option<Candidate<'a>> {
    let mut best: Option<Candidate<'a>> = None;

    for record in records {
        if skip_full && record.is_full() {
            continue;
        }
        for (keyword_index, keyword) in keywords.iter().enumerate() {
            let score = score_keyword(keyword, record);
            if !clears_threshold(score) {
                continue;
            }
            let candidate = Candidate { record, score, keyword_index };
            if best.is_none_or(|current| outranks(&candidate, &current)) {
                best = Some(candidate);
            }
        }
    }
    best
}

fn clears_threshold(score: f32) -> bool {
    score > MIN_SCORE
}

fn outranks(a: &Candidate<'_>, b: &Candidate<'_>) -> bool {
    if a.score != b.score {
        return a.score > b.score;
    }
    if a.keyword_index != b.keyword_index {
        return a.keyword_index < b.keyword_index;
    }
    a.record.seats_left().unwrap_or(0) > b.record.seats_left().unwrap_or(0)
}
