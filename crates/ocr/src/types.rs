use chrono::NaiveDate;
use examscan_core::{score_sum, Score};
use serde::{Deserialize, Serialize};

/// Name reported when the identity block could not be read.
pub const UNKNOWN_STUDENT_NAME: &str = "Bilinmiyor";

/// Structured data recovered from one scanned exam page.
///
/// Built fresh per page and handed straight to the caller; fields the
/// extractor could not read are `None` (or empty for the score rows).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Digits only, at most 8 of them.
    pub student_number: Option<String>,
    pub student_name: String,
    pub exam_date: Option<NaiveDate>,
    /// Maximum points per question.
    pub question_scores: Vec<Score>,
    /// Points the student earned per question.
    pub student_scores: Vec<Score>,
    pub course_code: String,
    pub semester: String,
}

impl ExtractionResult {
    pub fn has_identity(&self) -> bool {
        self.student_number.is_some()
    }

    pub fn has_scores(&self) -> bool {
        !self.question_scores.is_empty() && self.question_scores.len() == self.student_scores.len()
    }

    pub fn student_total(&self) -> u64 {
        score_sum(&self.student_scores)
    }
}

/// Name and number read from the identity block of the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdentity {
    pub name: String,
    pub number: Option<String>,
}

impl Default for StudentIdentity {
    fn default() -> Self {
        Self { name: UNKNOWN_STUDENT_NAME.to_string(), number: None }
    }
}

/// The score table as reconstructed from the transcript, before any row is
/// given a meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTable {
    /// Question header lines in order, followed by the total column.
    pub headers: Vec<String>,
    /// Complete rows, each `headers.len()` wide.
    pub rows: Vec<Vec<Score>>,
    /// Digit lines that did not fill a final row.
    pub leftover: Vec<Score>,
}

impl ScoreTable {
    pub fn question_count(&self) -> usize {
        self.headers.len().saturating_sub(1)
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExtractionResult {
        ExtractionResult {
            student_number: Some("21253501".into()),
            student_name: "Jane Doe".into(),
            exam_date: NaiveDate::from_ymd_opt(2024, 11, 12),
            question_scores: vec![40, 60],
            student_scores: vec![35, 50],
            course_code: "BIL101".into(),
            semester: "GUZ".into(),
        }
    }

    #[test]
    fn serializes_with_flat_keys_and_iso_date() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["student_number"], "21253501");
        assert_eq!(json["exam_date"], "2024-11-12");
        assert_eq!(json["question_scores"], serde_json::json!([40, 60]));
        assert_eq!(json["semester"], "GUZ");
        assert_eq!(json.as_object().unwrap().len(), 7);
    }

    #[test]
    fn unresolved_fields_serialize_as_null() {
        let r = ExtractionResult {
            student_number: None,
            exam_date: None,
            ..sample()
        };
        let json = serde_json::to_value(r).unwrap();
        assert!(json["student_number"].is_null());
        assert!(json["exam_date"].is_null());
    }

    #[test]
    fn score_helpers() {
        let r = sample();
        assert!(r.has_identity());
        assert!(r.has_scores());
        assert_eq!(r.student_total(), 85);

        let empty = ExtractionResult { question_scores: vec![], student_scores: vec![], ..r };
        assert!(!empty.has_scores());
    }

    #[test]
    fn default_identity_is_unknown() {
        let id = StudentIdentity::default();
        assert_eq!(id.name, UNKNOWN_STUDENT_NAME);
        assert!(id.number.is_none());
    }
}
