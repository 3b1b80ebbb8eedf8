use std::sync::OnceLock;

use chrono::NaiveDate;
use examscan_core::{score_sum, RowRoles, Score};
use regex::Regex;
use thiserror::Error;

use crate::types::{ExtractionResult, ScoreTable, StudentIdentity, UNKNOWN_STUDENT_NAME};

/// Student numbers are this many digits; anything after is OCR noise.
pub const STUDENT_NUMBER_DIGITS: usize = 8;

/// Expected total of the question maximum scores.
pub const FULL_MARKS: Score = 100;

const QUESTION_LABEL: &str = "soru";
const TOTAL_LABEL: &str = "Toplam";

/// Glyphs the recognizer consistently gets wrong on these sheets.
const OCR_REPAIRS: &[(&str, &str)] = &[("§", "g"), ("O§", "Og"), ("é", "")];

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// Name label, free text, then the number label and digits, across lines.
re!(re_identity,
    r"(?is)Ad\s*Soyad:?\s*([\w\sçöşğüıÇÖŞĞÜİ-]+).*?(?:Ogrenci|Öğrenci|Ögrenci)\s*No:?\s*([0-9]+(?:\s*[0-9]+)*)");
re!(re_date,
    r"([0-9]{2})\.([0-9]{2})\.([0-9]{4})");
re!(re_split_question_one,
    r"(?i)\bSorul\b");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// Digit lines were found under the header but never filled two rows,
    /// which is what a table printed without its total column looks like.
    #[error("Malformed score row: expected {expected} values per row, found {found} digit lines")]
    MalformedRow { expected: usize, found: usize },
}

// ── Public extraction API ─────────────────────────────────────────────────────

/// Turns an exam-sheet transcript into an [`ExtractionResult`].
///
/// Every step is tolerant: a field that cannot be read is left unresolved
/// and the remaining fields are still extracted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreExtractor {
    roles: RowRoles,
}

impl ScoreExtractor {
    pub fn new(roles: RowRoles) -> Self {
        Self { roles }
    }

    pub fn extract(&self, transcript: &str, course_code: &str, semester: &str) -> ExtractionResult {
        let text = repair_text(transcript);

        let identity = extract_identity(&text);
        match &identity.number {
            Some(number) => tracing::info!("Found student number: {number}"),
            None => tracing::warn!("No student identity block found in transcript"),
        }

        let exam_date = extract_exam_date(&text);

        let (question_scores, student_scores) = match self.score_rows(&text) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Score table unreadable: {e}");
                (vec![], vec![])
            }
        };
        tracing::debug!(?question_scores, ?student_scores, "Score rows");

        if !question_scores.is_empty() {
            let total = score_sum(&question_scores);
            if total != u64::from(FULL_MARKS) {
                tracing::warn!("Question scores add up to {total}, not {FULL_MARKS}");
            }
        }

        ExtractionResult {
            student_number: identity.number,
            student_name: identity.name,
            exam_date,
            question_scores,
            student_scores,
            course_code: course_code.to_string(),
            semester: semester.to_string(),
        }
    }

    /// Maximum and earned scores, with the total column dropped. Both are
    /// empty when the transcript has no score table or too few rows.
    pub fn score_rows(&self, text: &str) -> Result<(Vec<Score>, Vec<Score>), ExtractError> {
        match score_table(text) {
            Some(table) => self.interpret(&table),
            None => Ok((vec![], vec![])),
        }
    }

    /// Assigns meaning to the reconstructed rows according to the configured
    /// [`RowRoles`].
    pub fn interpret(&self, table: &ScoreTable) -> Result<(Vec<Score>, Vec<Score>), ExtractError> {
        let needed = self.roles.max_row.max(self.roles.earned_row) + 1;
        if table.rows.len() < needed {
            if table.rows.len() < 2 && !table.leftover.is_empty() {
                return Err(ExtractError::MalformedRow {
                    expected: table.width(),
                    found: table.rows.len() * table.width() + table.leftover.len(),
                });
            }
            return Ok((vec![], vec![]));
        }

        let without_total = |row: &[Score]| row[..row.len() - 1].to_vec();
        Ok((
            without_total(&table.rows[self.roles.max_row]),
            without_total(&table.rows[self.roles.earned_row]),
        ))
    }
}

// ── Text repair ───────────────────────────────────────────────────────────────

pub fn repair_text(text: &str) -> String {
    OCR_REPAIRS
        .iter()
        .fold(text.to_string(), |acc, (wrong, right)| acc.replace(wrong, right))
}

// ── Identity ──────────────────────────────────────────────────────────────────

pub fn extract_identity(text: &str) -> StudentIdentity {
    let Some(c) = re_identity().captures(text) else {
        return StudentIdentity::default();
    };

    let name = c.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let number: String = c
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .take(STUDENT_NUMBER_DIGITS)
        .collect();

    StudentIdentity {
        name: if name.is_empty() { UNKNOWN_STUDENT_NAME.to_string() } else { name.to_string() },
        number: Some(number),
    }
}

// ── Date ──────────────────────────────────────────────────────────────────────

/// First `DD.MM.YYYY` in the text. A match that is not a real date leaves
/// the date unresolved.
pub fn extract_exam_date(text: &str) -> Option<NaiveDate> {
    let c = re_date().captures(text)?;
    let day: u32 = c.get(1)?.as_str().parse().ok()?;
    let month: u32 = c.get(2)?.as_str().parse().ok()?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ── Score table ───────────────────────────────────────────────────────────────

fn clean_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| re_split_question_one().replace_all(line, "Soru1").trim().to_string())
        .collect()
}

/// A line of ASCII digits as a score. Lines too long for [`Score`] are
/// not scores and are skipped, so later values move up to fill the row.
fn parse_score_line(line: &str) -> Option<Score> {
    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    line.parse().ok()
}

/// Finds the question header block and rebuilds the score rows printed
/// under it. `None` when there is no total column or no question header.
pub fn score_table(text: &str) -> Option<ScoreTable> {
    let lines = clean_lines(text);

    let mut headers = Vec::new();
    let mut header_end = None;
    for (i, line) in lines.iter().enumerate() {
        if line.to_lowercase().starts_with(QUESTION_LABEL) {
            headers.push(line.clone());
        }
        if line.contains(TOTAL_LABEL) {
            headers.push(TOTAL_LABEL.to_string());
            header_end = Some(i);
            break;
        }
    }

    let header_end = header_end?;
    if headers.len() < 2 {
        return None;
    }
    tracing::debug!(?headers, "Score table header");

    // The scan often splits one printed row into one number per line.
    let width = headers.len();
    let mut rows = Vec::new();
    let mut current = Vec::with_capacity(width);
    for score in lines[header_end + 1..].iter().filter_map(|l| parse_score_line(l)) {
        current.push(score);
        if current.len() == width {
            rows.push(std::mem::replace(&mut current, Vec::with_capacity(width)));
        }
    }

    Some(ScoreTable { headers, rows, leftover: current })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
