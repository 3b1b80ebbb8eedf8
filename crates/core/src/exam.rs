use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::student::{CourseId, StudentId};

/// Points a single question can carry, or a student earned on it.
pub type Score = u32;

/// Lowest total that passes an exam.
pub const PASS_MARK: Score = 50;

/// Sum of a score row, widened so misread digit lines cannot overflow it.
pub fn score_sum(scores: &[Score]) -> u64 {
    scores.iter().map(|&s| u64::from(s)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExamId(pub i64);

impl fmt::Display for ExamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Semester {
    Guz,
    Bahar,
}

impl Semester {
    pub fn code(self) -> &'static str {
        match self {
            Semester::Guz => "GUZ",
            Semester::Bahar => "BAHAR",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Semester::Guz => "Güz",
            Semester::Bahar => "Bahar",
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Semester {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GUZ" | "GÜZ" => Ok(Semester::Guz),
            "BAHAR" => Ok(Semester::Bahar),
            other => Err(format!("Unknown semester: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExamType {
    Vize,
    Final,
    Butunleme,
    Mazeret,
}

impl ExamType {
    pub fn code(self) -> &'static str {
        match self {
            ExamType::Vize => "VIZE",
            ExamType::Final => "FINAL",
            ExamType::Butunleme => "BUTUNLEME",
            ExamType::Mazeret => "MAZERET",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExamType::Vize => "Vize",
            ExamType::Final => "Final",
            ExamType::Butunleme => "Bütünleme",
            ExamType::Mazeret => "Mazeret",
        }
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for ExamType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VIZE" => Ok(ExamType::Vize),
            "FINAL" => Ok(ExamType::Final),
            "BUTUNLEME" | "BÜTÜNLEME" => Ok(ExamType::Butunleme),
            "MAZERET" => Ok(ExamType::Mazeret),
            other => Err(format!("Unknown exam type: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradingError {
    #[error("Question scores must not be empty")]
    EmptyQuestionScores,
    #[error("Question scores must total 100, got {0}")]
    QuestionTotal(u64),
    #[error("Total score cannot be negative: {0}")]
    NegativeTotal(Decimal),
    #[error("Total score {total} does not match the sum of question scores {sum}")]
    TotalMismatch { total: Decimal, sum: u64 },
    #[error("Expected {expected} question scores, got {got}")]
    QuestionCount { expected: usize, got: usize },
    #[error("Contribution percentage must be within 1..=100, got {0}")]
    Contribution(u32),
    #[error("Outcome contributions for this exam would reach {0}%, limit is 100%")]
    ContributionOverflow(u32),
    #[error("Question {question} does not exist, exam has {count} questions")]
    QuestionOutOfRange { question: u32, count: usize },
}

/// Checks the per-question maximum scores an exam is graded against.
pub fn validate_question_scores(scores: &[Score]) -> Result<(), GradingError> {
    if scores.is_empty() {
        return Err(GradingError::EmptyQuestionScores);
    }
    let total = score_sum(scores);
    if total != 100 {
        return Err(GradingError::QuestionTotal(total));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: Option<ExamId>,
    pub course_id: CourseId,
    pub semester: Semester,
    pub exam_type: ExamType,
    pub exam_date: NaiveDate,
    pub question_count: usize,
    pub question_scores: Option<Vec<Score>>,
}

impl Exam {
    pub fn new(
        course_id: CourseId,
        semester: Semester,
        exam_type: ExamType,
        exam_date: NaiveDate,
    ) -> Self {
        Exam {
            id: None,
            course_id,
            semester,
            exam_type,
            exam_date,
            question_count: 0,
            question_scores: None,
        }
    }

    /// Fixes the question layout of the exam. The scores must pass
    /// [`validate_question_scores`]; the question count follows from them.
    pub fn set_question_scores(&mut self, scores: Vec<Score>) -> Result<(), GradingError> {
        validate_question_scores(&scores)?;
        self.question_count = scores.len();
        self.question_scores = Some(scores);
        Ok(())
    }
}

/// A student's per-question scores before they are checked against the exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnvalidatedResult {
    pub student_id: StudentId,
    pub total_score: Decimal,
    pub question_scores: Vec<Score>,
}

impl UnvalidatedResult {
    /// Builds a result whose total is the plain sum of the question scores.
    pub fn from_scores(student_id: StudentId, question_scores: Vec<Score>) -> Self {
        let sum = score_sum(&question_scores);
        UnvalidatedResult {
            student_id,
            total_score: Decimal::from(sum),
            question_scores,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: Option<i64>,
    pub exam_id: ExamId,
    pub student_id: StudentId,
    pub total_score: Decimal,
    pub question_scores: Vec<Score>,
    pub is_passed: bool,
}

impl ExamResult {
    pub fn validate(exam: &Exam, result: UnvalidatedResult) -> Result<ExamResult, GradingError> {
        if result.total_score < Decimal::ZERO {
            return Err(GradingError::NegativeTotal(result.total_score));
        }

        let sum = score_sum(&result.question_scores);
        if (result.total_score - Decimal::from(sum)).abs() > Decimal::new(1, 2) {
            return Err(GradingError::TotalMismatch {
                total: result.total_score,
                sum,
            });
        }

        if result.question_scores.len() != exam.question_count {
            return Err(GradingError::QuestionCount {
                expected: exam.question_count,
                got: result.question_scores.len(),
            });
        }

        Ok(ExamResult {
            id: None,
            exam_id: exam.id.unwrap_or(ExamId(0)),
            student_id: result.student_id,
            is_passed: result.total_score >= Decimal::from(PASS_MARK),
            total_score: result.total_score.round_dp(2),
            question_scores: result.question_scores,
        })
    }

    /// Per-question success rate in percent, rounded to 2 places.
    /// Questions with a zero maximum report 0.
    pub fn success_rates(&self, max_scores: &[Score]) -> Vec<Decimal> {
        self.question_scores
            .iter()
            .zip(max_scores)
            .map(|(&earned, &max)| percentage(earned, max))
            .collect()
    }
}

pub(crate) fn percentage(part: Score, whole: Score) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) / Decimal::from(whole) * Decimal::ONE_HUNDRED).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn exam_with(scores: Vec<Score>) -> Exam {
        let mut exam = Exam::new(
            CourseId(1),
            Semester::Guz,
            ExamType::Vize,
            NaiveDate::from_ymd_opt(2024, 11, 12).unwrap(),
        );
        exam.id = Some(ExamId(7));
        exam.set_question_scores(scores).unwrap();
        exam
    }

    #[test]
    fn question_scores_must_total_100() {
        assert!(validate_question_scores(&[40, 60]).is_ok());
        assert_eq!(
            validate_question_scores(&[40, 50]),
            Err(GradingError::QuestionTotal(90))
        );
        assert_eq!(
            validate_question_scores(&[]),
            Err(GradingError::EmptyQuestionScores)
        );
    }

    #[test]
    fn question_total_of_huge_scores_is_reported_not_overflowed() {
        assert_eq!(
            validate_question_scores(&[u32::MAX, u32::MAX]),
            Err(GradingError::QuestionTotal(2 * u64::from(u32::MAX)))
        );
        assert_eq!(score_sum(&[4_000_000_000, 4_000_000_000]), 8_000_000_000);
    }

    #[test]
    fn set_question_scores_updates_count() {
        let exam = exam_with(vec![20, 30, 50]);
        assert_eq!(exam.question_count, 3);
        assert_eq!(exam.question_scores, Some(vec![20, 30, 50]));
    }

    #[test]
    fn result_validates_against_exam() {
        let exam = exam_with(vec![40, 60]);
        let ok = ExamResult::validate(&exam, UnvalidatedResult::from_scores(StudentId(3), vec![35, 50]))
            .unwrap();
        assert_eq!(ok.total_score, Decimal::from(85));
        assert_eq!(ok.exam_id, ExamId(7));
        assert!(ok.is_passed);

        let failed =
            ExamResult::validate(&exam, UnvalidatedResult::from_scores(StudentId(4), vec![20, 29]))
                .unwrap();
        assert!(!failed.is_passed);
    }

    #[test]
    fn result_rejects_wrong_question_count() {
        let exam = exam_with(vec![40, 60]);
        let err = ExamResult::validate(&exam, UnvalidatedResult::from_scores(StudentId(3), vec![35]))
            .unwrap_err();
        assert_eq!(err, GradingError::QuestionCount { expected: 2, got: 1 });
    }

    #[test]
    fn result_rejects_total_mismatch() {
        let exam = exam_with(vec![40, 60]);
        let input = UnvalidatedResult {
            student_id: StudentId(3),
            total_score: Decimal::from(90),
            question_scores: vec![35, 50],
        };
        assert!(matches!(
            ExamResult::validate(&exam, input),
            Err(GradingError::TotalMismatch { sum: 85, .. })
        ));
    }

    #[test]
    fn result_rejects_negative_total() {
        let exam = exam_with(vec![40, 60]);
        let input = UnvalidatedResult {
            student_id: StudentId(3),
            total_score: Decimal::from(-5),
            question_scores: vec![0, 0],
        };
        assert!(matches!(
            ExamResult::validate(&exam, input),
            Err(GradingError::NegativeTotal(_))
        ));
    }

    #[test]
    fn success_rates_per_question() {
        let exam = exam_with(vec![40, 60]);
        let result = ExamResult::validate(&exam, UnvalidatedResult::from_scores(StudentId(3), vec![10, 20]))
            .unwrap();
        let rates = result.success_rates(&[40, 60]);
        assert_eq!(rates, vec![Decimal::from(25), Decimal::from_str("33.33").unwrap()]);
    }

    #[test]
    fn zero_max_reports_zero_rate() {
        assert_eq!(percentage(5, 0), Decimal::ZERO);
    }

    #[test]
    fn semester_and_exam_type_roundtrip() {
        assert_eq!(Semester::from_str(&Semester::Bahar.to_string()).unwrap(), Semester::Bahar);
        assert_eq!(Semester::from_str("güz").unwrap(), Semester::Guz);
        assert_eq!(ExamType::from_str("butunleme").unwrap(), ExamType::Butunleme);
        assert!(ExamType::from_str("quiz").is_err());
        assert_eq!(ExamType::Butunleme.label(), "Bütünleme");
    }
}
