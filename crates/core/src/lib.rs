pub mod config;
pub mod exam;
pub mod outcome;
pub mod stats;
pub mod student;

pub use config::{ConfigError, ExamscanConfig, OcrConfig, RowRoles};
pub use exam::{
    score_sum, validate_question_scores, Exam, ExamId, ExamResult, ExamType, GradingError, Score,
    Semester, UnvalidatedResult, PASS_MARK,
};
pub use outcome::{outcome_achievement, CourseOutcome, OutcomeAchievement, OutcomeId, QuestionOutcome};
pub use stats::{question_statistics, student_success_rates, ExamStatistics, QuestionStatistics};
pub use student::{Course, CourseId, Department, Lecturer, LecturerId, Student, StudentId, UserAction};
