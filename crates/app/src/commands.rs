use chrono::NaiveDate;
use examscan_core::{
    outcome_achievement, question_statistics, student_success_rates, Course, CourseOutcome, Exam,
    ExamId, ExamResult, ExamStatistics, ExamType, OutcomeAchievement, OutcomeId, QuestionOutcome,
    QuestionStatistics, Score, Semester, Student, StudentId, UnvalidatedResult, UserAction,
};
use examscan_import::{unprocessed_students, MatchType, StudentMatcher};
use examscan_ocr::pipeline::spawn_intake_watcher;
use examscan_ocr::{ExamPipeline, OcrBackend};
use examscan_storage::{ExamPaperRecord, UserLogEntry};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::AppState;

const MAX_OUTCOME_DESCRIPTION: usize = 500;

/// Time given to a copy into the intake folder to finish before it is read.
const INTAKE_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    fn new(message: impl Into<String>) -> Self {
        CommandError { message: message.into() }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<sqlx::Error> for CommandError {
    fn from(e: sqlx::Error) -> Self {
        CommandError { message: e.to_string() }
    }
}

impl From<examscan_core::GradingError> for CommandError {
    fn from(e: examscan_core::GradingError) -> Self {
        CommandError { message: e.to_string() }
    }
}

impl From<examscan_import::RosterError> for CommandError {
    fn from(e: examscan_import::RosterError) -> Self {
        CommandError { message: e.to_string() }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        CommandError { message: e.to_string() }
    }
}

async fn course_by_code(state: &AppState, code: &str) -> Result<Course, CommandError> {
    examscan_storage::get_course_by_code(&state.db, code)
        .await?
        .ok_or_else(|| CommandError::new(format!("Course not found: {code}")))
}

async fn exam_by_id(state: &AppState, id: i64) -> Result<Exam, CommandError> {
    examscan_storage::get_exam(&state.db, ExamId(id))
        .await?
        .ok_or_else(|| CommandError::new(format!("Exam not found: {id}")))
}

async fn log(state: &AppState, action: UserAction, details: &str) -> Result<(), CommandError> {
    examscan_storage::log_action(&state.db, state.lecturer_id, action, details).await?;
    Ok(())
}

// ── Courses and rosters ───────────────────────────────────────────────────────

pub async fn add_course(state: &AppState, code: &str, name: &str) -> Result<Course, CommandError> {
    let mut course = Course::new(code, name);
    course.lecturer_id = Some(state.lecturer_id);
    course.id = Some(examscan_storage::upsert_course(&state.db, &course).await?);
    tracing::info!("Saved course {course}");
    Ok(course)
}

#[derive(Debug, Serialize)]
pub struct RosterImport {
    pub course_code: String,
    pub students: usize,
    pub new_students: usize,
}

pub async fn import_roster(
    state: &AppState,
    course_code: &str,
    path: &Path,
) -> Result<RosterImport, CommandError> {
    let course = course_by_code(state, course_code).await?;
    let course_id = course.id.ok_or_else(|| CommandError::new("Course has no id"))?;

    let file = std::fs::File::open(path)?;
    let students = examscan_import::import_roster(file)?;

    let mut new_students = 0;
    for student in &students {
        if examscan_storage::get_student_by_number(&state.db, &student.student_number)
            .await?
            .is_none()
        {
            new_students += 1;
        }
        let id = examscan_storage::upsert_student(&state.db, student).await?;
        examscan_storage::enroll_student(&state.db, course_id, id).await?;
    }

    if new_students > 0 {
        log(
            state,
            UserAction::StudentAdd,
            &format!("{new_students} new students added to {}", course.code),
        )
        .await?;
    }

    Ok(RosterImport { course_code: course.code, students: students.len(), new_students })
}

// ── Exam upload ───────────────────────────────────────────────────────────────

/// Which exam a batch of papers belongs to. The exam is created on first use.
#[derive(Debug, Clone)]
pub struct ExamTarget {
    pub course_code: String,
    pub semester: Semester,
    pub exam_type: ExamType,
    pub exam_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct FailedPaper {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub exam_id: i64,
    pub question_scores: Option<Vec<Score>>,
    pub processed: usize,
    pub duplicates: usize,
    pub failed: Vec<FailedPaper>,
    /// Roster students without a readable paper, for manual entry.
    pub unprocessed_students: Vec<String>,
}

enum PaperOutcome {
    Graded { student_number: String, duplicate: bool },
    Failed(String),
}

async fn open_exam(state: &AppState, target: &ExamTarget) -> Result<(Course, Exam), CommandError> {
    let course = course_by_code(state, &target.course_code).await?;
    let course_id = course.id.ok_or_else(|| CommandError::new("Course has no id"))?;

    if let Some(exam) =
        examscan_storage::find_exam(&state.db, course_id, target.semester, target.exam_type).await?
    {
        tracing::info!("Adding papers to existing exam {}", exam.id.map_or(0, |id| id.0));
        return Ok((course, exam));
    }

    let date = target
        .exam_date
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let mut exam = Exam::new(course_id, target.semester, target.exam_type, date);
    exam.id = Some(examscan_storage::create_exam(&state.db, &exam).await?);
    tracing::info!(
        "Created {} {} exam for {}",
        target.semester.label(),
        target.exam_type.label(),
        course.code
    );
    Ok((course, exam))
}

/// Runs one paper through OCR, fixes the exam layout from the first paper
/// that has one, and stores the result for the matched student.
async fn grade_paper<R: OcrBackend>(
    state: &AppState,
    pipeline: &ExamPipeline<R>,
    course: &Course,
    exam: &mut Exam,
    roster: &[Student],
    path: &Path,
) -> Result<PaperOutcome, CommandError> {
    let exam_id = exam.id.ok_or_else(|| CommandError::new("Exam has no id"))?;

    let paper = match pipeline
        .try_process_file(path, &course.code, exam.semester.code())
        .await
    {
        Ok(paper) => paper,
        Err(e) => {
            tracing::error!("Failed to process {}: {e}", path.display());
            return Ok(PaperOutcome::Failed(e.to_string()));
        }
    };
    let extraction = &paper.extraction;

    if exam.question_scores.is_none() && !extraction.question_scores.is_empty() {
        exam.set_question_scores(extraction.question_scores.clone())?;
        examscan_storage::update_exam_question_scores(&state.db, exam).await?;
        tracing::info!("Exam question scores set to {:?}", extraction.question_scores);
    }

    if !extraction.has_identity() {
        return Ok(PaperOutcome::Failed("student number unreadable".to_string()));
    }
    let number = extraction.student_number.as_deref().unwrap_or_default();
    let matched = StudentMatcher::new(roster).find_match(Some(number));
    let Some(student) = matched.student else {
        return Ok(PaperOutcome::Failed(format!("student number {number} is not on the roster")));
    };
    let student_id = student
        .id
        .ok_or_else(|| CommandError::new("Roster student has no id"))?;

    // A near miss never replaces a result already recorded for that student.
    if let MatchType::Fuzzy { .. } = matched.match_type {
        if examscan_storage::get_exam_result(&state.db, exam_id, student_id)
            .await?
            .is_some()
        {
            return Ok(PaperOutcome::Failed(format!(
                "student number {number} was read as {}, who already has a result; enter it manually",
                student.student_number
            )));
        }
    }

    if !extraction.has_scores() {
        return Ok(PaperOutcome::Failed(format!(
            "{}: score table unreadable",
            student.student_number
        )));
    }
    let unvalidated = UnvalidatedResult {
        student_id,
        total_score: Decimal::from(extraction.student_total()),
        question_scores: extraction.student_scores.clone(),
    };
    let result = match ExamResult::validate(exam, unvalidated) {
        Ok(result) => result,
        Err(e) => return Ok(PaperOutcome::Failed(format!("{}: {e}", student.student_number))),
    };
    examscan_storage::save_exam_result(&state.db, &result).await?;

    examscan_storage::insert_exam_paper(
        &state.db,
        &ExamPaperRecord {
            id: None,
            exam_id,
            student_id: Some(student_id),
            file_path: paper.paper_path.display().to_string(),
            content_hash: paper.digest.clone(),
            uploaded_at: None,
        },
    )
    .await?;

    Ok(PaperOutcome::Graded {
        student_number: student.student_number.clone(),
        duplicate: paper.duplicate,
    })
}

/// Grades a batch of papers for one exam. A failure that stops the whole
/// batch is recorded in the audit log before it is returned.
pub async fn upload_exam<R: OcrBackend>(
    state: &AppState,
    pipeline: &ExamPipeline<R>,
    target: &ExamTarget,
    files: &[PathBuf],
) -> Result<UploadSummary, CommandError> {
    let outcome = grade_batch(state, pipeline, target, files).await;
    if let Err(e) = &outcome {
        if let Err(log_err) = log(state, UserAction::Error, &format!("Exam upload failed: {e}")).await {
            tracing::error!("Failed to record upload error: {log_err}");
        }
    }
    outcome
}

async fn grade_batch<R: OcrBackend>(
    state: &AppState,
    pipeline: &ExamPipeline<R>,
    target: &ExamTarget,
    files: &[PathBuf],
) -> Result<UploadSummary, CommandError> {
    if files.is_empty() {
        return Err(CommandError::new("No exam files given"));
    }

    let (course, mut exam) = open_exam(state, target).await?;
    let course_id = course.id.ok_or_else(|| CommandError::new("Course has no id"))?;
    let roster = examscan_storage::get_course_students(&state.db, course_id).await?;
    if roster.is_empty() {
        tracing::warn!("Course {} has no enrolled students", course.code);
    }

    log(
        state,
        UserAction::ExamUpload,
        &format!("{} files uploaded for {} {}", files.len(), course.code, exam.exam_type.code()),
    )
    .await?;

    let mut processed = Vec::new();
    let mut duplicates = 0;
    let mut failed = Vec::new();

    for path in files {
        match grade_paper(state, pipeline, &course, &mut exam, &roster, path).await? {
            PaperOutcome::Graded { student_number, duplicate } => {
                duplicates += usize::from(duplicate);
                processed.push(student_number);
            }
            PaperOutcome::Failed(reason) => {
                tracing::warn!("{}: {reason}", path.display());
                failed.push(FailedPaper { file: path.display().to_string(), reason });
            }
        }
    }

    let unprocessed: Vec<String> = unprocessed_students(&roster, &processed)
        .into_iter()
        .map(|s| s.student_number.clone())
        .collect();

    let mut details = format!("{} papers processed for {}", processed.len(), course.code);
    if !failed.is_empty() {
        details.push_str(&format!(", {} papers failed", failed.len()));
    }
    log(state, UserAction::ExamProcess, &details).await?;

    Ok(UploadSummary {
        exam_id: exam.id.map_or(0, |id| id.0),
        question_scores: exam.question_scores.clone(),
        processed: processed.len(),
        duplicates,
        failed,
        unprocessed_students: unprocessed,
    })
}

/// Grades every paper dropped into `intake_dir` until interrupted.
pub async fn watch_intake<R: OcrBackend>(
    state: &AppState,
    pipeline: &ExamPipeline<R>,
    target: &ExamTarget,
    intake_dir: &Path,
) -> Result<(), CommandError> {
    let (course, mut exam) = open_exam(state, target).await?;
    let course_id = course.id.ok_or_else(|| CommandError::new("Course has no id"))?;
    let roster = examscan_storage::get_course_students(&state.db, course_id).await?;

    tokio::fs::create_dir_all(intake_dir).await?;
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = spawn_intake_watcher(intake_dir, tx)
        .map_err(|e| CommandError::new(format!("Failed to watch {}: {e}", intake_dir.display())))?;

    loop {
        let path = tokio::select! {
            next = rx.recv() => match next {
                Some(path) => path,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        tokio::time::sleep(INTAKE_SETTLE).await;
        match grade_paper(state, pipeline, &course, &mut exam, &roster, &path).await? {
            PaperOutcome::Graded { student_number, .. } => {
                log(
                    state,
                    UserAction::ExamProcess,
                    &format!("{student_number} graded for {} from intake", course.code),
                )
                .await?;
                tracing::info!("Graded {} for {student_number}", path.display());
            }
            PaperOutcome::Failed(reason) => tracing::warn!("{}: {reason}", path.display()),
        }
    }

    tracing::info!("Intake watcher stopped");
    Ok(())
}

// ── Listings and removal ──────────────────────────────────────────────────────

pub async fn list_courses(state: &AppState) -> Result<Vec<Course>, CommandError> {
    Ok(examscan_storage::get_all_courses(&state.db).await?)
}

pub async fn list_students(
    state: &AppState,
    search: Option<&str>,
) -> Result<Vec<Student>, CommandError> {
    Ok(examscan_storage::search_students(&state.db, search).await?)
}

#[derive(Debug, Serialize)]
pub struct ExamLine {
    pub exam_id: i64,
    pub course_code: String,
    pub semester: Semester,
    pub exam_type: ExamType,
    pub exam_date: NaiveDate,
    pub question_count: usize,
    pub results: usize,
}

/// Exams of one course, or of every course when `course_code` is `None`.
pub async fn list_exams(
    state: &AppState,
    course_code: Option<&str>,
) -> Result<Vec<ExamLine>, CommandError> {
    let courses = match course_code {
        Some(code) => vec![course_by_code(state, code).await?],
        None => examscan_storage::get_all_courses(&state.db).await?,
    };

    let mut lines = Vec::new();
    for course in courses {
        let Some(course_id) = course.id else { continue };
        for exam in examscan_storage::get_course_exams(&state.db, course_id).await? {
            let Some(id) = exam.id else { continue };
            let results = examscan_storage::get_exam_results(&state.db, id).await?.len();
            lines.push(ExamLine {
                exam_id: id.0,
                course_code: course.code.clone(),
                semester: exam.semester,
                exam_type: exam.exam_type,
                exam_date: exam.exam_date,
                question_count: exam.question_count,
                results,
            });
        }
    }
    Ok(lines)
}

/// Removes an exam together with its results and question mappings. The
/// stored paper files are kept; other exams may share them.
pub async fn delete_exam(state: &AppState, exam_id: i64) -> Result<Exam, CommandError> {
    let exam = exam_by_id(state, exam_id).await?;
    let course = examscan_storage::get_course(&state.db, exam.course_id)
        .await?
        .ok_or_else(|| CommandError::new("Exam course not found"))?;

    examscan_storage::delete_exam(&state.db, ExamId(exam_id)).await?;
    log(
        state,
        UserAction::ExamDelete,
        &format!("{} {} exam deleted", course.code, exam.exam_type.label()),
    )
    .await?;
    tracing::info!("Deleted exam {exam_id}");
    Ok(exam)
}

#[derive(Debug, Serialize)]
pub struct PaperLine {
    pub exam_id: i64,
    pub file_path: String,
    pub content_hash: String,
    pub uploaded_at: Option<chrono::NaiveDateTime>,
    /// Whether the stored copy is still on disk.
    pub available: bool,
}

async fn student_by_number(state: &AppState, student_number: &str) -> Result<StudentId, CommandError> {
    examscan_storage::get_student_by_number(&state.db, student_number)
        .await?
        .and_then(|s| s.id)
        .ok_or_else(|| CommandError::new(format!("Student not found: {student_number}")))
}

/// Graded papers of a student, newest first.
pub async fn student_papers(
    state: &AppState,
    student_number: &str,
) -> Result<Vec<PaperLine>, CommandError> {
    let student_id = student_by_number(state, student_number).await?;
    let papers = examscan_storage::get_student_papers(&state.db, student_id).await?;
    Ok(papers
        .into_iter()
        .map(|p| PaperLine {
            exam_id: p.exam_id.0,
            available: Path::new(&p.file_path).is_file(),
            file_path: p.file_path,
            content_hash: p.content_hash,
            uploaded_at: p.uploaded_at,
        })
        .collect())
}

/// Copies the student's most recent paper to `dest`. A directory `dest`
/// receives the file under its stored name.
pub async fn export_paper(
    state: &AppState,
    student_number: &str,
    dest: &Path,
) -> Result<PathBuf, CommandError> {
    let student_id = student_by_number(state, student_number).await?;
    let latest = examscan_storage::get_student_papers(&state.db, student_id)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CommandError::new(format!("No exam paper stored for {student_number}")))?;

    let source = PathBuf::from(&latest.file_path);
    if !source.is_file() {
        return Err(CommandError::new(format!(
            "Exam paper file is missing: {}",
            source.display()
        )));
    }
    let target = match source.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest.to_path_buf(),
    };
    tokio::fs::copy(&source, &target).await?;
    log(state, UserAction::ViewReport, &format!("Exam paper of {student_number} exported")).await?;
    Ok(target)
}

pub async fn audit_log(state: &AppState, limit: i64) -> Result<Vec<UserLogEntry>, CommandError> {
    Ok(examscan_storage::get_user_logs(&state.db, state.lecturer_id, limit).await?)
}

// ── Manual results ────────────────────────────────────────────────────────────

/// Records a result by hand, for papers the OCR could not read.
pub async fn add_result(
    state: &AppState,
    exam_id: i64,
    student_number: &str,
    scores: Vec<Score>,
) -> Result<ExamResult, CommandError> {
    let exam = exam_by_id(state, exam_id).await?;
    if exam.question_scores.is_none() {
        return Err(CommandError::new(
            "Exam question scores are not set yet; upload at least one paper first",
        ));
    }
    let student = examscan_storage::get_student_by_number(&state.db, student_number)
        .await?
        .ok_or_else(|| CommandError::new(format!("Student not found: {student_number}")))?;
    let student_id = student.id.ok_or_else(|| CommandError::new("Student has no id"))?;

    let mut result = ExamResult::validate(&exam, UnvalidatedResult::from_scores(student_id, scores))?;
    result.id = Some(examscan_storage::save_exam_result(&state.db, &result).await?);

    log(
        state,
        UserAction::ExamResultManual,
        &format!("Manual result for {student} on exam {exam_id}"),
    )
    .await?;
    Ok(result)
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ResultLine {
    pub student_number: String,
    pub full_name: String,
    pub total_score: Decimal,
    pub question_scores: Vec<Score>,
    pub success_rates: Vec<Decimal>,
    pub is_passed: bool,
}

#[derive(Debug, Serialize)]
pub struct ExamReport {
    pub course_code: String,
    pub exam: Exam,
    pub statistics: Option<ExamStatistics>,
    pub questions: Vec<QuestionStatistics>,
    pub results: Vec<ResultLine>,
}

pub async fn exam_report(state: &AppState, exam_id: i64) -> Result<ExamReport, CommandError> {
    let exam = exam_by_id(state, exam_id).await?;
    let course = examscan_storage::get_course(&state.db, exam.course_id)
        .await?
        .ok_or_else(|| CommandError::new("Exam course not found"))?;
    let results = examscan_storage::get_exam_results(&state.db, ExamId(exam_id)).await?;
    let students = examscan_storage::get_course_students(&state.db, exam.course_id).await?;
    let max_scores = exam.question_scores.clone().unwrap_or_default();

    let totals: Vec<Decimal> = results.iter().map(|r| r.total_score).collect();
    let score_rows: Vec<Vec<Score>> = results.iter().map(|r| r.question_scores.clone()).collect();

    let lines = results
        .iter()
        .map(|r| {
            let student = students.iter().find(|s| s.id == Some(r.student_id));
            ResultLine {
                student_number: student.map(|s| s.student_number.clone()).unwrap_or_default(),
                full_name: student.map(|s| s.full_name.clone()).unwrap_or_default(),
                total_score: r.total_score,
                question_scores: r.question_scores.clone(),
                success_rates: r.success_rates(&max_scores),
                is_passed: r.is_passed,
            }
        })
        .collect();

    log(state, UserAction::ViewReport, &format!("Exam report {exam_id}")).await?;

    Ok(ExamReport {
        course_code: course.code,
        statistics: ExamStatistics::from_totals(&totals),
        questions: question_statistics(&max_scores, &score_rows),
        results: lines,
        exam,
    })
}

#[derive(Debug, Serialize)]
pub struct StudentExamLine {
    pub course_code: String,
    pub semester: Semester,
    pub exam_type: ExamType,
    pub exam_date: NaiveDate,
    pub total_score: Decimal,
    pub question_scores: Vec<Score>,
    pub success_rates: Vec<Decimal>,
    pub is_passed: bool,
}

#[derive(Debug, Serialize)]
pub struct StudentReport {
    pub student: Student,
    pub exams: Vec<StudentExamLine>,
}

pub async fn student_report(
    state: &AppState,
    student_number: &str,
) -> Result<StudentReport, CommandError> {
    let student = examscan_storage::get_student_by_number(&state.db, student_number)
        .await?
        .ok_or_else(|| CommandError::new(format!("Student not found: {student_number}")))?;
    let student_id = student.id.ok_or_else(|| CommandError::new("Student has no id"))?;

    let exams = examscan_storage::get_student_results(&state.db, student_id)
        .await?
        .into_iter()
        .map(|record| {
            let max_scores = record.exam.question_scores.unwrap_or_default();
            StudentExamLine {
                course_code: record.course_code,
                semester: record.exam.semester,
                exam_type: record.exam.exam_type,
                exam_date: record.exam.exam_date,
                total_score: record.result.total_score,
                success_rates: student_success_rates(&record.result.question_scores, &max_scores),
                question_scores: record.result.question_scores,
                is_passed: record.result.is_passed,
            }
        })
        .collect();

    log(state, UserAction::ViewReport, &format!("Student report {student_number}")).await?;
    Ok(StudentReport { student, exams })
}

// ── Course outcomes ───────────────────────────────────────────────────────────

pub async fn add_outcome(
    state: &AppState,
    course_code: &str,
    description: &str,
) -> Result<CourseOutcome, CommandError> {
    let description = description.trim();
    if description.is_empty() || description.chars().count() > MAX_OUTCOME_DESCRIPTION {
        return Err(CommandError::new(format!(
            "Outcome description must be 1-{MAX_OUTCOME_DESCRIPTION} characters"
        )));
    }
    let course = course_by_code(state, course_code).await?;
    let course_id = course.id.ok_or_else(|| CommandError::new("Course has no id"))?;

    let mut outcome = CourseOutcome { id: None, course_id, description: description.to_string() };
    outcome.id = Some(examscan_storage::insert_course_outcome(&state.db, &outcome).await?);

    log(state, UserAction::OutcomeAdd, &format!("Outcome added to {}", course.code)).await?;
    Ok(outcome)
}

pub async fn map_outcome(
    state: &AppState,
    exam_id: i64,
    question_number: u32,
    outcome_id: i64,
    contribution_percentage: u32,
) -> Result<QuestionOutcome, CommandError> {
    let exam = exam_by_id(state, exam_id).await?;
    let outcomes = examscan_storage::get_course_outcomes(&state.db, exam.course_id).await?;
    if !outcomes.iter().any(|o| o.id == Some(OutcomeId(outcome_id))) {
        return Err(CommandError::new(format!(
            "Outcome {outcome_id} does not belong to the exam's course"
        )));
    }

    let mapping = QuestionOutcome {
        exam_id: ExamId(exam_id),
        question_number,
        outcome_id: OutcomeId(outcome_id),
        contribution_percentage,
    };
    let existing = examscan_storage::get_question_outcomes(&state.db, ExamId(exam_id)).await?;
    mapping.validate(exam.question_count, &existing)?;
    examscan_storage::save_question_outcome(&state.db, &mapping).await?;

    log(
        state,
        UserAction::OutcomeAdd,
        &format!("Question {question_number} of exam {exam_id} mapped to outcome {outcome_id}"),
    )
    .await?;
    Ok(mapping)
}

/// Drops every question mapping of an exam. Returns how many were removed.
pub async fn clear_outcomes(state: &AppState, exam_id: i64) -> Result<u64, CommandError> {
    let exam = exam_by_id(state, exam_id).await?;
    let removed = examscan_storage::delete_question_outcomes(&state.db, ExamId(exam_id)).await?;
    log(
        state,
        UserAction::OutcomeDelete,
        &format!("{removed} outcome mappings removed from {} exam {exam_id}", exam.exam_type.label()),
    )
    .await?;
    Ok(removed)
}

#[derive(Debug, Serialize)]
pub struct OutcomeLine {
    pub description: String,
    #[serde(flatten)]
    pub achievement: OutcomeAchievement,
}

pub async fn outcome_report(state: &AppState, exam_id: i64) -> Result<Vec<OutcomeLine>, CommandError> {
    let exam = exam_by_id(state, exam_id).await?;
    let mappings = examscan_storage::get_question_outcomes(&state.db, ExamId(exam_id)).await?;
    let outcomes = examscan_storage::get_course_outcomes(&state.db, exam.course_id).await?;
    let results = examscan_storage::get_exam_results(&state.db, ExamId(exam_id)).await?;

    let max_scores = exam.question_scores.clone().unwrap_or_default();
    let score_rows: Vec<Vec<Score>> = results.into_iter().map(|r| r.question_scores).collect();
    let rates: Vec<Decimal> = question_statistics(&max_scores, &score_rows)
        .into_iter()
        .map(|q| q.success_rate)
        .collect();

    log(state, UserAction::ViewReport, &format!("Outcome report {exam_id}")).await?;

    Ok(outcome_achievement(&mappings, &rates)
        .into_iter()
        .map(|achievement| OutcomeLine {
            description: outcomes
                .iter()
                .find(|o| o.id == Some(achievement.outcome_id))
                .map(|o| o.description.clone())
                .unwrap_or_default(),
            achievement,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use examscan_ocr::{MockRecognizer, OcrError};
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Hands out one transcript per recognized page, in upload order.
    struct ScriptedRecognizer(Mutex<VecDeque<String>>);

    impl ScriptedRecognizer {
        fn new(pages: &[&str]) -> Self {
            Self(Mutex::new(pages.iter().map(|p| p.to_string()).collect()))
        }
    }

    impl OcrBackend for ScriptedRecognizer {
        async fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
            Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    const SHEET: &str = "Ad Soyad: Jane Doe\nOgrenci No: 2125 3501\n12.11.2024\n\
                         Soru1\nSoru2\nToplam\n40\n60\n100\n35\n50\n85\n";

    async fn test_state(dir: &Path) -> AppState {
        let db = examscan_storage::create_db(&dir.join("examscan.db")).await.unwrap();
        let lecturer_id = examscan_storage::upsert_lecturer(&db, "jdoe", "Dr. Jane Doe")
            .await
            .unwrap();
        AppState { db, papers_dir: dir.join("papers"), lecturer_id }
    }

    fn scan(dir: &Path, name: &str, shade: u8) -> PathBuf {
        let img: GrayImage = ImageBuffer::from_fn(4, 4, |x, _| Luma([if x < 2 { shade } else { 255 }]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        let path = dir.join(name);
        std::fs::write(&path, buf).unwrap();
        path
    }

    async fn seeded(dir: &Path) -> AppState {
        let state = test_state(dir).await;
        add_course(&state, "BIL101", "Programlama").await.unwrap();
        let roster = dir.join("roster.csv");
        std::fs::write(&roster, "Öğrenci No,Ad Soyad\n21253501,Jane Doe\n20110042,Ali Veli\n").unwrap();
        import_roster(&state, "BIL101", &roster).await.unwrap();
        state
    }

    fn target() -> ExamTarget {
        ExamTarget {
            course_code: "BIL101".into(),
            semester: Semester::Guz,
            exam_type: ExamType::Vize,
            exam_date: NaiveDate::from_ymd_opt(2024, 11, 12),
        }
    }

    #[tokio::test]
    async fn roster_import_counts_new_students() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        add_course(&state, "BIL101", "Programlama").await.unwrap();
        let roster = dir.path().join("roster.csv");
        std::fs::write(&roster, "Ogrenci No,Ad Soyad\n21253501,Jane Doe\n").unwrap();

        let first = import_roster(&state, "BIL101", &roster).await.unwrap();
        assert_eq!((first.students, first.new_students), (1, 1));
        let again = import_roster(&state, "BIL101", &roster).await.unwrap();
        assert_eq!((again.students, again.new_students), (1, 0));
    }

    #[tokio::test]
    async fn upload_grades_matched_students() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let files = vec![scan(dir.path(), "p1.png", 10)];

        let summary = upload_exam(&state, &pipeline, &target(), &files).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.question_scores, Some(vec![40, 60]));
        assert_eq!(summary.unprocessed_students, vec!["20110042".to_string()]);

        let report = exam_report(&state, summary.exam_id).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].student_number, "21253501");
        assert_eq!(report.results[0].total_score, Decimal::from(85));
        assert_eq!(report.statistics.unwrap().count, 1);
        assert_eq!(report.questions.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_and_unknown_papers_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;

        let blank = ExamPipeline::new(MockRecognizer::new("no identity here"), state.papers_dir.clone());
        let summary = upload_exam(&state, &blank, &target(), &[scan(dir.path(), "a.png", 20)])
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed[0].reason, "student number unreadable");
        assert_eq!(summary.unprocessed_students.len(), 2);

        let stranger = ExamPipeline::new(
            MockRecognizer::new("Ad Soyad: X\nOgrenci No: 99999999"),
            state.papers_dir.clone(),
        );
        let summary = upload_exam(&state, &stranger, &target(), &[scan(dir.path(), "b.png", 30)])
            .await
            .unwrap();
        assert!(summary.failed[0].reason.contains("not on the roster"));
    }

    #[tokio::test]
    async fn reupload_reuses_exam_and_flags_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let files = vec![scan(dir.path(), "p1.png", 10)];

        let first = upload_exam(&state, &pipeline, &target(), &files).await.unwrap();
        let second = upload_exam(&state, &pipeline, &target(), &files).await.unwrap();

        assert_eq!(first.exam_id, second.exam_id);
        assert_eq!(second.duplicates, 1);
        let papers = examscan_storage::get_exam_papers(&state.db, ExamId(first.exam_id))
            .await
            .unwrap();
        assert_eq!(papers.len(), 1);
    }

    #[tokio::test]
    async fn manual_result_and_student_report() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let summary = upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();

        assert!(add_result(&state, summary.exam_id, "20110042", vec![10]).await.is_err());
        let result = add_result(&state, summary.exam_id, "20110042", vec![20, 25]).await.unwrap();
        assert!(!result.is_passed);

        let report = student_report(&state, "20110042").await.unwrap();
        assert_eq!(report.exams.len(), 1);
        assert_eq!(report.exams[0].success_rates, vec![Decimal::from(50), Decimal::new(4167, 2)]);
    }

    #[tokio::test]
    async fn outcomes_roll_up_question_rates() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let summary = upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();

        let outcome = add_outcome(&state, "BIL101", "Problem çözme").await.unwrap();
        let outcome_id = outcome.id.unwrap().0;
        map_outcome(&state, summary.exam_id, 1, outcome_id, 60).await.unwrap();
        map_outcome(&state, summary.exam_id, 2, outcome_id, 40).await.unwrap();
        assert!(map_outcome(&state, summary.exam_id, 3, outcome_id, 10).await.is_err());

        let lines = outcome_report(&state, summary.exam_id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].description, "Problem çözme");
        // Q1 35/40 = 87.5% * 0.6, Q2 50/60 = 83.33% * 0.4
        assert_eq!(lines[0].achievement.total_rate, Decimal::new(5250, 2) + Decimal::new(3333, 2));
    }

    #[tokio::test]
    async fn actions_are_audited() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();

        let logs = examscan_storage::get_user_logs(&state.db, state.lecturer_id, 10).await.unwrap();
        let actions: Vec<UserAction> = logs.iter().map(|l| l.action).collect();
        assert_eq!(
            actions,
            vec![UserAction::ExamProcess, UserAction::ExamUpload, UserAction::StudentAdd]
        );
    }

    #[tokio::test]
    async fn near_miss_number_never_replaces_an_existing_result() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(
            ScriptedRecognizer::new(&[
                SHEET,
                // Last digit misread: one slip from 21253501, who is graded above.
                "Ad Soyad: Jane Doe\nOgrenci No: 2125 3509\nSoru1\nSoru2\nToplam\n40\n60\n100\n10\n20\n30\n",
                // One slip from 20110042, who has no result yet.
                "Ad Soyad: Ali Veli\nOgrenci No: 2011 0043\nSoru1\nSoru2\nToplam\n40\n60\n100\n30\n40\n70\n",
            ]),
            state.papers_dir.clone(),
        );
        let files = vec![
            scan(dir.path(), "exact.png", 10),
            scan(dir.path(), "misread.png", 20),
            scan(dir.path(), "near.png", 30),
        ];

        let summary = upload_exam(&state, &pipeline, &target(), &files).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].file.ends_with("misread.png"));
        assert!(summary.failed[0].reason.contains("already has a result"));
        assert!(summary.unprocessed_students.is_empty());

        let report = exam_report(&state, summary.exam_id).await.unwrap();
        let total_of = |number: &str| {
            report.results.iter().find(|r| r.student_number == number).unwrap().total_score
        };
        assert_eq!(total_of("21253501"), Decimal::from(85));
        assert_eq!(total_of("20110042"), Decimal::from(70));
    }

    #[tokio::test]
    async fn paper_without_scores_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(
            MockRecognizer::new("Ad Soyad: Jane Doe\nOgrenci No: 21253501\n"),
            state.papers_dir.clone(),
        );
        let summary = upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();
        assert_eq!(summary.failed[0].reason, "21253501: score table unreadable");
    }

    #[tokio::test]
    async fn failed_upload_is_audited_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let unknown = ExamTarget { course_code: "YOK999".into(), ..target() };

        let err = upload_exam(&state, &pipeline, &unknown, &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap_err();
        assert!(err.message.contains("YOK999"));

        let logs = audit_log(&state, 1).await.unwrap();
        assert_eq!(logs[0].action, UserAction::Error);
        assert!(logs[0].details.contains("YOK999"));
    }

    #[tokio::test]
    async fn listings_cover_courses_students_and_exams() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();

        assert_eq!(list_courses(&state).await.unwrap().len(), 1);
        assert_eq!(list_students(&state, None).await.unwrap().len(), 2);
        let found = list_students(&state, Some("Veli")).await.unwrap();
        assert_eq!(found[0].student_number, "20110042");

        let exams = list_exams(&state, None).await.unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].course_code, "BIL101");
        assert_eq!(exams[0].question_count, 2);
        assert_eq!(exams[0].results, 1);
        assert_eq!(list_exams(&state, Some("BIL101")).await.unwrap().len(), 1);
        assert!(list_exams(&state, Some("YOK999")).await.is_err());
    }

    #[tokio::test]
    async fn deleting_exam_drops_results_and_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let summary = upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();
        let outcome = add_outcome(&state, "BIL101", "Analiz").await.unwrap();
        map_outcome(&state, summary.exam_id, 1, outcome.id.unwrap().0, 50).await.unwrap();

        let deleted = delete_exam(&state, summary.exam_id).await.unwrap();
        assert_eq!(deleted.question_count, 2);

        assert!(exam_report(&state, summary.exam_id).await.is_err());
        assert!(list_exams(&state, None).await.unwrap().is_empty());
        assert!(student_report(&state, "21253501").await.unwrap().exams.is_empty());
        assert!(delete_exam(&state, summary.exam_id).await.is_err());

        let actions: Vec<UserAction> =
            audit_log(&state, 5).await.unwrap().iter().map(|l| l.action).collect();
        assert!(actions.contains(&UserAction::ExamDelete));
    }

    #[tokio::test]
    async fn clearing_outcomes_allows_remapping() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let summary = upload_exam(&state, &pipeline, &target(), &[scan(dir.path(), "p.png", 10)])
            .await
            .unwrap();
        let outcome_id = add_outcome(&state, "BIL101", "Analiz").await.unwrap().id.unwrap().0;
        map_outcome(&state, summary.exam_id, 1, outcome_id, 100).await.unwrap();
        assert!(map_outcome(&state, summary.exam_id, 2, outcome_id, 10).await.is_err());

        assert_eq!(clear_outcomes(&state, summary.exam_id).await.unwrap(), 1);
        assert!(outcome_report(&state, summary.exam_id).await.unwrap().is_empty());
        map_outcome(&state, summary.exam_id, 2, outcome_id, 10).await.unwrap();

        let logs = audit_log(&state, 3).await.unwrap();
        assert!(logs.iter().any(|l| l.action == UserAction::OutcomeDelete));
    }

    #[tokio::test]
    async fn student_papers_listed_and_exported() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded(dir.path()).await;
        let pipeline = ExamPipeline::new(MockRecognizer::new(SHEET), state.papers_dir.clone());
        let original = scan(dir.path(), "p.png", 10);
        upload_exam(&state, &pipeline, &target(), &[original.clone()]).await.unwrap();

        let papers = student_papers(&state, "21253501").await.unwrap();
        assert_eq!(papers.len(), 1);
        assert!(papers[0].available);
        assert!(student_papers(&state, "20110042").await.unwrap().is_empty());
        assert!(student_papers(&state, "99999999").await.is_err());

        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let exported = export_paper(&state, "21253501", &out).await.unwrap();
        assert!(exported.starts_with(&out));
        assert_eq!(std::fs::read(&exported).unwrap(), std::fs::read(&original).unwrap());

        let err = export_paper(&state, "20110042", &out).await.unwrap_err();
        assert!(err.message.contains("No exam paper"));
    }
}
