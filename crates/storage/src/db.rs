use chrono::{NaiveDate, NaiveDateTime};
use examscan_core::{
    Course, CourseId, CourseOutcome, Exam, ExamId, ExamResult, ExamType, LecturerId, OutcomeId,
    QuestionOutcome, Score, Semester, Student, StudentId, UserAction,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lecturers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE CHECK (length(code) <= 10),
            name TEXT NOT NULL,
            lecturer_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (lecturer_id) REFERENCES lecturers(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_number TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            department TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_students (
            course_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            PRIMARY KEY (course_id, student_id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER NOT NULL,
            semester TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            exam_date TEXT NOT NULL,
            question_count INTEGER NOT NULL DEFAULT 0,
            question_scores TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (course_id, semester, exam_type),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exam_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exam_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            total_score TEXT NOT NULL,
            question_scores TEXT NOT NULL,
            is_passed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (exam_id, student_id),
            FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE,
            FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_outcomes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER NOT NULL,
            description TEXT NOT NULL CHECK (length(description) <= 500),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exam_question_outcomes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exam_id INTEGER NOT NULL,
            question_number INTEGER NOT NULL,
            outcome_id INTEGER NOT NULL,
            contribution_percentage INTEGER NOT NULL
                CHECK (contribution_percentage BETWEEN 1 AND 100),
            UNIQUE (exam_id, question_number, outcome_id),
            FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE,
            FOREIGN KEY (outcome_id) REFERENCES course_outcomes(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exam_papers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exam_id INTEGER NOT NULL,
            student_id INTEGER,
            file_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            uploaded_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (exam_id, content_hash),
            FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE,
            FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lecturer_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            details TEXT NOT NULL DEFAULT '',
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (lecturer_id) REFERENCES lecturers(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Column decoding ───────────────────────────────────────────────────────────

fn decode_err(e: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(e.to_string().into())
}

fn parse_column<T: FromStr>(raw: &str) -> Result<T, sqlx::Error>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(decode_err)
}

fn scores_to_json(scores: &[Score]) -> Result<String, sqlx::Error> {
    serde_json::to_string(scores).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn scores_from_json(raw: &str) -> Result<Vec<Score>, sqlx::Error> {
    serde_json::from_str(raw).map_err(decode_err)
}

// ── Lecturers ─────────────────────────────────────────────────────────────────

pub async fn upsert_lecturer(
    pool: &DbPool,
    username: &str,
    full_name: &str,
) -> Result<LecturerId, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO lecturers (username, full_name) VALUES (?, ?) \
         ON CONFLICT(username) DO UPDATE SET full_name = excluded.full_name RETURNING id",
    )
    .bind(username)
    .bind(full_name)
    .fetch_one(pool)
    .await?;
    Ok(LecturerId(id))
}

// ── Courses ───────────────────────────────────────────────────────────────────

type CourseRow = (i64, String, String, Option<i64>);

fn course_from_row(r: CourseRow) -> Course {
    Course {
        id: Some(CourseId(r.0)),
        code: r.1,
        name: r.2,
        lecturer_id: r.3.map(LecturerId),
    }
}

pub async fn upsert_course(pool: &DbPool, course: &Course) -> Result<CourseId, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO courses (code, name, lecturer_id) VALUES (?, ?, ?) \
         ON CONFLICT(code) DO UPDATE SET name = excluded.name, \
         lecturer_id = COALESCE(excluded.lecturer_id, courses.lecturer_id) RETURNING id",
    )
    .bind(&course.code)
    .bind(&course.name)
    .bind(course.lecturer_id.map(|l| l.0))
    .fetch_one(pool)
    .await?;
    Ok(CourseId(id))
}

pub async fn get_course_by_code(pool: &DbPool, code: &str) -> Result<Option<Course>, sqlx::Error> {
    let row = sqlx::query_as::<_, CourseRow>(
        "SELECT id, code, name, lecturer_id FROM courses WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(course_from_row))
}

pub async fn get_course(pool: &DbPool, id: CourseId) -> Result<Option<Course>, sqlx::Error> {
    let row = sqlx::query_as::<_, CourseRow>(
        "SELECT id, code, name, lecturer_id FROM courses WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(course_from_row))
}

pub async fn get_all_courses(pool: &DbPool) -> Result<Vec<Course>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CourseRow>(
        "SELECT id, code, name, lecturer_id FROM courses ORDER BY code",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(course_from_row).collect())
}

// ── Students ──────────────────────────────────────────────────────────────────

type StudentRow = (i64, String, String, String);

fn student_from_row(r: StudentRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: Some(StudentId(r.0)),
        student_number: r.1,
        full_name: r.2,
        department: parse_column(&r.3)?,
    })
}

/// Inserts the student or refreshes the name of an existing one. The
/// department is fixed when the student is first created.
pub async fn upsert_student(pool: &DbPool, student: &Student) -> Result<StudentId, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO students (student_number, full_name, department) VALUES (?, ?, ?) \
         ON CONFLICT(student_number) DO UPDATE SET full_name = excluded.full_name RETURNING id",
    )
    .bind(&student.student_number)
    .bind(&student.full_name)
    .bind(student.department.to_string())
    .fetch_one(pool)
    .await?;
    Ok(StudentId(id))
}

pub async fn get_student_by_number(
    pool: &DbPool,
    student_number: &str,
) -> Result<Option<Student>, sqlx::Error> {
    let row = sqlx::query_as::<_, StudentRow>(
        "SELECT id, student_number, full_name, department FROM students WHERE student_number = ?",
    )
    .bind(student_number)
    .fetch_optional(pool)
    .await?;
    row.map(student_from_row).transpose()
}

pub async fn enroll_student(
    pool: &DbPool,
    course_id: CourseId,
    student_id: StudentId,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO course_students (course_id, student_id) VALUES (?, ?)")
        .bind(course_id.0)
        .bind(student_id.0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_course_students(
    pool: &DbPool,
    course_id: CourseId,
) -> Result<Vec<Student>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StudentRow>(
        "SELECT s.id, s.student_number, s.full_name, s.department FROM students s \
         JOIN course_students cs ON cs.student_id = s.id \
         WHERE cs.course_id = ? ORDER BY s.student_number",
    )
    .bind(course_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(student_from_row).collect()
}

/// Students whose number or name contains `query`, or every student when
/// there is no query.
pub async fn search_students(pool: &DbPool, query: Option<&str>) -> Result<Vec<Student>, sqlx::Error> {
    let pattern = format!("%{}%", query.unwrap_or_default().trim());
    let rows = sqlx::query_as::<_, StudentRow>(
        "SELECT id, student_number, full_name, department FROM students \
         WHERE student_number LIKE ?1 OR full_name LIKE ?1 ORDER BY student_number",
    )
    .bind(pattern)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(student_from_row).collect()
}

// ── Exams ─────────────────────────────────────────────────────────────────────

type ExamRow = (i64, i64, String, String, NaiveDate, i64, Option<String>);

const EXAM_COLUMNS: &str =
    "id, course_id, semester, exam_type, exam_date, question_count, question_scores";

fn exam_from_row(r: ExamRow) -> Result<Exam, sqlx::Error> {
    Ok(Exam {
        id: Some(ExamId(r.0)),
        course_id: CourseId(r.1),
        semester: parse_column::<Semester>(&r.2)?,
        exam_type: parse_column::<ExamType>(&r.3)?,
        exam_date: r.4,
        question_count: usize::try_from(r.5).map_err(decode_err)?,
        question_scores: r.6.as_deref().map(scores_from_json).transpose()?,
    })
}

pub async fn create_exam(pool: &DbPool, exam: &Exam) -> Result<ExamId, sqlx::Error> {
    let scores = exam.question_scores.as_deref().map(scores_to_json).transpose()?;
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO exams (course_id, semester, exam_type, exam_date, question_count, question_scores) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(exam.course_id.0)
    .bind(exam.semester.code())
    .bind(exam.exam_type.code())
    .bind(exam.exam_date)
    .bind(exam.question_count as i64)
    .bind(scores)
    .fetch_one(pool)
    .await?;
    Ok(ExamId(id))
}

pub async fn get_exam(pool: &DbPool, id: ExamId) -> Result<Option<Exam>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExamRow>(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(pool)
        .await?;
    row.map(exam_from_row).transpose()
}

pub async fn find_exam(
    pool: &DbPool,
    course_id: CourseId,
    semester: Semester,
    exam_type: ExamType,
) -> Result<Option<Exam>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExamRow>(&format!(
        "SELECT {EXAM_COLUMNS} FROM exams WHERE course_id = ? AND semester = ? AND exam_type = ?"
    ))
    .bind(course_id.0)
    .bind(semester.code())
    .bind(exam_type.code())
    .fetch_optional(pool)
    .await?;
    row.map(exam_from_row).transpose()
}

pub async fn get_course_exams(pool: &DbPool, course_id: CourseId) -> Result<Vec<Exam>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExamRow>(&format!(
        "SELECT {EXAM_COLUMNS} FROM exams WHERE course_id = ? ORDER BY exam_date"
    ))
    .bind(course_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(exam_from_row).collect()
}

/// Stores the exam's question layout. Validation happens in
/// [`Exam::set_question_scores`] before this is called.
pub async fn update_exam_question_scores(pool: &DbPool, exam: &Exam) -> Result<(), sqlx::Error> {
    let id = exam.id.ok_or(sqlx::Error::RowNotFound)?;
    let scores = exam.question_scores.as_deref().map(scores_to_json).transpose()?;
    sqlx::query("UPDATE exams SET question_count = ?, question_scores = ? WHERE id = ?")
        .bind(exam.question_count as i64)
        .bind(scores)
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// Removes an exam with its results, question mappings and paper records.
/// Returns `false` when there was no such exam.
pub async fn delete_exam(pool: &DbPool, id: ExamId) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for table in ["exam_question_outcomes", "exam_results", "exam_papers"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE exam_id = ?"))
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
    }
    let deleted = sqlx::query("DELETE FROM exams WHERE id = ?")
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(deleted > 0)
}

// ── Exam results ──────────────────────────────────────────────────────────────

type ResultRow = (i64, i64, i64, String, String, bool);

fn result_from_row(r: ResultRow) -> Result<ExamResult, sqlx::Error> {
    Ok(ExamResult {
        id: Some(r.0),
        exam_id: ExamId(r.1),
        student_id: StudentId(r.2),
        total_score: parse_column::<Decimal>(&r.3)?,
        question_scores: scores_from_json(&r.4)?,
        is_passed: r.5,
    })
}

/// Inserts or replaces the result of one student on one exam.
pub async fn save_exam_result(pool: &DbPool, result: &ExamResult) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO exam_results (exam_id, student_id, total_score, question_scores, is_passed) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(exam_id, student_id) DO UPDATE SET \
         total_score = excluded.total_score, question_scores = excluded.question_scores, \
         is_passed = excluded.is_passed RETURNING id",
    )
    .bind(result.exam_id.0)
    .bind(result.student_id.0)
    .bind(result.total_score.to_string())
    .bind(scores_to_json(&result.question_scores)?)
    .bind(result.is_passed)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_exam_results(pool: &DbPool, exam_id: ExamId) -> Result<Vec<ExamResult>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ResultRow>(
        "SELECT id, exam_id, student_id, total_score, question_scores, is_passed \
         FROM exam_results WHERE exam_id = ? ORDER BY id",
    )
    .bind(exam_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(result_from_row).collect()
}

pub async fn get_exam_result(
    pool: &DbPool,
    exam_id: ExamId,
    student_id: StudentId,
) -> Result<Option<ExamResult>, sqlx::Error> {
    let row = sqlx::query_as::<_, ResultRow>(
        "SELECT id, exam_id, student_id, total_score, question_scores, is_passed \
         FROM exam_results WHERE exam_id = ? AND student_id = ?",
    )
    .bind(exam_id.0)
    .bind(student_id.0)
    .fetch_optional(pool)
    .await?;
    row.map(result_from_row).transpose()
}

/// One line of a student's transcript across exams.
#[derive(Debug, Clone, Serialize)]
pub struct StudentExamRecord {
    pub course_code: String,
    pub exam: Exam,
    pub result: ExamResult,
}

pub async fn get_student_results(
    pool: &DbPool,
    student_id: StudentId,
) -> Result<Vec<StudentExamRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64, i64, i64, String, String, bool)>(
        "SELECT c.code, r.id, r.exam_id, r.student_id, r.total_score, r.question_scores, r.is_passed \
         FROM exam_results r \
         JOIN exams e ON e.id = r.exam_id \
         JOIN courses c ON c.id = e.course_id \
         WHERE r.student_id = ? ORDER BY e.exam_date, c.code",
    )
    .bind(student_id.0)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for (course_code, id, exam_id, sid, total, scores, passed) in rows {
        let result = result_from_row((id, exam_id, sid, total, scores, passed))?;
        let exam = get_exam(pool, result.exam_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        records.push(StudentExamRecord { course_code, exam, result });
    }
    Ok(records)
}

// ── Course outcomes ───────────────────────────────────────────────────────────

pub async fn insert_course_outcome(
    pool: &DbPool,
    outcome: &CourseOutcome,
) -> Result<OutcomeId, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO course_outcomes (course_id, description) VALUES (?, ?) RETURNING id",
    )
    .bind(outcome.course_id.0)
    .bind(&outcome.description)
    .fetch_one(pool)
    .await?;
    Ok(OutcomeId(id))
}

pub async fn get_course_outcomes(
    pool: &DbPool,
    course_id: CourseId,
) -> Result<Vec<CourseOutcome>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, i64, String)>(
        "SELECT id, course_id, description FROM course_outcomes WHERE course_id = ? ORDER BY id",
    )
    .bind(course_id.0)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| CourseOutcome {
            id: Some(OutcomeId(r.0)),
            course_id: CourseId(r.1),
            description: r.2,
        })
        .collect())
}

pub async fn save_question_outcome(pool: &DbPool, mapping: &QuestionOutcome) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exam_question_outcomes (exam_id, question_number, outcome_id, contribution_percentage) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(exam_id, question_number, outcome_id) \
         DO UPDATE SET contribution_percentage = excluded.contribution_percentage",
    )
    .bind(mapping.exam_id.0)
    .bind(mapping.question_number)
    .bind(mapping.outcome_id.0)
    .bind(mapping.contribution_percentage)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_question_outcomes(
    pool: &DbPool,
    exam_id: ExamId,
) -> Result<Vec<QuestionOutcome>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, u32, i64, u32)>(
        "SELECT exam_id, question_number, outcome_id, contribution_percentage \
         FROM exam_question_outcomes WHERE exam_id = ? ORDER BY question_number, outcome_id",
    )
    .bind(exam_id.0)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| QuestionOutcome {
            exam_id: ExamId(r.0),
            question_number: r.1,
            outcome_id: OutcomeId(r.2),
            contribution_percentage: r.3,
        })
        .collect())
}

/// Drops every question mapping of an exam. The course outcomes stay.
pub async fn delete_question_outcomes(pool: &DbPool, exam_id: ExamId) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exam_question_outcomes WHERE exam_id = ?")
        .bind(exam_id.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ── Exam papers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ExamPaperRecord {
    pub id: Option<i64>,
    pub exam_id: ExamId,
    pub student_id: Option<StudentId>,
    pub file_path: String,
    pub content_hash: String,
    pub uploaded_at: Option<NaiveDateTime>,
}

/// Records an uploaded paper. Returns `None` when the same file was already
/// recorded for this exam.
pub async fn insert_exam_paper(
    pool: &DbPool,
    paper: &ExamPaperRecord,
) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO exam_papers (exam_id, student_id, file_path, content_hash) VALUES (?, ?, ?, ?) \
         ON CONFLICT(exam_id, content_hash) DO NOTHING RETURNING id",
    )
    .bind(paper.exam_id.0)
    .bind(paper.student_id.map(|s| s.0))
    .bind(&paper.file_path)
    .bind(&paper.content_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id,)| id))
}

type PaperRow = (i64, i64, Option<i64>, String, String, NaiveDateTime);

const PAPER_COLUMNS: &str = "id, exam_id, student_id, file_path, content_hash, uploaded_at";

fn paper_from_row(r: PaperRow) -> ExamPaperRecord {
    ExamPaperRecord {
        id: Some(r.0),
        exam_id: ExamId(r.1),
        student_id: r.2.map(StudentId),
        file_path: r.3,
        content_hash: r.4,
        uploaded_at: Some(r.5),
    }
}

pub async fn get_exam_papers(
    pool: &DbPool,
    exam_id: ExamId,
) -> Result<Vec<ExamPaperRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaperRow>(&format!(
        "SELECT {PAPER_COLUMNS} FROM exam_papers WHERE exam_id = ? ORDER BY id"
    ))
    .bind(exam_id.0)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(paper_from_row).collect())
}

/// Papers graded for a student across all exams, newest first.
pub async fn get_student_papers(
    pool: &DbPool,
    student_id: StudentId,
) -> Result<Vec<ExamPaperRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaperRow>(&format!(
        "SELECT {PAPER_COLUMNS} FROM exam_papers WHERE student_id = ? ORDER BY uploaded_at DESC, id DESC"
    ))
    .bind(student_id.0)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(paper_from_row).collect())
}

// ── User log ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct UserLogEntry {
    pub id: i64,
    pub lecturer_id: LecturerId,
    pub action: UserAction,
    pub details: String,
    pub timestamp: NaiveDateTime,
}

pub async fn log_action(
    pool: &DbPool,
    lecturer_id: LecturerId,
    action: UserAction,
    details: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO user_logs (lecturer_id, action, details) VALUES (?, ?, ?)")
        .bind(lecturer_id.0)
        .bind(action.to_string())
        .bind(details)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_user_logs(
    pool: &DbPool,
    lecturer_id: LecturerId,
    limit: i64,
) -> Result<Vec<UserLogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, i64, String, String, NaiveDateTime)>(
        "SELECT id, lecturer_id, action, details, timestamp FROM user_logs \
         WHERE lecturer_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(lecturer_id.0)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|r| {
            Ok(UserLogEntry {
                id: r.0,
                lecturer_id: LecturerId(r.1),
                action: parse_column(&r.2)?,
                details: r.3,
                timestamp: r.4,
            })
        })
        .collect()
}
