use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use examscan_core::{ExamType, ExamscanConfig, LecturerId, Score, Semester};
use examscan_ocr::{ExamPipeline, MockRecognizer, OcrBackend, Rasterizer, VisionRecognizer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ExamTarget;

pub struct AppState {
    pub db: examscan_storage::DbPool,
    /// Root of the content-addressed paper store (<data>/papers/).
    pub papers_dir: PathBuf,
    /// Lecturer every audit-log entry of this run is recorded against.
    pub lecturer_id: LecturerId,
}

#[derive(Parser)]
#[command(name = "examscan")]
#[command(about = "Grade scanned exam papers with OCR", version)]
struct Cli {
    /// Config file (TOML). Defaults to `config.toml` in the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the data directory from the config and environment.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Username recorded in the audit log.
    #[arg(long, global = true, env = "EXAMSCAN_LECTURER", default_value = "lecturer")]
    lecturer: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage courses.
    #[command(subcommand)]
    Course(CourseCommand),
    /// Manage class rosters.
    #[command(subcommand)]
    Roster(RosterCommand),
    /// Browse students.
    #[command(subcommand)]
    Student(StudentCommand),
    /// Find and export stored exam papers.
    #[command(subcommand)]
    Paper(PaperCommand),
    /// Upload and grade exam papers.
    #[command(subcommand)]
    Exam(ExamCommand),
    /// Enter results by hand.
    #[command(subcommand)]
    Result(ResultCommand),
    /// Print exam and student reports.
    #[command(subcommand)]
    Report(ReportCommand),
    /// Manage course outcomes and question mappings.
    #[command(subcommand)]
    Outcome(OutcomeCommand),
    /// Show the most recent audit-log entries of this lecturer.
    Log {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Grade papers dropped into the intake folder until interrupted.
    Watch {
        #[command(flatten)]
        exam: ExamArgs,
        #[command(flatten)]
        ocr: OcrArgs,
        /// Folder to watch. Defaults to <data>/intake.
        #[arg(long)]
        intake: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CourseCommand {
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
    },
    List,
}

#[derive(Subcommand)]
enum RosterCommand {
    /// Import a CSV class list (`Öğrenci No`, `Ad Soyad`) and enroll it.
    Import {
        #[arg(long)]
        course: String,
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// List students, optionally filtered by number or name.
    List {
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Subcommand)]
enum PaperCommand {
    /// List the graded papers of a student, newest first.
    List { student_number: String },
    /// Copy the student's latest paper to a file or directory.
    Export {
        student_number: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ExamCommand {
    List {
        #[arg(long)]
        course: Option<String>,
    },
    /// Delete an exam with its results and outcome mappings.
    Delete { exam: i64 },
    Upload {
        #[command(flatten)]
        exam: ExamArgs,
        #[command(flatten)]
        ocr: OcrArgs,
        /// Roster to import before grading.
        #[arg(long)]
        roster: Option<PathBuf>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ResultCommand {
    Add {
        #[arg(long)]
        exam: i64,
        #[arg(long)]
        student: String,
        /// Per-question scores, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        scores: Vec<Score>,
    },
}

#[derive(Subcommand)]
enum ReportCommand {
    Exam { exam: i64 },
    Student { student_number: String },
}

#[derive(Subcommand)]
enum OutcomeCommand {
    Add {
        #[arg(long)]
        course: String,
        description: String,
    },
    Map {
        #[arg(long)]
        exam: i64,
        #[arg(long)]
        question: u32,
        #[arg(long)]
        outcome: i64,
        #[arg(long)]
        contribution: u32,
    },
    Show { exam: i64 },
    /// Remove every question mapping of an exam.
    Clear { exam: i64 },
}

#[derive(Args)]
struct ExamArgs {
    #[arg(long)]
    course: String,
    /// GUZ or BAHAR.
    #[arg(long)]
    semester: Semester,
    /// VIZE, FINAL, BUTUNLEME or MAZERET.
    #[arg(long = "type")]
    exam_type: ExamType,
    /// Exam date (YYYY-MM-DD) for a new exam. Defaults to today.
    #[arg(long)]
    date: Option<chrono::NaiveDate>,
}

impl ExamArgs {
    fn target(&self) -> ExamTarget {
        ExamTarget {
            course_code: self.course.clone(),
            semester: self.semester,
            exam_type: self.exam_type,
            exam_date: self.date,
        }
    }
}

#[derive(Args)]
struct OcrArgs {
    /// Skip the OCR service and use this transcript for every paper.
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Use the local Tesseract engine instead of the OCR service.
    #[cfg(feature = "tesseract")]
    #[arg(long)]
    tesseract: bool,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn data_dir(cli: &Cli, config: &ExamscanConfig) -> anyhow::Result<PathBuf> {
    if let Some(dir) = cli.data_dir.clone().or_else(|| config.data_dir.clone()) {
        return Ok(dir);
    }
    let project_dirs = directories::ProjectDirs::from("com", "examscan", "Examscan")
        .context("Failed to get app directory")?;
    Ok(project_dirs.data_dir().to_path_buf())
}

fn load_config(cli: &Cli) -> anyhow::Result<ExamscanConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let mut defaults = ExamscanConfig::default();
            defaults.apply_env(|key| std::env::var(key).ok());
            data_dir(cli, &defaults)?.join("config.toml")
        }
    };
    ExamscanConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

fn pipeline<R: OcrBackend>(recognizer: R, state: &AppState, config: &ExamscanConfig) -> ExamPipeline<R> {
    ExamPipeline::new(recognizer, state.papers_dir.clone())
        .with_rasterizer(Rasterizer::new(
            config.ocr.poppler_path.as_deref(),
            config.ocr.render_dpi,
        ))
        .with_row_roles(config.rows)
}

async fn run_upload<R: OcrBackend>(
    recognizer: R,
    state: &AppState,
    config: &ExamscanConfig,
    target: &ExamTarget,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    let pipeline = pipeline(recognizer, state, config);
    let summary = commands::upload_exam(state, &pipeline, target, files).await?;
    print_json(&summary)
}

async fn run_watch<R: OcrBackend>(
    recognizer: R,
    state: &AppState,
    config: &ExamscanConfig,
    target: &ExamTarget,
    intake: &Path,
) -> anyhow::Result<()> {
    let pipeline = pipeline(recognizer, state, config);
    commands::watch_intake(state, &pipeline, target, intake).await?;
    Ok(())
}

/// Picks the recognizer once for the whole run and hands it to `$run`.
macro_rules! with_recognizer {
    ($ocr:expr, $config:expr, |$r:ident| $run:expr) => {{
        #[cfg(feature = "tesseract")]
        if $ocr.tesseract {
            let $r = examscan_ocr::recognizer::tesseract_backend::TesseractRecognizer::from_config(&$config.ocr);
            return $run.await;
        }
        match &$ocr.transcript {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read transcript {}", path.display()))?;
                let $r = MockRecognizer::new(text);
                $run.await
            }
            None => {
                let $r = VisionRecognizer::from_config(&$config.ocr)?;
                $run.await
            }
        }
    }};
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let data_dir = data_dir(&cli, &config)?;

    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    let papers_dir = data_dir.join("papers");
    std::fs::create_dir_all(&papers_dir).context("Failed to create papers directory")?;

    let db = examscan_storage::create_db(&data_dir.join("examscan.db"))
        .await
        .context("Failed to open database")?;
    let lecturer_id = examscan_storage::upsert_lecturer(&db, &cli.lecturer, &cli.lecturer).await?;
    let state = AppState { db, papers_dir, lecturer_id };

    match cli.command {
        Command::Course(CourseCommand::Add { code, name }) => {
            print_json(&commands::add_course(&state, &code, &name).await?)
        }
        Command::Course(CourseCommand::List) => print_json(&commands::list_courses(&state).await?),
        Command::Roster(RosterCommand::Import { course, file }) => {
            print_json(&commands::import_roster(&state, &course, &file).await?)
        }
        Command::Student(StudentCommand::List { search }) => {
            print_json(&commands::list_students(&state, search.as_deref()).await?)
        }
        Command::Paper(PaperCommand::List { student_number }) => {
            print_json(&commands::student_papers(&state, &student_number).await?)
        }
        Command::Paper(PaperCommand::Export { student_number, out }) => {
            let path = commands::export_paper(&state, &student_number, &out).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Exam(ExamCommand::List { course }) => {
            print_json(&commands::list_exams(&state, course.as_deref()).await?)
        }
        Command::Exam(ExamCommand::Delete { exam }) => {
            print_json(&commands::delete_exam(&state, exam).await?)
        }
        Command::Exam(ExamCommand::Upload { exam, ocr, roster, files }) => {
            if let Some(roster) = roster {
                print_json(&commands::import_roster(&state, &exam.course, &roster).await?)?;
            }
            let target = exam.target();
            with_recognizer!(ocr, config, |r| run_upload(r, &state, &config, &target, &files))
        }
        Command::Result(ResultCommand::Add { exam, student, scores }) => {
            print_json(&commands::add_result(&state, exam, &student, scores).await?)
        }
        Command::Report(ReportCommand::Exam { exam }) => {
            print_json(&commands::exam_report(&state, exam).await?)
        }
        Command::Report(ReportCommand::Student { student_number }) => {
            print_json(&commands::student_report(&state, &student_number).await?)
        }
        Command::Outcome(OutcomeCommand::Add { course, description }) => {
            print_json(&commands::add_outcome(&state, &course, &description).await?)
        }
        Command::Outcome(OutcomeCommand::Map { exam, question, outcome, contribution }) => {
            print_json(&commands::map_outcome(&state, exam, question, outcome, contribution).await?)
        }
        Command::Outcome(OutcomeCommand::Show { exam }) => {
            print_json(&commands::outcome_report(&state, exam).await?)
        }
        Command::Outcome(OutcomeCommand::Clear { exam }) => {
            print_json(&commands::clear_outcomes(&state, exam).await?)
        }
        Command::Log { limit } => print_json(&commands::audit_log(&state, limit).await?),
        Command::Watch { exam, ocr, intake } => {
            let intake = intake.unwrap_or_else(|| data_dir.join("intake"));
            let target = exam.target();
            with_recognizer!(ocr, config, |r| run_watch(r, &state, &config, &target, &intake))
        }
    }
}
