use examscan_core::RowRoles;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::extract::ScoreExtractor;
use crate::hash::PaperStore;
use crate::preprocess;
use crate::rasterize::{RasterizeError, Rasterizer};
use crate::recognizer::{OcrBackend, OcrError};
use crate::types::ExtractionResult;

/// Uploads the intake watcher and batch upload accept.
pub const PAPER_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Rasterization failed: {0}")]
    Rasterize(#[from] RasterizeError),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] crate::preprocess::PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

/// Everything produced while processing one uploaded paper.
#[derive(Debug)]
pub struct ProcessedPaper {
    /// SHA-256 hex digest of the uploaded file.
    pub digest: String,
    /// Where the original upload was kept in the paper store.
    pub paper_path: PathBuf,
    /// The same file had been uploaded before.
    pub duplicate: bool,
    pub transcript: String,
    pub extraction: ExtractionResult,
}

/// Orchestrates: store → rasterize → preprocess → OCR → extract.
///
/// One pipeline (and the recognizer inside it) is built per run and reused
/// for every file; files are processed one at a time.
pub struct ExamPipeline<R: OcrBackend> {
    recognizer: R,
    extractor: ScoreExtractor,
    rasterizer: Rasterizer,
    papers: PaperStore,
}

impl<R: OcrBackend> ExamPipeline<R> {
    pub fn new(recognizer: R, papers_dir: PathBuf) -> Self {
        Self {
            recognizer,
            extractor: ScoreExtractor::default(),
            rasterizer: Rasterizer::default(),
            papers: PaperStore::new(papers_dir),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Rasterizer) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_row_roles(mut self, roles: RowRoles) -> Self {
        self.extractor = ScoreExtractor::new(roles);
        self
    }

    /// Processes one exam file. Failures are logged and reported as `None`;
    /// fields that could not be read are unresolved inside the result.
    pub async fn process_file(
        &self,
        path: &Path,
        course_code: &str,
        semester: &str,
    ) -> Option<ExtractionResult> {
        match self.try_process_file(path, course_code, semester).await {
            Ok(paper) => Some(paper.extraction),
            Err(e) => {
                tracing::error!("Failed to process {}: {}", path.display(), error_chain(&e));
                None
            }
        }
    }

    pub async fn try_process_file(
        &self,
        path: &Path,
        course_code: &str,
        semester: &str,
    ) -> Result<ProcessedPaper, PipelineError> {
        tracing::info!("Processing exam file {}", path.display());
        let bytes = tokio::fs::read(path).await?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();

        let stored = self.papers.store(&bytes, &ext).await?;
        let page = self.rasterizer.page_image(path, &bytes).await?;
        let image_bytes = preprocess::prepare_page(&page)?;

        let transcript = self.recognizer.recognize(&image_bytes).await?;
        tracing::debug!("Transcript for {}: {} chars", path.display(), transcript.len());

        let extraction = self.extract_transcript(&transcript, course_code, semester);
        Ok(ProcessedPaper {
            digest: stored.digest,
            paper_path: stored.path,
            duplicate: stored.duplicate,
            transcript,
            extraction,
        })
    }

    /// Runs extraction over an existing transcript without calling OCR.
    pub fn extract_transcript(
        &self,
        transcript: &str,
        course_code: &str,
        semester: &str,
    ) -> ExtractionResult {
        self.extractor.extract(transcript, course_code, semester)
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

pub fn is_paper_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| PAPER_EXTENSIONS.iter().any(|p| ext.eq_ignore_ascii_case(p)))
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a notify watcher on `watch_dir` that sends newly created exam
/// papers to `tx`. The returned watcher must be kept alive.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(ev) if matches!(ev.kind, EventKind::Create(_)) => {
                for path in ev.paths.into_iter().filter(|p| is_paper_file(p)) {
                    if tx.try_send(path).is_err() {
                        tracing::warn!("Intake queue full or closed, dropping event");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Intake watcher error: {e}"),
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    tracing::info!("Watching {} for new exam papers", watch_dir.display());
    Ok(watcher)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
