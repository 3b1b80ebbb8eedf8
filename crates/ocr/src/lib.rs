pub mod extract;
pub mod hash;
pub mod pipeline;
pub mod preprocess;
pub mod rasterize;
pub mod recognizer;
pub mod types;
pub mod vision;

pub use extract::{ExtractError, ScoreExtractor};
pub use hash::{sha256_hex, PaperStore, StoredPaper};
pub use pipeline::{ExamPipeline, PipelineError, ProcessedPaper};
pub use preprocess::{prepare_page, PreprocessError};
pub use rasterize::{RasterizeError, Rasterizer};
pub use recognizer::{MockRecognizer, OcrBackend, OcrError};
pub use types::{ExtractionResult, ScoreTable, StudentIdentity, UNKNOWN_STUDENT_NAME};
pub use vision::{ServiceAccountKey, VisionAuth, VisionRecognizer};
