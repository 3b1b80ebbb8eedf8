use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

const PDFTOPPM: &str = "pdftoppm";

#[derive(Debug, Error)]
pub enum RasterizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF rasterizer exited with {status}: {stderr}")]
    Failed { status: std::process::ExitStatus, stderr: String },
    #[error("PDF rasterizer produced no image for {0}")]
    NoOutput(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Pdf,
    Image,
}

impl PageKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => PageKind::Pdf,
            _ => PageKind::Image,
        }
    }
}

/// Turns an uploaded page into image bytes. PDFs are rendered through
/// poppler's `pdftoppm`, first page only; anything else is passed through.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    binary: PathBuf,
    dpi: u32,
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self { binary: PathBuf::from(PDFTOPPM), dpi: 200 }
    }
}

impl Rasterizer {
    /// `poppler_dir` is the directory holding the poppler binaries. When it
    /// is missing or does not exist the binary is looked up on `PATH`.
    pub fn new(poppler_dir: Option<&Path>, dpi: u32) -> Self {
        let binary = match poppler_dir {
            Some(dir) if dir.is_dir() => dir.join(PDFTOPPM),
            Some(dir) => {
                tracing::warn!(
                    "Poppler path {} not found, using the default PATH",
                    dir.display()
                );
                PathBuf::from(PDFTOPPM)
            }
            None => {
                tracing::warn!("Poppler path not configured, using the default PATH");
                PathBuf::from(PDFTOPPM)
            }
        };
        Self { binary, dpi }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Returns the raster bytes for `path`. `contents` is the already-read
    /// file, used as-is for images.
    pub async fn page_image(&self, path: &Path, contents: &[u8]) -> Result<Vec<u8>, RasterizeError> {
        match PageKind::from_path(path) {
            PageKind::Image => Ok(contents.to_vec()),
            PageKind::Pdf => self.render_first_page(path).await,
        }
    }

    /// Renders page 1 into a temporary directory and reads it back. The
    /// directory is removed when this returns.
    async fn render_first_page(&self, pdf: &Path) -> Result<Vec<u8>, RasterizeError> {
        let scratch = tempfile::tempdir()?;
        let prefix = scratch.path().join("page");

        let output = Command::new(&self.binary)
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg("1")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg("-singlefile")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .await
            .map_err(|source| RasterizeError::Spawn { binary: self.binary.clone(), source })?;

        if !output.status.success() {
            return Err(RasterizeError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let rendered = prefix.with_extension("png");
        match tokio::fs::read(&rendered).await {
            Ok(bytes) => {
                tracing::debug!("Rendered {} ({} bytes)", pdf.display(), bytes.len());
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RasterizeError::NoOutput(pdf.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_kind_by_extension() {
        assert_eq!(PageKind::from_path(Path::new("scan.PDF")), PageKind::Pdf);
        assert_eq!(PageKind::from_path(Path::new("scan.pdf")), PageKind::Pdf);
        assert_eq!(PageKind::from_path(Path::new("scan.jpeg")), PageKind::Image);
        assert_eq!(PageKind::from_path(Path::new("scan")), PageKind::Image);
    }

    #[test]
    fn missing_poppler_dir_falls_back_to_path() {
        let r = Rasterizer::new(Some(Path::new("/definitely/not/here")), 200);
        assert_eq!(r.binary(), Path::new(PDFTOPPM));
    }

    #[test]
    fn existing_poppler_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let r = Rasterizer::new(Some(dir.path()), 200);
        assert_eq!(r.binary(), dir.path().join(PDFTOPPM));
    }

    #[tokio::test]
    async fn images_pass_through() {
        let r = Rasterizer::default();
        let bytes = r.page_image(Path::new("a.png"), b"png-bytes").await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn unavailable_rasterizer_is_an_error() {
        let r = Rasterizer { binary: PathBuf::from("/no/such/pdftoppm"), dpi: 200 };
        let err = r.page_image(Path::new("exam.pdf"), b"%PDF").await.unwrap_err();
        assert!(matches!(err, RasterizeError::Spawn { .. }));
    }
}
