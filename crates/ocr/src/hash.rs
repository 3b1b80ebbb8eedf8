use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Lowercase hex SHA-256 of `data` (64 chars).
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Where an uploaded paper with this digest lives in the store:
/// `<root>/<first 2 hex chars>/<digest>.<ext>`.
pub fn paper_path(root: &Path, digest: &str, ext: &str) -> PathBuf {
    let shard = digest.get(..2).unwrap_or("00");
    root.join(shard).join(format!("{digest}.{}", ext.to_ascii_lowercase()))
}

/// A copy of an uploaded paper kept under its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPaper {
    pub digest: String,
    pub path: PathBuf,
    /// The same bytes had already been uploaded before.
    pub duplicate: bool,
}

/// Content-addressed store for original exam papers.
#[derive(Debug, Clone)]
pub struct PaperStore {
    root: PathBuf,
}

impl PaperStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store(&self, data: &[u8], ext: &str) -> std::io::Result<StoredPaper> {
        let digest = sha256_hex(data);
        let path = paper_path(&self.root, &digest, ext);

        if tokio::fs::try_exists(&path).await? {
            tracing::info!("Paper {digest} already stored, skipping write");
            return Ok(StoredPaper { digest, path, duplicate: true });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(StoredPaper { digest, path, duplicate: false })
    }
}
