use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CREDENTIALS_ENV: &str = "GOOGLE_CLOUD_CREDENTIALS_PATH";
pub const POPPLER_ENV: &str = "POPPLER_PATH";
pub const DATA_DIR_ENV: &str = "EXAMSCAN_DATA_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Service credentials file; see [`CREDENTIALS_ENV`].
    pub credentials_path: Option<PathBuf>,
    /// Language hint sent with every recognition request.
    pub language_hint: String,
    pub endpoint: String,
    /// Directory holding the poppler binaries; see [`POPPLER_ENV`].
    pub poppler_path: Option<PathBuf>,
    pub render_dpi: u32,
    /// `tessdata` directory for the local engine. Unset means Tesseract's own default.
    pub tesseract_data_path: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            language_hint: "tr".to_string(),
            endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
            poppler_path: None,
            render_dpi: 200,
            tesseract_data_path: None,
        }
    }
}

/// Which reconstructed table rows carry the maximum and earned scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowRoles {
    pub max_row: usize,
    pub earned_row: usize,
}

impl Default for RowRoles {
    fn default() -> Self {
        Self { max_row: 0, earned_row: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamscanConfig {
    /// Root for the database, stored papers and intake folder.
    pub data_dir: Option<PathBuf>,
    pub ocr: OcrConfig,
    pub rows: RowRoles,
}

impl ExamscanConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_content)?)
    }

    /// Loads `path` if it exists, otherwise starts from defaults. Environment
    /// overrides are applied either way.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&content)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overrides file settings with environment values. `lookup` is
    /// injected so tests do not have to touch the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(CREDENTIALS_ENV) {
            self.ocr.credentials_path = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(POPPLER_ENV) {
            self.ocr.poppler_path = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(DATA_DIR_ENV) {
            self.data_dir = Some(PathBuf::from(v));
        }
    }
}
