use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR service credentials unavailable: {0}")]
    Credentials(String),
    #[error("OCR service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Tesseract not available, build with the `tesseract` feature")]
    NotAvailable,
}

/// Abstraction over a text-recognition engine.
///
/// Implementations take PNG/JPEG bytes of one page and return the full-page
/// transcript as a single string. One backend instance is created up front and
/// shared for every page of a batch.
pub trait OcrBackend: Send + Sync {
    fn recognize(
        &self,
        image_bytes: &[u8],
    ) -> impl Future<Output = Result<String, OcrError>> + Send;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a preset transcript, so the extraction path can be exercised
/// without a network service or a local engine.
pub struct MockRecognizer {
    pub text: String,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrBackend for MockRecognizer {
    async fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

/// Tesseract traineddata name for a two-letter language hint. Hints that
/// are already Tesseract names pass through unchanged.
pub fn tesseract_language(hint: &str) -> &str {
    match hint {
        "tr" => "tur",
        "en" => "eng",
        "de" => "deu",
        "fr" => "fra",
        other => other,
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{tesseract_language, OcrBackend, OcrError};
    use examscan_core::OcrConfig;
    use leptess::LepTess;

    /// Local engine; `lang` is a Tesseract language code such as `tur`.
    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }

        pub fn from_config(config: &OcrConfig) -> Self {
            Self::new(
                config.tesseract_data_path.as_ref().map(|p| p.display().to_string()),
                tesseract_language(&config.language_hint),
            )
        }

        pub fn lang(&self) -> &str {
            &self.lang
        }

        pub fn data_path(&self) -> Option<&str> {
            self.data_path.as_deref()
        }
    }

    impl OcrBackend for TesseractRecognizer {
        async fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
            let data_path = self.data_path.clone();
            let lang = self.lang.clone();
            let bytes = image_bytes.to_vec();
            tokio::task::spawn_blocking(move || {
                let mut lt = LepTess::new(data_path.as_deref(), &lang)
                    .map_err(|e| OcrError::Engine(e.to_string()))?;
                lt.set_image_from_mem(&bytes)
                    .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
                lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
            })
            .await
            .map_err(|e| OcrError::Engine(e.to_string()))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_preset_text() {
        let r = MockRecognizer::new("Ad Soyad: Jane Doe\nOgrenci No: 21253501");
        assert_eq!(
            r.recognize(b"fake image data").await.unwrap(),
            "Ad Soyad: Jane Doe\nOgrenci No: 21253501"
        );
    }

    #[test]
    fn language_hint_maps_to_traineddata() {
        assert_eq!(tesseract_language("tr"), "tur");
        assert_eq!(tesseract_language("en"), "eng");
        assert_eq!(tesseract_language("tur+eng"), "tur+eng");
    }

    #[cfg(feature = "tesseract")]
    #[test]
    fn tesseract_settings_come_from_config() {
        let config = examscan_core::OcrConfig {
            tesseract_data_path: Some("/usr/share/tessdata".into()),
            ..Default::default()
        };
        let r = tesseract_backend::TesseractRecognizer::from_config(&config);
        assert_eq!(r.lang(), "tur");
        assert_eq!(r.data_path(), Some("/usr/share/tessdata"));
    }

    #[tokio::test]
    async fn mock_ignores_image_content() {
        let r = MockRecognizer::new("Soru1");
        assert_eq!(r.recognize(b"anything").await.unwrap(), "Soru1");
        assert_eq!(r.recognize(b"").await.unwrap(), "Soru1");
    }
}
