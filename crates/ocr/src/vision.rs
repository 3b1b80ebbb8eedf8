//! Cloud document-text-detection backend (Google Cloud Vision REST API).

use base64::{engine::general_purpose, Engine as _};
use examscan_core::OcrConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::Mutex;

use crate::recognizer::{OcrBackend, OcrError};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of the signed assertion, in seconds. The token server caps it at one hour.
const ASSERTION_LIFETIME: i64 = 3600;

/// A cached token is renewed this many seconds before it expires.
const TOKEN_EXPIRY_MARGIN: i64 = 60;

/// How requests are authorised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionAuth {
    /// Sent as the `key` query parameter.
    ApiKey(String),
    /// Sent as an `Authorization: Bearer` header.
    AccessToken(String),
    /// Exchanged for short-lived access tokens with a signed JWT.
    ServiceAccount(ServiceAccountKey),
}

/// The parts of a service-account key file needed for the JWT bearer flow.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PEM encoded RSA private key.
    pub private_key: String,
    pub private_key_id: Option<String>,
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    /// RS256-signed assertion asking for a token valid from `now`.
    fn assertion(&self, now: i64) -> Result<String, OcrError> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|e| {
            OcrError::Credentials(format!("invalid service account private key: {e}"))
        })?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: TOKEN_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME,
        };
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| OcrError::Credentials(format!("failed to sign token request: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    api_key: Option<String>,
    access_token: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    private_key_id: Option<String>,
    token_uri: Option<String>,
}

impl VisionAuth {
    /// Reads a JSON credentials file: a service-account key as downloaded
    /// from the cloud console, or a file holding `api_key` or `access_token`.
    pub fn from_credentials_file(path: &Path) -> Result<Self, OcrError> {
        tracing::debug!("Reading OCR credentials from {}", path.display());
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OcrError::Credentials(format!("credentials file not found: {} ({e})", path.display()))
        })?;
        Self::from_credentials_json(&raw)
    }

    pub fn from_credentials_json(raw: &str) -> Result<Self, OcrError> {
        let file: CredentialsFile = serde_json::from_str(raw)
            .map_err(|e| OcrError::Credentials(format!("invalid credentials file: {e}")))?;
        let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        if let Some(key) = non_blank(file.api_key) {
            return Ok(VisionAuth::ApiKey(key));
        }
        if let Some(token) = non_blank(file.access_token) {
            return Ok(VisionAuth::AccessToken(token));
        }
        match (non_blank(file.client_email), non_blank(file.private_key)) {
            (Some(client_email), Some(private_key)) => {
                Ok(VisionAuth::ServiceAccount(ServiceAccountKey {
                    client_email,
                    private_key,
                    private_key_id: non_blank(file.private_key_id),
                    token_uri: non_blank(file.token_uri)
                        .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                }))
            }
            _ => Err(OcrError::Credentials(
                "credentials file has no `api_key`, `access_token` or service account key"
                    .to_string(),
            )),
        }
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateBatch<'a> {
    requests: [AnnotateRequest<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateRequest<'a> {
    image: ImageContent,
    features: [Feature; 1],
    image_context: ImageContext<'a>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext<'a> {
    language_hints: [&'a str; 1],
    text_detection_params: TextDetectionParams,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextDetectionParams {
    enable_text_detection_confidence_score: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotateBatchResponse {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: i64,
}

fn default_token_lifetime() -> i64 {
    ASSERTION_LIFETIME
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Long-lived client for the text-detection service. Build it once at
/// startup and pass it to the pipeline; the HTTP connection pool inside is
/// reused for every page.
pub struct VisionRecognizer {
    client: reqwest::Client,
    endpoint: String,
    auth: VisionAuth,
    language_hint: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    /// Unix seconds after which the token is renewed.
    renew_at: i64,
}

impl VisionRecognizer {
    pub fn new(auth: VisionAuth, endpoint: impl Into<String>, language_hint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            auth,
            language_hint: language_hint.into(),
            token: Mutex::new(None),
        }
    }

    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        let path = config.credentials_path.as_deref().ok_or_else(|| {
            OcrError::Credentials(format!(
                "no credentials path configured (set {})",
                examscan_core::config::CREDENTIALS_ENV
            ))
        })?;
        let auth = VisionAuth::from_credentials_file(path)?;
        Ok(Self::new(auth, &config.endpoint, &config.language_hint))
    }

    fn request_body(&self, image_bytes: &[u8]) -> AnnotateBatch<'_> {
        AnnotateBatch {
            requests: [AnnotateRequest {
                image: ImageContent { content: general_purpose::STANDARD.encode(image_bytes) },
                features: [Feature { kind: "DOCUMENT_TEXT_DETECTION" }],
                image_context: ImageContext {
                    language_hints: [self.language_hint.as_str()],
                    text_detection_params: TextDetectionParams {
                        enable_text_detection_confidence_score: true,
                    },
                },
            }],
        }
    }
}

impl VisionRecognizer {
    /// Access token for a service account, exchanged on first use and
    /// cached until shortly before it expires.
    async fn service_token(&self, key: &ServiceAccountKey) -> Result<String, OcrError> {
        let now = chrono::Utc::now().timestamp();
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.renew_at > now) {
            return Ok(token.value.clone());
        }

        tracing::debug!("Requesting access token for {}", key.client_email);
        let assertion = key.assertion(now)?;
        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Credentials(format!("token exchange returned {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            renew_at: now + token.expires_in - TOKEN_EXPIRY_MARGIN,
        });
        Ok(token.access_token)
    }
}

fn transcript_from_response(batch: AnnotateBatchResponse) -> Result<String, OcrError> {
    let response = batch.responses.into_iter().next().unwrap_or_default();
    if let Some(status) = response.error {
        return Err(OcrError::Engine(format!("{} (code {})", status.message, status.code)));
    }
    // A page without any recognisable text has no annotation at all.
    Ok(response.full_text_annotation.map(|a| a.text).unwrap_or_default())
}

impl OcrBackend for VisionRecognizer {
    async fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        if image_bytes.is_empty() {
            return Err(OcrError::ImageDecode("empty image".to_string()));
        }

        let request = self.client.post(&self.endpoint).json(&self.request_body(image_bytes));
        let request = match &self.auth {
            VisionAuth::ApiKey(key) => request.query(&[("key", key)]),
            VisionAuth::AccessToken(token) => request.bearer_auth(token),
            VisionAuth::ServiceAccount(key) => request.bearer_auth(self.service_token(key).await?),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Engine(format!("service returned {status}: {body}")));
        }

        let batch: AnnotateBatchResponse = response.json().await?;
        transcript_from_response(batch)
    }
}
