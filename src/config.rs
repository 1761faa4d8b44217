//! Configuration management.
//!
//! Settings load in layers: built-in defaults, then an optional TOML file,
//! then environment variable overrides. Environment variables win so that
//! deployments can keep one config file and vary endpoints per host.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default maximum upload size: 50 MB.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// LLM completion backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Sampling temperature; kept low for deterministic extraction.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// OCR backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            endpoint: default_ocr_endpoint(),
            timeout_secs: default_ocr_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Upload storage and database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub cleanup_temp_files: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            database_url: default_database_url(),
            max_upload_size: default_max_upload_size(),
            allowed_extensions: default_allowed_extensions(),
            cleanup_temp_files: true,
        }
    }
}

/// PDF rasterization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfSettings {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self { dpi: default_dpi() }
    }
}

/// PII masking policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiSettings {
    #[serde(default = "default_mask_char")]
    pub mask_char: char,
    #[serde(default = "default_show_last")]
    pub show_last: usize,
}

impl Default for PiiSettings {
    fn default() -> Self {
        Self {
            mask_char: default_mask_char(),
            show_last: default_show_last(),
        }
    }
}

/// Confidence scoring weights and review threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceSettings {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_heuristic_weight")]
    pub heuristic_weight: f64,
    #[serde(default = "default_llm_weight")]
    pub llm_weight: f64,
}

impl Default for ConfidenceSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            heuristic_weight: default_heuristic_weight(),
            llm_weight: default_llm_weight(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. `["*"]` or empty means permissive.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub pdf: PdfSettings,
    #[serde(default)]
    pub pii: PiiSettings,
    #[serde(default)]
    pub confidence: ConfidenceSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl Settings {
    /// Load settings from an optional TOML file plus environment overrides.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply `STMT_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STMT_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Ok(v) = std::env::var("STMT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("STMT_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("STMT_OCR_ENDPOINT") {
            self.ocr.endpoint = v;
        }
        if let Ok(v) = std::env::var("STMT_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STMT_DATABASE_URL") {
            self.storage.database_url = v;
        }
        if let Ok(v) = std::env::var("STMT_PDF_DPI") {
            if let Ok(dpi) = v.parse() {
                self.pdf.dpi = dpi;
            }
        }
    }

    /// Directory for transient page images rendered during a run.
    pub fn temp_image_dir(&self) -> PathBuf {
        self.storage.upload_dir.join("tmp")
    }

    /// Whether a filename carries an allowed extension.
    pub fn extension_allowed(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.storage
            .allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5vl:7b".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_ocr_endpoint() -> String {
    "http://localhost:8002".to_string()
}

fn default_ocr_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_database_url() -> String {
    "sqlite:statements.db".to_string()
}

fn default_max_upload_size() -> u64 {
    DEFAULT_MAX_UPLOAD_SIZE
}

fn default_allowed_extensions() -> Vec<String> {
    vec![".pdf".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_dpi() -> u32 {
    300
}

fn default_mask_char() -> char {
    'X'
}

fn default_show_last() -> usize {
    4
}

fn default_threshold() -> f64 {
    0.70
}

fn default_heuristic_weight() -> f64 {
    0.6
}

fn default_llm_weight() -> f64 {
    0.4
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}
