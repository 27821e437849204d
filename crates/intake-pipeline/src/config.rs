//! Configuration for the intake pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV: &str = "INTAKE_CONFIG";
/// Config file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "intake-pipeline.toml";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Job registry configuration
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Text chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Classification batching
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Retry and throttle policy for provider calls
    #[serde(default)]
    pub retry: RetryConfig,
    /// LLM provider endpoints and credentials
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// ffmpeg/ffprobe and staging
    #[serde(default)]
    pub media: MediaConfig,
    /// Spreadsheet sink
    #[serde(default)]
    pub sink: SinkConfig,
    /// Remote file download
    #[serde(default)]
    pub drive: DriveConfig,
    /// Drilldown workflow
    #[serde(default)]
    pub drilldown: DrilldownConfig,
}

impl AppConfig {
    /// Load configuration from `INTAKE_CONFIG`, the working directory, or defaults,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("INTAKE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("INTAKE_PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        for (id, provider) in self.providers.entries.iter_mut() {
            let var = format!("{}_API_KEYS", id.to_uppercase().replace('-', "_"));
            if let Ok(keys) = std::env::var(&var) {
                provider.api_keys = split_keys(&keys);
            }
        }
        if let Ok(token) = std::env::var("SHEETS_ACCESS_TOKEN") {
            self.sink.access_token = Some(token);
        }
        if let Ok(token) = std::env::var("DRIVE_ACCESS_TOKEN") {
            self.drive.access_token = Some(token);
        }
    }
}

/// Split a comma-separated credential list, dropping blanks
pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 1GB, videos)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 1024 * 1024 * 1024,
        }
    }
}

/// Job registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Terminal jobs older than this are dropped on the next manager call
    pub ttl_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
    /// How far past a cut to look for a newline
    pub newline_snap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 18_000,
            overlap: 1_200,
            newline_snap: 200,
        }
    }
}

/// Classification batching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Items per classification request
    pub batch_size: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

/// Retry policy for provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per credential before rotating to the next one
    pub max_attempts_per_key: u32,
    /// Upper bound on any single wait
    pub max_wait_secs: u64,
    /// Minimum spacing between consecutive calls to the same provider
    pub min_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_key: 4,
            max_wait_secs: 30,
            min_interval_ms: 250,
        }
    }
}

/// LLM providers keyed by identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used when a request does not name one
    #[serde(default = "default_provider_id")]
    pub default_provider: String,
    /// Provider definitions
    #[serde(flatten)]
    pub entries: HashMap<String, ProviderConfig>,
}

fn default_provider_id() -> String {
    "openai".to_string()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "openai".to_string(),
            ProviderConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                chat_model: "gpt-4o-mini".to_string(),
                ocr_model: "gpt-4o".to_string(),
                transcription_model: "whisper-1".to_string(),
                ..Default::default()
            },
        );
        entries.insert(
            "groq".to_string(),
            ProviderConfig {
                base_url: "https://api.groq.com/openai/v1".to_string(),
                chat_model: "llama-3.3-70b-versatile".to_string(),
                ocr_model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
                transcription_model: "whisper-large-v3".to_string(),
                ..Default::default()
            },
        );
        entries.insert(
            "gemini".to_string(),
            ProviderConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                chat_model: "gemini-2.5-flash".to_string(),
                ocr_model: "gemini-2.5-flash".to_string(),
                transcription_model: "gemini-2.5-flash".to_string(),
                ..Default::default()
            },
        );
        Self {
            default_provider: default_provider_id(),
            entries,
        }
    }
}

/// One OpenAI-compatible provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL (without trailing slash)
    pub base_url: String,
    /// Model used for extraction and classification
    pub chat_model: String,
    /// Vision model used for document OCR
    pub ocr_model: String,
    /// Speech-to-text model
    pub transcription_model: String,
    /// Credentials, rotated round-robin
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_ocr_timeout")]
    pub ocr_timeout_secs: u64,
    #[serde(default = "default_transcription_timeout")]
    pub transcription_timeout_secs: u64,
}

fn default_chat_timeout() -> u64 { 120 }
fn default_ocr_timeout() -> u64 { 180 }
fn default_transcription_timeout() -> u64 { 300 }

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            chat_model: String::new(),
            ocr_model: String::new(),
            transcription_model: String::new(),
            api_keys: Vec::new(),
            chat_timeout_secs: default_chat_timeout(),
            ocr_timeout_secs: default_ocr_timeout(),
            transcription_timeout_secs: default_transcription_timeout(),
        }
    }
}

/// Media toolchain and staging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// ffmpeg binary
    pub ffmpeg: PathBuf,
    /// ffprobe binary
    pub ffprobe: PathBuf,
    /// Root for per-job staging directories
    pub work_dir: PathBuf,
    /// Audio segment length before transcription
    pub segment_secs: u64,
    /// Smallest video accepted into a pipeline
    pub min_video_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            work_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("intake-pipeline")
                .join("staging"),
            segment_secs: 600,
            min_video_bytes: 100 * 1024,
        }
    }
}

/// Sink backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    /// Google Sheets values API
    #[default]
    Sheets,
    /// Keep rows in process memory (dry runs)
    Memory,
}

/// Spreadsheet sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub backend: SinkBackend,
    /// Default spreadsheet (requests may override)
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    /// Sheets API base URL
    pub base_url: String,
    /// OAuth bearer token
    #[serde(default)]
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    /// Default tab per workflow id
    #[serde(default)]
    pub tabs: HashMap<String, String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::Sheets,
            spreadsheet_id: None,
            base_url: "https://sheets.googleapis.com/v4".to_string(),
            access_token: None,
            timeout_secs: 60,
            tabs: HashMap::new(),
        }
    }
}

impl SinkConfig {
    /// Tab for a workflow, falling back to the workflow id itself
    pub fn tab_for(&self, workflow: &str) -> String {
        self.tabs
            .get(workflow)
            .cloned()
            .unwrap_or_else(|| workflow.to_string())
    }
}

/// Remote download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// OAuth bearer token for the authenticated fallback
    #[serde(default)]
    pub access_token: Option<String>,
    /// Drive API base URL
    pub api_base: String,
    /// Public Drive download host
    #[serde(default = "default_drive_download_base")]
    pub download_base: String,
    /// Google Docs host, for plain-text export
    #[serde(default = "default_docs_base")]
    pub docs_base: String,
    pub timeout_secs: u64,
}

fn default_drive_download_base() -> String {
    "https://drive.google.com".to_string()
}

fn default_docs_base() -> String {
    "https://docs.google.com".to_string()
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            download_base: default_drive_download_base(),
            docs_base: default_docs_base(),
            timeout_secs: 300,
        }
    }
}

/// Drilldown workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrilldownConfig {
    /// Concurrent logical workers claiming rows (1 = sequential)
    pub workers: usize,
}

impl Default for DrilldownConfig {
    fn default() -> Self {
        Self { workers: 3 }
    }
}
