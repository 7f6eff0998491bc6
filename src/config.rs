//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `BADEKOMPIS_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::JournalSyncMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub geocoding: GeocodingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reference backend storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub sync_mode: JournalSyncMode,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("badekompis"))
        .unwrap_or_else(|| PathBuf::from("./badekompis_data"))
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_mode: JournalSyncMode::default(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Externally visible base URL, used for upload download links
    #[serde(default)]
    pub public_url: Option<String>,

    /// Signed-in clients unused this long are dropped from memory
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Staged uploads not claimed within this many seconds are discarded
    #[serde(default = "default_upload_ttl_secs")]
    pub upload_ttl_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_session_idle_secs() -> u64 {
    3600
}

fn default_upload_ttl_secs() -> u64 {
    900
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            public_url: None,
            session_idle_secs: default_session_idle_secs(),
            upload_ttl_secs: default_upload_ttl_secs(),
        }
    }
}

impl ApiConfig {
    /// Socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Public base URL without trailing slash
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.host == "0.0.0.0" {
                    "localhost"
                } else {
                    self.host.as_str()
                };
                format!("http://{}:{}", host, self.port)
            }
        }
    }

    /// Prefix of download URLs for uploaded files
    pub fn media_url_prefix(&self) -> String {
        format!("{}/media", self.base_url())
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_ttl_secs)
    }
}

/// Credential system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_secs() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_secs: default_lockout_secs(),
        }
    }
}

/// Address lookup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    /// Without a geocoder every address resolves to a fixed point
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_geocoding_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_geocoding_timeout")]
    pub timeout_ms: u64,
}

fn default_geocoding_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    format!("badekompis/{}", env!("CARGO_PKG_VERSION"))
}

fn default_geocoding_timeout() -> u64 {
    5000
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_geocoding_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_geocoding_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        format!("badekompis={},tower_http=debug", self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse TOML content
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("badekompis").join("config.toml")),
            Some(PathBuf::from("/etc/badekompis/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(data_dir) = var("BADEKOMPIS_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(host) = var("BADEKOMPIS_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("BADEKOMPIS_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }
        if let Some(url) = var("BADEKOMPIS_PUBLIC_URL") {
            self.api.public_url = Some(url);
        }

        if let Some(url) = var("BADEKOMPIS_GEOCODING_URL") {
            self.geocoding.base_url = url;
            self.geocoding.enabled = true;
        }

        if let Some(level) = var("BADEKOMPIS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("BADEKOMPIS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Badekompis Configuration
#
# Environment variables override these settings:
# - BADEKOMPIS_DATA_DIR
# - BADEKOMPIS_API_HOST
# - BADEKOMPIS_API_PORT
# - BADEKOMPIS_PUBLIC_URL
# - BADEKOMPIS_GEOCODING_URL
# - BADEKOMPIS_LOG_LEVEL
# - BADEKOMPIS_LOG_FORMAT

[storage]
# Directory for documents, credentials and uploaded files
data_dir = "~/.local/share/badekompis"

# Journal sync: every_write, batched or none
sync_mode = "batched"

# Largest accepted upload (bytes)
max_upload_bytes = 10485760

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8082

# Allowed CORS origins (empty allows any)
cors_origins = []

# Base URL used in download links for uploads
# public_url = "https://badekompis.example.org"

# Idle signed-in clients are dropped after this many seconds
session_idle_secs = 3600

# Staged bath images must be claimed within this many seconds
upload_ttl_secs = 900

[auth]
# Failed sign-ins before an address is locked
max_failed_attempts = 5

# Lock duration (seconds)
lockout_secs = 300

[geocoding]
# Resolve plan-bath addresses through a Nominatim-compatible service
enabled = false
base_url = "https://nominatim.openstreetmap.org"
user_agent = "badekompis/0.1"
timeout_ms = 5000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
