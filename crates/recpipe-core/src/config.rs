//! Configuration for the migration pipeline.
//!
//! Typed structs mapping to the YAML configuration file, with per-field
//! serde defaults (so partial configs load), environment-variable overrides
//! for every credential, and validation that reports all problems at once.
//!
//! Note on defaults: `logging.console` and `active_users.check_enabled`
//! default to `true` only when the key is absent from the file; an explicit
//! `false` in the YAML is honored as written.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub zoom: ZoomConfig,
    #[serde(default, rename = "box")]
    pub r#box: BoxConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub active_users: ActiveUsersConfig,
}

/// Upstream (Zoom) API credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    /// Account id for the account-credentials grant
    pub account_id: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// REST API base URL
    pub base_url: String,
    /// Token endpoint URL
    pub auth_url: String,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://api.zoom.us/v2".to_string(),
            auth_url: "https://zoom.us/oauth/token".to_string(),
        }
    }
}

/// Downstream (Box) API credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxConfig {
    /// When false, files are downloaded and kept locally only
    pub enabled: bool,
    /// OAuth client id for the client-credentials grant
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Enterprise id the service account is scoped to
    pub enterprise_id: String,
    /// REST API base URL
    pub base_url: String,
    /// Upload host base URL
    pub upload_url: String,
    /// Token endpoint URL
    pub auth_url: String,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            client_secret: String::new(),
            enterprise_id: String::new(),
            base_url: "https://api.box.com/2.0".to_string(),
            upload_url: "https://upload.box.com/api/2.0".to_string(),
            auth_url: "https://api.box.com/oauth2/token".to_string(),
        }
    }
}

/// Pipeline behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory the local mirror is built under
    pub base_output_dir: PathBuf,
    /// Download retry attempts per file (0 = single attempt)
    pub retry_attempts: u32,
    /// Deadline for metadata HTTP requests, in seconds
    pub timeout_seconds: u64,
    /// Delete local files once they are durably placed downstream
    pub delete_after_upload: bool,
    /// Keep going past per-file and per-user failures
    pub continue_on_error: bool,
    /// Only produce and upload metadata sidecars, skip media bytes
    pub meta_only: bool,
    /// Stop a user after this many files (0 = unlimited)
    pub limit: u32,
    /// Log intended work without performing I/O
    pub dry_run: bool,
    /// Extra per-file progress logging
    pub verbose: bool,
    /// Age after which an in-flight `downloading` marker is considered
    /// abandoned by a crashed process, in seconds
    pub stale_download_secs: u64,
    /// Upload attempts per file before the entry is parked
    pub max_upload_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_output_dir: PathBuf::from("downloads"),
            retry_attempts: 3,
            timeout_seconds: 30,
            delete_after_upload: false,
            continue_on_error: true,
            meta_only: false,
            limit: 0,
            dry_run: false,
            verbose: false,
            stale_download_secs: 300,
            max_upload_attempts: 5,
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `debug`, `info`, `warn`, or `error`
    pub level: String,
    /// Emit JSON instead of human-readable text
    pub structured: bool,
    /// Log to the console
    pub console: bool,
    /// Also append to this file, when set
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            console: true,
            file: None,
        }
    }
}

/// Active Users File location and gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveUsersConfig {
    /// Path of the users file
    pub file_path: PathBuf,
    /// When true, users already marked complete are skipped
    pub check_enabled: bool,
}

impl Default for ActiveUsersConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("users.txt"),
            check_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and environment overrides
// ---------------------------------------------------------------------------

/// Environment variables that override credential fields.
const ENV_ZOOM_ACCOUNT_ID: &str = "ZOOM_ACCOUNT_ID";
const ENV_ZOOM_CLIENT_ID: &str = "ZOOM_CLIENT_ID";
const ENV_ZOOM_CLIENT_SECRET: &str = "ZOOM_CLIENT_SECRET";
const ENV_BOX_CLIENT_ID: &str = "BOX_CLIENT_ID";
const ENV_BOX_CLIENT_SECRET: &str = "BOX_CLIENT_SECRET";
const ENV_BOX_ENTERPRISE_ID: &str = "BOX_ENTERPRISE_ID";

impl Config {
    /// Loads configuration from a YAML file and applies environment
    /// overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default configuration with environment overrides applied; used when
    /// no config file exists.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Platform-appropriate default path for the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("recpipe")
            .join("recpipe.yaml")
    }

    /// Overrides each credential field from its environment variable when
    /// the variable is set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.zoom.account_id, ENV_ZOOM_ACCOUNT_ID);
        override_from_env(&mut self.zoom.client_id, ENV_ZOOM_CLIENT_ID);
        override_from_env(&mut self.zoom.client_secret, ENV_ZOOM_CLIENT_SECRET);
        override_from_env(&mut self.r#box.client_id, ENV_BOX_CLIENT_ID);
        override_from_env(&mut self.r#box.client_secret, ENV_BOX_CLIENT_SECRET);
        override_from_env(&mut self.r#box.enterprise_id, ENV_BOX_ENTERPRISE_ID);
    }
}

fn override_from_env(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"zoom.account_id"`
    pub field: String,
    /// Human-readable explanation
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

impl Config {
    /// Validates the configuration and returns all errors found.
    ///
    /// An empty vector means the configuration is valid. Missing upstream
    /// credentials are always an error; downstream credentials are only
    /// required while `box.enabled` is true.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut require = |field: &str, value: &str| {
            if value.is_empty() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        };

        require("zoom.account_id", &self.zoom.account_id);
        require("zoom.client_id", &self.zoom.client_id);
        require("zoom.client_secret", &self.zoom.client_secret);

        if self.r#box.enabled {
            require("box.client_id", &self.r#box.client_id);
            require("box.client_secret", &self.r#box.client_secret);
            require("box.enterprise_id", &self.r#box.enterprise_id);
        }

        if self.pipeline.timeout_seconds == 0 {
            errors.push(ValidationError {
                field: "pipeline.timeout_seconds".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.pipeline.stale_download_secs == 0 {
            errors.push(ValidationError {
                field: "pipeline.stale_download_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.pipeline.max_upload_attempts == 0 {
            errors.push(ValidationError {
                field: "pipeline.max_upload_attempts".into(),
                message: "must be greater than zero".into(),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "must be one of {}, got {:?}",
                    VALID_LOG_LEVELS.join(", "),
                    self.logging.level
                ),
            });
        }

        if self.active_users.file_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "active_users.file_path".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}
