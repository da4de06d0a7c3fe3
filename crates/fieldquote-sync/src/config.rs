//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FIELDQUOTE_API_URL=https://api.example.com                         │
//! │     FIELDQUOTE_MAX_ATTEMPTS=8                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fieldquote/fieldquote.toml (Linux)                       │
//! │     ~/Library/Application Support/com.fieldquote.fieldquote/... (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 attempts, 1.5s recovery dwell, memory fallback allowed           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Van 3"
//!
//! [api]
//! base_url = "https://api.fieldquote.example"
//! request_timeout_secs = 15
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 1000
//! max_backoff_secs = 300
//! multiplier = 2.0
//!
//! [connectivity]
//! recovery_dwell_ms = 1500
//! probe_interval_secs = 30
//!
//! [storage]
//! allow_memory_fallback = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4), generated on first run.
    pub id: String,

    /// Human-readable device name (e.g., "Van 3").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Field Device".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the record-creation and blob upload API.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-request timeout for replayed actions and uploads (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Try to send a write straight away when online.
    #[serde(default = "default_true")]
    pub immediate_send: bool,

    /// Upper bound on an immediate send before falling back to the queue
    /// (milliseconds).
    #[serde(default = "default_immediate_send_timeout")]
    pub immediate_send_timeout_ms: u64,
}

fn default_request_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_immediate_send_timeout() -> u64 {
    3_000
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: None,
            token: None,
            request_timeout_secs: default_request_timeout(),
            immediate_send: true,
            immediate_send_timeout_ms: default_immediate_send_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Per-action retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Failed attempts before an action is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Cap on the delay between attempts (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    1_000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Connectivity monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// How long the platform must report online before recovery fires
    /// (milliseconds).
    #[serde(default = "default_recovery_dwell")]
    pub recovery_dwell_ms: u64,

    /// Interval between reachability probes (seconds). 0 disables probing.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Treat the device as offline: no immediate sends, no replay.
    #[serde(default)]
    pub force_offline: bool,
}

fn default_recovery_dwell() -> u64 {
    1_500
}
fn default_probe_interval() -> u64 {
    30
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            recovery_dwell_ms: default_recovery_dwell(),
            probe_interval_secs: default_probe_interval(),
            force_offline: false,
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Run in memory, with a warning, when the file cannot be used.
    #[serde(default = "default_true")]
    pub allow_memory_fallback: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: None,
            allow_memory_fallback: true,
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (fieldquote.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if let Some(ref raw) = self.api.base_url {
            let url = Url::parse(raw)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "API URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.api.request_timeout_secs == 0 || self.api.immediate_send_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "request timeouts must be greater than 0".into(),
            ));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if retry.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.initial_backoff_ms must be greater than 0".into(),
            ));
        }
        if retry.max_backoff_secs.saturating_mul(1_000) < retry.initial_backoff_ms {
            return Err(SyncError::InvalidConfig(
                "retry.max_backoff_secs must not be shorter than the initial backoff".into(),
            ));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "retry.multiplier must be a finite number >= 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("FIELDQUOTE_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(url) = lookup("FIELDQUOTE_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = Some(url);
        }

        if let Some(token) = lookup("FIELDQUOTE_API_TOKEN") {
            self.api.token = Some(token);
        }

        if let Some(path) = lookup("FIELDQUOTE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(attempts) = lookup("FIELDQUOTE_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid FIELDQUOTE_MAX_ATTEMPTS"),
            }
        }

        if let Some(offline) = lookup("FIELDQUOTE_OFFLINE") {
            match offline.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.connectivity.force_offline = true,
                "0" | "false" | "no" => self.connectivity.force_offline = false,
                _ => warn!(value = %offline, "Unknown FIELDQUOTE_OFFLINE value"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "fieldquote", "fieldquote")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("fieldquote.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn api_url(&self) -> Option<&str> {
        self.api.base_url.as_deref()
    }

    /// SQLite file: configured path, else `<data dir>/fieldquote.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(|| {
            Self::project_dirs().map(|dirs| dirs.data_dir().join("fieldquote.db"))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn immediate_send_timeout(&self) -> Duration {
        Duration::from_millis(self.api.immediate_send_timeout_ms)
    }

    pub fn recovery_dwell(&self) -> Duration {
        Duration::from_millis(self.connectivity.recovery_dwell_ms)
    }

    /// `None` when probing is disabled.
    pub fn probe_interval(&self) -> Option<Duration> {
        match self.connectivity.probe_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
