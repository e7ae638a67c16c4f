//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path (or absolute URL) under which uploads are reachable. Upload IDs
    /// are appended directly, so this should end with a slash.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Maximum total size of a single upload in bytes. 0 means unlimited.
    #[serde(default)]
    pub max_size: u64,
    /// Idle timeout for reading the request body, in seconds. The deadline
    /// is refreshed after every received chunk.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// How long a handler waits for a contended per-upload lock, in seconds.
    #[serde(default = "default_acquire_lock_timeout_secs")]
    pub acquire_lock_timeout_secs: u64,
    /// Grace period after request cancellation during which the store may
    /// still finalize its state, in seconds.
    #[serde(default = "default_graceful_completion_timeout_secs")]
    pub graceful_request_completion_timeout_secs: u64,
    /// Interval between upload progress notifications, in milliseconds.
    #[serde(default = "default_upload_progress_interval_ms")]
    pub upload_progress_interval_ms: u64,
    /// Trust `Forwarded` / `X-Forwarded-*` headers when composing absolute
    /// upload URLs. Enable only behind a trusted reverse proxy.
    #[serde(default)]
    pub respect_forwarded_headers: bool,
    /// Disable the GET download endpoint (not part of the tus protocol).
    #[serde(default)]
    pub disable_download: bool,
    /// Disable the DELETE termination endpoint even if the store supports it.
    #[serde(default)]
    pub disable_termination: bool,
    /// Accept requests speaking the IETF resumable upload draft in addition
    /// to tus v1.
    #[serde(default)]
    pub enable_experimental_protocol: bool,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Notification channel flags.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// CORS behavior.
    #[serde(default)]
    pub cors: CorsConfig,
}

/// Which notification channels emit events. Emission blocks the handling
/// request until the consumer receives, so only enable channels that are
/// actually consumed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub created_uploads: bool,
    #[serde(default)]
    pub upload_progress: bool,
    #[serde(default)]
    pub complete_uploads: bool,
    #[serde(default)]
    pub terminated_uploads: bool,
}

/// CORS configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Disable all CORS handling.
    #[serde(default)]
    pub disable: bool,
    /// Regular expression an Origin header must match.
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "default_allow_methods")]
    pub allow_methods: String,
    #[serde(default = "default_allow_headers")]
    pub allow_headers: String,
    #[serde(default = "default_max_age")]
    pub max_age: String,
    #[serde(default = "default_expose_headers")]
    pub expose_headers: String,
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for upload data and descriptors.
        path: PathBuf,
    },
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_base_path() -> String {
    "/files/".to_string()
}

fn default_network_timeout_secs() -> u64 {
    60
}

fn default_acquire_lock_timeout_secs() -> u64 {
    20
}

fn default_graceful_completion_timeout_secs() -> u64 {
    10
}

fn default_upload_progress_interval_ms() -> u64 {
    1000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_allow_origin() -> String {
    ".*".to_string()
}

fn default_allow_methods() -> String {
    "POST, HEAD, PATCH, OPTIONS, GET, DELETE".to_string()
}

fn default_allow_headers() -> String {
    "Authorization, Origin, X-Requested-With, X-Request-ID, X-HTTP-Method-Override, \
     Content-Type, Upload-Length, Upload-Offset, Tus-Resumable, Upload-Metadata, \
     Upload-Defer-Length, Upload-Concat, Upload-Complete, Upload-Draft-Interop-Version"
        .to_string()
}

fn default_max_age() -> String {
    "86400".to_string()
}

fn default_expose_headers() -> String {
    "Upload-Offset, Location, Upload-Length, Tus-Version, Tus-Resumable, Tus-Max-Size, \
     Tus-Extension, Upload-Metadata, Upload-Defer-Length, Upload-Concat, Upload-Complete, \
     Upload-Draft-Interop-Version"
        .to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_path: default_base_path(),
            max_size: 0,
            network_timeout_secs: default_network_timeout_secs(),
            acquire_lock_timeout_secs: default_acquire_lock_timeout_secs(),
            graceful_request_completion_timeout_secs: default_graceful_completion_timeout_secs(),
            upload_progress_interval_ms: default_upload_progress_interval_ms(),
            respect_forwarded_headers: false,
            disable_download: false,
            disable_termination: false,
            enable_experimental_protocol: false,
            metrics_enabled: default_metrics_enabled(),
            notify: NotifyConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            disable: false,
            allow_origin: default_allow_origin(),
            allow_credentials: false,
            allow_methods: default_allow_methods(),
            allow_headers: default_allow_headers(),
            max_age: default_max_age(),
            expose_headers: default_expose_headers(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/uploads"),
        }
    }
}

impl ServerConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn acquire_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_lock_timeout_secs)
    }

    pub fn graceful_request_completion_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_request_completion_timeout_secs)
    }

    pub fn upload_progress_interval(&self) -> Duration {
        Duration::from_millis(self.upload_progress_interval_ms.max(1))
    }

    /// Whether the configured base path is already an absolute URL.
    pub fn base_path_is_absolute(&self) -> bool {
        self.base_path.starts_with("http://") || self.base_path.starts_with("https://")
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_path.ends_with('/') {
            return Err(format!(
                "server.base_path must end with a slash, got {:?}",
                self.base_path
            ));
        }
        if self.network_timeout_secs == 0 {
            return Err("server.network_timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage under ./data.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.base_path_is_absolute());
        assert_eq!(config.network_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_base_path_must_end_with_slash() {
        let config = ServerConfig {
            base_path: "/files".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_absolute_base_path_detected() {
        let config = ServerConfig {
            base_path: "https://uploads.example.com/files/".to_string(),
            ..Default::default()
        };
        assert!(config.base_path_is_absolute());
    }

    #[test]
    fn test_progress_interval_never_zero() {
        let config = ServerConfig {
            upload_progress_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.upload_progress_interval(), Duration::from_millis(1));
    }
}
