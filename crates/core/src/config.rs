//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Upload pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Block size in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Largest object accepted, in bytes.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
    /// Content types accepted. Empty accepts any.
    #[serde(default)]
    pub allowed_content_types: Vec<String>,
    /// Maximum number of blocks per object.
    #[serde(default = "default_max_block_count")]
    pub max_block_count: u64,
    /// Maximum blocks staged concurrently within one session.
    #[serde(default = "default_max_parallel_blocks")]
    pub max_parallel_blocks: u32,
    /// Deadline for a whole session, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

fn default_block_size() -> u64 {
    crate::DEFAULT_BLOCK_SIZE
}

fn default_max_object_size() -> u64 {
    crate::DEFAULT_MAX_OBJECT_SIZE
}

fn default_max_block_count() -> u64 {
    crate::MAX_BLOCK_COUNT
}

fn default_max_parallel_blocks() -> u32 {
    3
}

/// Longest session deadline accepted: 7 days
pub const MAX_SESSION_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

fn default_session_timeout_secs() -> u64 {
    3600 // 1 hour
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            max_object_size: default_max_object_size(),
            allowed_content_types: Vec::new(),
            max_block_count: default_max_block_count(),
            max_parallel_blocks: default_max_parallel_blocks(),
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl UploadConfig {
    /// Session deadline as a std Duration.
    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_timeout_secs)
    }

    /// Whether `content_type` may be uploaded.
    ///
    /// Parameters such as `; charset=utf-8` are ignored and matching is
    /// case-insensitive.
    pub fn allows_content_type(&self, content_type: Option<&str>) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < crate::MIN_BLOCK_SIZE || self.block_size > crate::MAX_BLOCK_SIZE {
            return Err(format!(
                "upload.block_size {} must be between {} and {}",
                self.block_size,
                crate::MIN_BLOCK_SIZE,
                crate::MAX_BLOCK_SIZE
            ));
        }
        if self.max_block_count == 0 || self.max_block_count > crate::MAX_BLOCK_COUNT {
            return Err(format!(
                "upload.max_block_count {} must be between 1 and {}",
                self.max_block_count,
                crate::MAX_BLOCK_COUNT
            ));
        }
        if self.max_object_size == 0 {
            return Err("upload.max_object_size cannot be 0".to_string());
        }
        if self.max_parallel_blocks == 0 {
            return Err("upload.max_parallel_blocks cannot be 0".to_string());
        }
        if self.session_timeout_secs == 0 {
            return Err("upload.session_timeout_secs cannot be 0".to_string());
        }
        if self.session_timeout_secs > MAX_SESSION_TIMEOUT_SECS {
            return Err(format!(
                "upload.session_timeout_secs {} exceeds maximum of {MAX_SESSION_TIMEOUT_SECS}",
                self.session_timeout_secs
            ));
        }
        Ok(())
    }
}

/// Retry policy for transient block staging failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per block, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the delay between retries, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Validate retry configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts cannot be 0".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "retry.base_delay_ms {} exceeds retry.max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Admission control configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Sustained admission attempts per second.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Attempts allowed in a burst above the sustained rate.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_burst() -> u32 {
    10
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl AdmissionConfig {
    /// Validate admission configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_second == 0 {
            return Err("admission.requests_per_second cannot be 0".to_string());
        }
        if self.burst == 0 {
            return Err("admission.burst cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Source of the shared key used to sign read links.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkKeyConfig {
    /// Key stored in a file (base64).
    File {
        /// Path to the key file.
        path: PathBuf,
    },
    /// Key stored in an environment variable (base64).
    Env {
        /// Environment variable name.
        var: String,
    },
    /// Key provided directly as a value (NOT recommended for production).
    Value {
        /// The base64 key.
        key: String,
    },
    /// Generate a new key at startup (links die with the process).
    Generate,
}

impl Default for LinkKeyConfig {
    fn default() -> Self {
        Self::Env {
            var: "CASK_ACCOUNT_KEY".to_string(),
        }
    }
}

/// Read-link configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Lifetime of issued links, in seconds.
    #[serde(default = "default_link_ttl_secs")]
    pub ttl_secs: u64,
    /// Base URL objects are served from (without container).
    #[serde(default = "default_link_endpoint")]
    pub endpoint: String,
    /// Account name included in the signed resource.
    #[serde(default = "default_link_account")]
    pub account: String,
    /// Container objects are committed into.
    #[serde(default = "default_link_container")]
    pub container: String,
    /// Signing key source.
    #[serde(default)]
    pub key: LinkKeyConfig,
}

fn default_link_ttl_secs() -> u64 {
    crate::DEFAULT_LINK_TTL_SECS
}

fn default_link_endpoint() -> String {
    "https://localhost:9000".to_string()
}

fn default_link_account() -> String {
    "cask".to_string()
}

fn default_link_container() -> String {
    "uploads".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_link_ttl_secs(),
            endpoint: default_link_endpoint(),
            account: default_link_account(),
            container: default_link_container(),
            key: LinkKeyConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Link lifetime as a time Duration.
    pub fn ttl(&self) -> time::Duration {
        let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Validate link configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("link.ttl_secs cannot be 0".to_string());
        }
        if self.ttl_secs > i64::MAX as u64 {
            return Err(format!(
                "link.ttl_secs {} exceeds maximum value {}",
                self.ttl_secs,
                i64::MAX
            ));
        }
        if self.container.is_empty() || self.container.contains('/') {
            return Err(format!(
                "link.container {:?} must be a single non-empty path segment",
                self.container
            ));
        }
        if self.account.is_empty() {
            return Err("link.account cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Local staging buffer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Spool the inbound stream to disk before staging blocks.
    #[serde(default = "default_staging_enabled")]
    pub enabled: bool,
    /// Directory for spool files (defaults to the system temp dir).
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Keep spool files after the session ends, for diagnostics.
    #[serde(default)]
    pub retain: bool,
}

fn default_staging_enabled() -> bool {
    true
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            enabled: default_staging_enabled(),
            dir: None,
            retain: false,
        }
    }
}

impl StagingConfig {
    /// Directory spool files are created in.
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local on-disk block store.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// In-process store, lost on restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload pipeline configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Block staging retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Admission control.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Read links.
    #[serde(default)]
    pub link: LinkConfig,
    /// Local staging buffer.
    #[serde(default)]
    pub staging: StagingConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses in-memory storage, no local spooling and a
    /// generated signing key.
    pub fn for_testing() -> Self {
        Self {
            staging: StagingConfig {
                enabled: false,
                ..Default::default()
            },
            storage: StorageConfig::Memory,
            link: LinkConfig {
                key: LinkKeyConfig::Generate,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.upload.validate()?;
        self.retry.validate()?;
        self.admission.validate()?;
        self.link.validate()?;
        Ok(())
    }
}
