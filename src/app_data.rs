//! Application data embedded from TOML at compile time.
//!
//! This module provides access to application-level constants that are:
//! - Embedded at compile time via `include_str!`
//! - Parsed lazily on first access via `OnceLock`
//! - Immutable at runtime (not user-configurable)
//!
//! This is distinct from `config.rs` which handles user preferences.
//! App data defines *how the publishing service works* (endpoints, limits, delays),
//! while config defines *user choices* (environment, default title).

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::session::Environment;

const PUBLISHER_TOML: &str = include_str!("../embedded/publisher.toml");

/// Publishing service configuration
#[derive(Debug, Deserialize)]
pub struct PublisherData {
    pub api: ApiData,
    pub archive: ArchiveData,
    pub build: BuildData,
    pub timing: TimingData,
}

#[derive(Debug, Deserialize)]
pub struct ApiData {
    pub upload_endpoint: String,
    pub progress_endpoint: String,
    pub requested_with: String,
    pub request_timeout_seconds: u64,
    pub base_urls: EnvironmentUrls,
    pub login_urls: EnvironmentUrls,
}

/// One URL per service environment
#[derive(Debug, Deserialize)]
pub struct EnvironmentUrls {
    pub production: String,
    pub staging: String,
    pub dev: String,
}

impl EnvironmentUrls {
    pub fn for_env(&self, env: Environment) -> &str {
        match env {
            Environment::Production => &self.production,
            Environment::Staging => &self.staging,
            Environment::Dev => &self.dev,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ArchiveData {
    pub file_name: String,
    pub max_size_bytes: u64,
    pub compression_level: u8,
}

#[derive(Debug, Deserialize)]
pub struct BuildData {
    pub guid_file: String,
    pub version_file: String,
    pub undefined_guid: String,
    pub default_title: String,
    pub max_tracked: usize,
}

#[derive(Debug, Deserialize)]
pub struct TimingData {
    pub upload_sample_interval_ms: u64,
    pub progress_poll_delay_ms: u64,
    pub login_check_delay_ms: u64,
}

impl TimingData {
    pub fn upload_sample_interval(&self) -> Duration {
        Duration::from_millis(self.upload_sample_interval_ms)
    }

    pub fn progress_poll_delay(&self) -> Duration {
        Duration::from_millis(self.progress_poll_delay_ms)
    }

    pub fn login_check_delay(&self) -> Duration {
        Duration::from_millis(self.login_check_delay_ms)
    }
}

/// Get publisher configuration (lazy-loaded)
pub fn publisher_data() -> &'static PublisherData {
    static DATA: OnceLock<PublisherData> = OnceLock::new();
    DATA.get_or_init(|| {
        toml::from_str(PUBLISHER_TOML).unwrap_or_else(|e| {
            panic!("Failed to parse publisher.toml: {}", e);
        })
    })
}
