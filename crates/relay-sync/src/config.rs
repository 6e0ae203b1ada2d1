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
//! │     RELAY_DEVICE_ID=abc-123                                            │
//! │     RELAY_BUSINESS_ID=biz-42                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/relay-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.relay.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device_id, batch_size 100, page_size 200            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [tenant]
//! business_id = "biz-42"
//! shop_ids = ["shop-downtown", "shop-airport"]
//!
//! [sync]
//! batch_size = 100
//! page_size = 200
//! poll_interval_secs = 30
//! max_parallel_shops = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
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
// Tenant Configuration
// =============================================================================

/// The tenant this device is provisioned for.
///
/// A device belongs to exactly one business and syncs one or more of its
/// shops. The tenant guard rejects anything outside this scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    /// The business (top-level tenant) this device belongs to.
    pub business_id: String,

    /// Shops this device syncs, all within `business_id`.
    #[serde(default)]
    pub shop_ids: Vec<String>,
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Number of log entries to upload per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Number of change records to request per download page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Interval between scheduled sync cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Deadline for a single transport call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Initial backoff duration (milliseconds) after a failed cycle.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) after repeated failures.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Maximum number of shops synced concurrently during bulk sync.
    #[serde(default = "default_max_parallel_shops")]
    pub max_parallel_shops: usize,
}

fn default_batch_size() -> u32 {
    100
}
fn default_page_size() -> u32 {
    200
}
fn default_poll_interval() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}
fn default_max_parallel_shops() -> usize {
    4
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_parallel_shops: default_max_parallel_shops(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Tenant provisioning.
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Loads configuration with the standard priority chain.
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
        if self.device.id.is_empty() {
            return Err(SyncError::InvalidConfig("device.id must be set".into()));
        }

        if self.tenant.business_id.is_empty() {
            return Err(SyncError::InvalidConfig(
                "tenant.business_id must be set".into(),
            ));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be greater than 0".into(),
            ));
        }

        if self.sync.max_parallel_shops == 0 {
            return Err(SyncError::InvalidConfig(
                "max_parallel_shops must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("RELAY_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("RELAY_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(id) = std::env::var("RELAY_BUSINESS_ID") {
            debug!(business_id = %id, "Overriding business ID from environment");
            self.tenant.business_id = id;
        }

        // Comma-separated list: RELAY_SHOP_IDS=shop-1,shop-2
        if let Ok(shops) = std::env::var("RELAY_SHOP_IDS") {
            self.tenant.shop_ids = shops
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(interval) = std::env::var("RELAY_POLL_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.sync.poll_interval_secs = secs;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "relay", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the business ID.
    pub fn business_id(&self) -> &str {
        &self.tenant.business_id
    }

    /// Returns the provisioned shop IDs.
    pub fn shop_ids(&self) -> &[String] {
        &self.tenant.shop_ids
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.tenant.business_id = "biz-1".into();
        config.tenant.shop_ids = vec!["shop-1".into()];
        config
    }

    #[test]
    fn default_config_generates_device_id() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert!(Uuid::parse_str(&config.device.id).is_ok());
    }

    #[test]
    fn validation_requires_business_id() {
        let config = SyncConfig::default();
        assert!(config.validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_sizes() {
        let mut config = valid_config();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sync.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_settings() {
        let mut config = valid_config();
        config.sync.batch_size = 42;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SyncConfig = toml::from_str(&text).unwrap();

        assert_eq!(parsed.sync.batch_size, 42);
        assert_eq!(parsed.tenant.business_id, "biz-1");
    }
}
