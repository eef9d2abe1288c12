//! Process-wide settings.
//!
//! Loaded once at start-up from a JSON file and then shared as an
//! `Arc<Settings>` with every component that needs it. Every field has a
//! default so a partial (or missing) file is valid.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Minimum number of days a certificate should remain valid when its renewal runs.
pub const DEFAULT_MIN_VALID_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schedule: ScheduleSettings,
    pub cache: CacheSettings,
    pub execution: ExecutionSettings,
    pub script: ScriptSettings,
    pub acme: AcmeSettings,
    pub store: StoreSettings,
    pub validation: ValidationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Days after first issuance of the current certificate before it is renewed.
    pub renewal_days: i64,
    /// Renew at the latest this many days before expiry; `None` means 7.
    pub renewal_minimum_valid_days: Option<i64>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            renewal_days: 55,
            renewal_minimum_valid_days: None,
        }
    }
}

impl ScheduleSettings {
    pub fn minimum_valid_days(&self) -> i64 {
        self.renewal_minimum_valid_days
            .unwrap_or(DEFAULT_MIN_VALID_DAYS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub path: PathBuf,
    /// Cached certificates younger than this may be reused instead of ordering again.
    pub reuse_days: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("certificates"),
            reuse_days: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub default_pre_execution_script: Option<String>,
    pub default_post_execution_script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    pub timeout_seconds: u64,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeSettings {
    /// Common name of the preferred root issuer when alternate chains are offered.
    pub preferred_issuer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub pem_files_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Port of the self-hosted HTTP-01 listener; 0 disables it.
    pub http_port: u16,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            http_port: 80,
            poll_attempts: 10,
            poll_interval_ms: 2000,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "[settings] {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse settings in {}", path.display()))?;
        debug!("[settings] loaded from {}", path.display());
        Ok(settings)
    }

    /// Settings rooted in a specific data directory, used by tests and embedders.
    pub fn with_data_dir(dir: &Path) -> Self {
        let mut settings = Self::default();
        settings.cache.path = dir.join("certificates");
        settings
    }
}

/// `SSLBOARD_RENEWAL_DATA`, or the per-user local data directory.
///
/// Cached keys and certificates must survive reboots, so this never points
/// at the temp directory.
fn default_data_dir() -> PathBuf {
    std::env::var_os("SSLBOARD_RENEWAL_DATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sslboard-renewal")
        })
}
