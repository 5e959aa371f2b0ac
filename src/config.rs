//! Configuration for guide-dispatch

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::deadline::DeadlinePolicy;
use crate::error::DispatchError;
use crate::scoring::ScoringWeights;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("guide-dispatch")
}

/// Static bearer token mapped to a caller identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiToken {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite ledger store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP port for the trigger surface
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Run the expiry sweep on a timer
    #[serde(default = "default_true")]
    pub sweep_enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Auto-reassignments allowed per trip before an expiry becomes terminal
    #[serde(default = "default_max_reassignments")]
    pub max_reassignments: u32,

    /// Retry (trip, role) pairs left without a live assignment after a failed sweep
    #[serde(default)]
    pub requeue_unfilled: bool,

    /// Local wall-clock time of the confirmation cutoff, "HH:MM"
    #[serde(default = "default_confirmation_cutoff")]
    pub confirmation_cutoff: String,

    /// Offset of the deployment's local time from UTC, in minutes
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// Allowed gap between checkout and its earning before it is reported
    #[serde(default = "default_date_tolerance_hours")]
    pub date_tolerance_hours: i64,

    /// Roles allowed to trigger a sweep
    #[serde(default = "default_sweep_roles")]
    pub sweep_roles: Vec<String>,

    /// Roles allowed to run the audit
    #[serde(default = "default_audit_roles")]
    pub audit_roles: Vec<String>,

    /// Roles allowed to create and transition assignments over HTTP
    #[serde(default = "default_operator_roles")]
    pub operator_roles: Vec<String>,

    /// Bearer tokens accepted by the HTTP surface
    #[serde(default)]
    pub api_tokens: Vec<ApiToken>,

    /// Candidate scoring weights
    #[serde(default)]
    pub scoring: ScoringWeights,
}

fn default_http_port() -> u16 {
    8095
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    15 * 60
}

fn default_max_reassignments() -> u32 {
    3
}

fn default_confirmation_cutoff() -> String {
    "22:00".to_string()
}

fn default_utc_offset_minutes() -> i32 {
    7 * 60
}

fn default_date_tolerance_hours() -> i64 {
    24
}

fn default_sweep_roles() -> Vec<String> {
    vec!["admin".to_string(), "system".to_string()]
}

fn default_audit_roles() -> Vec<String> {
    vec!["admin".to_string(), "finance".to_string()]
}

fn default_operator_roles() -> Vec<String> {
    vec!["admin".to_string(), "operator".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            sweep_enabled: true,
            sweep_interval_secs: default_sweep_interval(),
            max_reassignments: default_max_reassignments(),
            requeue_unfilled: false,
            confirmation_cutoff: default_confirmation_cutoff(),
            utc_offset_minutes: default_utc_offset_minutes(),
            date_tolerance_hours: default_date_tolerance_hours(),
            sweep_roles: default_sweep_roles(),
            audit_roles: default_audit_roles(),
            operator_roles: default_operator_roles(),
            api_tokens: Vec::new(),
            scoring: ScoringWeights::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Build the deadline policy from the cutoff and offset settings
    pub fn deadline_policy(&self) -> Result<DeadlinePolicy, DispatchError> {
        let cutoff = NaiveTime::parse_from_str(&self.confirmation_cutoff, "%H:%M").map_err(|e| {
            DispatchError::Config(format!(
                "confirmation_cutoff '{}' is not HH:MM: {}",
                self.confirmation_cutoff, e
            ))
        })?;
        let offset = self
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                DispatchError::Config(format!(
                    "utc_offset_minutes {} is out of range",
                    self.utc_offset_minutes
                ))
            })?;
        Ok(DeadlinePolicy::new(cutoff, offset))
    }
}
