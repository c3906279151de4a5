//! Configuration for the orchestration engine
//!
//! Values come from defaults overridden by `CAREFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on a single collaborator call, in seconds
    #[serde(default = "default_collaborator_timeout_secs")]
    pub collaborator_timeout_secs: u64,

    /// Number of days the slot search covers, starting at the preferred date
    #[serde(default = "default_slot_search_days")]
    pub slot_search_days: u32,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON logs instead of pretty ones
    #[serde(default)]
    pub json_logs: bool,
}

fn default_collaborator_timeout_secs() -> u64 {
    30
}

fn default_slot_search_days() -> u32 {
    14
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_secs: default_collaborator_timeout_secs(),
            slot_search_days: default_slot_search_days(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(timeout) = lookup("CAREFLOW_COLLABORATOR_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) if secs > 0 => config.collaborator_timeout_secs = secs,
                _ => warn!("Invalid CAREFLOW_COLLABORATOR_TIMEOUT_SECS value: {}", timeout),
            }
        }

        if let Some(days) = lookup("CAREFLOW_SLOT_SEARCH_DAYS") {
            match days.parse::<u32>() {
                Ok(d) if d > 0 => config.slot_search_days = d,
                _ => warn!("Invalid CAREFLOW_SLOT_SEARCH_DAYS value: {}", days),
            }
        }

        if let Some(filter) = lookup("CAREFLOW_LOG_FILTER") {
            config.log_filter = filter;
        }

        if let Some(json_logs) = lookup("CAREFLOW_JSON_LOGS") {
            config.json_logs = json_logs.to_lowercase() == "true" || json_logs == "1";
        }

        config
    }

    /// Collaborator timeout as a `Duration`, never shorter than one second
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs.max(1))
    }
}
