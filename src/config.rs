//! Configuration loading (spec.md §6, SPEC_FULL §6).
//!
//! Ground truth for the loader shape:
//! `endpoints_management/control/client.py _load_from_well_known_env`
//! (read `ENDPOINTS_SERVER_CONFIG_FILE`, parse JSON, fall back to compiled
//! defaults on any I/O or parse error) and `_load_no_cache` (force
//! `num_entries = -1` everywhere). Wired up the way the teacher's
//! `daemon/llm_gateway/config.rs::load_from_orchestra_config` loads its own
//! JSON section, with an explicit-path override for tests.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Name of the environment variable pointing at the optional JSON config
/// file, matching the original's well-known env var.
pub const CONFIG_FILE_ENV_VAR: &str = "ENDPOINTS_SERVER_CONFIG_FILE";

fn default_check_cache_entries() -> i64 {
    10_000
}
fn default_check_flush_interval_ms() -> i64 {
    500
}
fn default_check_expiration_ms() -> i64 {
    1_000
}
fn default_quota_cache_entries() -> i64 {
    1_000
}
fn default_quota_flush_interval_ms() -> i64 {
    1_000
}
fn default_quota_expiration_ms() -> i64 {
    600_000
}
fn default_report_cache_entries() -> i64 {
    1_000
}
fn default_report_flush_interval_ms() -> i64 {
    1_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAggregatorConfig {
    #[serde(default = "default_check_cache_entries")]
    pub cache_entries: i64,
    #[serde(default = "default_check_flush_interval_ms")]
    pub flush_interval_ms: i64,
    #[serde(default = "default_check_expiration_ms")]
    pub response_expiration_ms: i64,
}

impl Default for CheckAggregatorConfig {
    fn default() -> Self {
        Self {
            cache_entries: default_check_cache_entries(),
            flush_interval_ms: default_check_flush_interval_ms(),
            response_expiration_ms: default_check_expiration_ms(),
        }
    }
}

impl CheckAggregatorConfig {
    /// Expiration must strictly exceed the flush interval; otherwise it is
    /// silently promoted to `flush_interval + 1ms` (spec.md §4.2, §6;
    /// `google/scc/__init__.py CheckAggregationOptions.__new__`).
    pub fn normalized(mut self) -> Self {
        if self.response_expiration_ms <= self.flush_interval_ms {
            self.response_expiration_ms = self.flush_interval_ms + 1;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaAggregatorConfig {
    #[serde(default = "default_quota_cache_entries")]
    pub cache_entries: i64,
    #[serde(default = "default_quota_expiration_ms")]
    pub expiration_ms: i64,
    #[serde(default = "default_quota_flush_interval_ms")]
    pub flush_interval_ms: i64,
}

impl Default for QuotaAggregatorConfig {
    fn default() -> Self {
        Self {
            cache_entries: default_quota_cache_entries(),
            expiration_ms: default_quota_expiration_ms(),
            flush_interval_ms: default_quota_flush_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAggregatorConfig {
    #[serde(default = "default_report_cache_entries")]
    pub cache_entries: i64,
    #[serde(default = "default_report_flush_interval_ms")]
    pub flush_interval_ms: i64,
}

impl Default for ReportAggregatorConfig {
    fn default() -> Self {
        Self {
            cache_entries: default_report_cache_entries(),
            flush_interval_ms: default_report_flush_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    #[serde(default)]
    pub check_aggregator_config: CheckAggregatorConfig,
    #[serde(default)]
    pub quota_aggregator_config: QuotaAggregatorConfig,
    #[serde(default)]
    pub report_aggregator_config: ReportAggregatorConfig,
}

impl AggregatorConfig {
    /// The `Loaders.NO_CACHE` preset (`client.py _load_no_cache`): every
    /// aggregator's `cache_entries` set negative, forcing full passthrough.
    /// Useful for integration tests and hosts that want to disable
    /// aggregation without editing the JSON file.
    pub fn no_cache() -> Self {
        Self {
            check_aggregator_config: CheckAggregatorConfig {
                cache_entries: -1,
                ..Default::default()
            },
            quota_aggregator_config: QuotaAggregatorConfig {
                cache_entries: -1,
                ..Default::default()
            },
            report_aggregator_config: ReportAggregatorConfig {
                cache_entries: -1,
                ..Default::default()
            },
        }
    }

    fn normalize(mut self) -> Self {
        self.check_aggregator_config = self.check_aggregator_config.normalized();
        self
    }

    /// Loads configuration from the well-known environment variable, or
    /// returns compiled-in defaults if the variable is unset, the file is
    /// unreadable, or its contents don't parse as JSON. Never panics;
    /// every failure is logged at `warn` and falls through to defaults,
    /// matching `_load_from_well_known_env`'s broad `except Exception`.
    pub fn from_env() -> Self {
        match std::env::var(CONFIG_FILE_ENV_VAR) {
            Ok(path) => Self::from_file(&path).unwrap_or_else(|err| {
                warn!(%path, error = %err, "failed to load service control config, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Loads and parses an explicit path, for tests and hosts that already
    /// know where their config lives.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let parsed: Self = serde_json::from_str(&contents)?;
        Ok(parsed.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = AggregatorConfig::default();
        assert_eq!(cfg.check_aggregator_config.cache_entries, 10_000);
        assert_eq!(cfg.check_aggregator_config.flush_interval_ms, 500);
        assert_eq!(cfg.check_aggregator_config.response_expiration_ms, 1_000);
        assert_eq!(cfg.quota_aggregator_config.cache_entries, 1_000);
        assert_eq!(cfg.quota_aggregator_config.flush_interval_ms, 1_000);
        assert_eq!(cfg.quota_aggregator_config.expiration_ms, 600_000);
        assert_eq!(cfg.report_aggregator_config.cache_entries, 1_000);
        assert_eq!(cfg.report_aggregator_config.flush_interval_ms, 1_000);
    }

    #[test]
    fn expiration_promoted_when_not_greater_than_flush_interval() {
        let cfg = CheckAggregatorConfig {
            cache_entries: 10,
            flush_interval_ms: 500,
            response_expiration_ms: 500,
        }
        .normalized();
        assert_eq!(cfg.response_expiration_ms, 501);
    }

    #[test]
    fn no_cache_preset_disables_every_aggregator() {
        let cfg = AggregatorConfig::no_cache();
        assert!(cfg.check_aggregator_config.cache_entries < 0);
        assert!(cfg.quota_aggregator_config.cache_entries < 0);
        assert!(cfg.report_aggregator_config.cache_entries < 0);
    }

    #[test]
    fn from_file_parses_partial_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"checkAggregatorConfig": {"flushIntervalMs": 250}}"#).unwrap();
        let cfg = AggregatorConfig::from_file(&path).unwrap();
        assert_eq!(cfg.check_aggregator_config.flush_interval_ms, 250);
        assert_eq!(cfg.check_aggregator_config.cache_entries, 10_000);
    }

    #[test]
    fn from_env_falls_back_on_missing_file() {
        std::env::set_var(CONFIG_FILE_ENV_VAR, "/nonexistent/path/to/config.json");
        let cfg = AggregatorConfig::from_env();
        std::env::remove_var(CONFIG_FILE_ENV_VAR);
        assert_eq!(cfg, AggregatorConfig::default());
    }
}
