// src/config.rs
//! Orchestrator settings: defaults, then an optional TOML file, then the
//! environment.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retention::{DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::scheduler::MAX_INTERVAL_MINUTES;

pub const ENV_CONFIG_PATH: &str = "FEED_SCHEDULER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/feed_scheduler.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub update_interval_minutes: u64,
    pub max_concurrent_feeds: usize,
    pub retention_days: u32,
    pub registry_host: String,
    pub registry_port: u16,
    pub feed_parser_fallback_url: String,
    pub web_api_fallback_url: String,
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub parse_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub cleanup_hour: u32,
    pub cleanup_minute: u32,
    pub health_interval_minutes: u64,
    pub discovery_interval_minutes: u64,
    pub shutdown_drain_secs: u64,
    pub ops_addr: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            update_interval_minutes: 15,
            max_concurrent_feeds: 5,
            retention_days: DEFAULT_RETENTION_DAYS,
            registry_host: "localhost".into(),
            registry_port: 8500,
            feed_parser_fallback_url: "http://localhost:8001".into(),
            web_api_fallback_url: "http://localhost:8002".into(),
            store_url: None,
            store_key: None,
            parse_timeout_secs: 30,
            probe_timeout_secs: 5,
            store_timeout_secs: 10,
            cleanup_hour: 2,
            cleanup_minute: 0,
            health_interval_minutes: 1,
            discovery_interval_minutes: 5,
            shutdown_drain_secs: 30,
            ops_addr: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load using env var + fallbacks:
    /// 1) $FEED_SCHEDULER_CONFIG (must exist)
    /// 2) config/feed_scheduler.toml (if present)
    /// 3) built-in defaults
    ///
    /// Environment variables then override whatever the file set.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => Self::from_file(Path::new(&p))?,
            Err(_) => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file_err = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        toml::from_str(&content).map_err(|e| file_err(e.to_string()))
    }

    /// Overrides fields from `lookup` (normally the process environment).
    /// Blank values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        set_parsed(&get, "FEED_UPDATE_INTERVAL_MINUTES", &mut self.update_interval_minutes)?;
        set_parsed(&get, "MAX_CONCURRENT_FEEDS", &mut self.max_concurrent_feeds)?;
        set_parsed(&get, "RETENTION_DAYS", &mut self.retention_days)?;
        set_parsed(&get, "CONSUL_PORT", &mut self.registry_port)?;
        set_parsed(&get, "PARSE_TIMEOUT_SECS", &mut self.parse_timeout_secs)?;
        set_parsed(&get, "PROBE_TIMEOUT_SECS", &mut self.probe_timeout_secs)?;
        set_parsed(&get, "STORE_TIMEOUT_SECS", &mut self.store_timeout_secs)?;
        set_parsed(&get, "CLEANUP_HOUR", &mut self.cleanup_hour)?;
        set_parsed(&get, "CLEANUP_MINUTE", &mut self.cleanup_minute)?;
        set_parsed(&get, "HEALTH_INTERVAL_MINUTES", &mut self.health_interval_minutes)?;
        set_parsed(&get, "DISCOVERY_INTERVAL_MINUTES", &mut self.discovery_interval_minutes)?;
        set_parsed(&get, "SHUTDOWN_DRAIN_SECS", &mut self.shutdown_drain_secs)?;

        if let Some(v) = get("CONSUL_HOST") {
            self.registry_host = v;
        }
        if let Some(v) = get("FEED_PARSER_URL") {
            self.feed_parser_fallback_url = v;
        }
        if let Some(v) = get("WEB_API_URL") {
            self.web_api_fallback_url = v;
        }
        if let Some(v) = get("SUPABASE_URL") {
            self.store_url = Some(v);
        }
        if let Some(v) = get("SUPABASE_SERVICE_ROLE_KEY") {
            self.store_key = Some(v);
        }
        if let Some(v) = get("OPS_ADDR") {
            self.ops_addr = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("update_interval_minutes", self.update_interval_minutes),
            ("health_interval_minutes", self.health_interval_minutes),
            ("discovery_interval_minutes", self.discovery_interval_minutes),
            ("max_concurrent_feeds", self.max_concurrent_feeds as u64),
            ("parse_timeout_secs", self.parse_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("store_timeout_secs", self.store_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        let intervals = [
            ("update_interval_minutes", self.update_interval_minutes),
            ("health_interval_minutes", self.health_interval_minutes),
            ("discovery_interval_minutes", self.discovery_interval_minutes),
        ];
        for (field, minutes) in intervals {
            if minutes > MAX_INTERVAL_MINUTES {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{minutes} exceeds {MAX_INTERVAL_MINUTES} minutes"),
                });
            }
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid {
                field: "retention_days",
                reason: format!(
                    "{} exceeds {MAX_RETENTION_DAYS} days",
                    self.retention_days
                ),
            });
        }
        if self.cleanup_hour > 23 {
            return Err(ConfigError::Invalid {
                field: "cleanup_hour",
                reason: format!("{} is not an hour of the day", self.cleanup_hour),
            });
        }
        if self.cleanup_minute > 59 {
            return Err(ConfigError::Invalid {
                field: "cleanup_minute",
                reason: format!("{} is not a minute of the hour", self.cleanup_minute),
            });
        }
        Ok(())
    }

    /// Store URL and service key, required before anything touches the store.
    pub fn store_credentials(&self) -> Result<(&str, &str), ConfigError> {
        match (self.store_url.as_deref(), self.store_key.as_deref()) {
            (Some(url), Some(key)) => Ok((url, key)),
            _ => Err(ConfigError::MissingStoreCredentials),
        }
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs(self.parse_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

fn set_parsed<T, G>(get: &G, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *slot = raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            field: key,
            reason: format!("{raw:?}: {e}"),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.update_interval_minutes, 15);
        assert_eq!(cfg.max_concurrent_feeds, 5);
        assert_eq!(cfg.retention_days, 90);
        assert_eq!((cfg.cleanup_hour, cfg.cleanup_minute), (2, 0));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_and_blank_is_unset() {
        let mut cfg = OrchestratorConfig::default();
        cfg.apply_env(env(&[
            ("MAX_CONCURRENT_FEEDS", "8"),
            ("CONSUL_HOST", "consul.internal"),
            ("FEED_PARSER_URL", "  "),
            ("SUPABASE_URL", "https://db.example"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_concurrent_feeds, 8);
        assert_eq!(cfg.registry_host, "consul.internal");
        assert_eq!(cfg.feed_parser_fallback_url, "http://localhost:8001");
        assert_eq!(cfg.store_url.as_deref(), Some("https://db.example"));
    }

    #[test]
    fn malformed_numbers_fail_fast() {
        let mut cfg = OrchestratorConfig::default();
        let err = cfg
            .apply_env(env(&[("RETENTION_DAYS", "ninety")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "RETENTION_DAYS", .. }));
    }

    #[test]
    fn zero_values_and_bad_clock_are_rejected() {
        let cfg = OrchestratorConfig {
            max_concurrent_feeds: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "max_concurrent_feeds", .. })
        ));

        let cfg = OrchestratorConfig {
            cleanup_hour: 24,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_horizons_fail_validation() {
        let mut cfg = OrchestratorConfig::default();
        cfg.apply_env(env(&[("RETENTION_DAYS", "200000000")])).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "retention_days", .. })
        ));

        let mut cfg = OrchestratorConfig::default();
        cfg.apply_env(env(&[("FEED_UPDATE_INTERVAL_MINUTES", "200000000000000000")]))
            .unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "update_interval_minutes", .. })
        ));

        let cfg = OrchestratorConfig {
            retention_days: MAX_RETENTION_DAYS,
            discovery_interval_minutes: MAX_INTERVAL_MINUTES,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn credentials_require_both_halves() {
        let mut cfg = OrchestratorConfig::default();
        assert!(matches!(
            cfg.store_credentials(),
            Err(ConfigError::MissingStoreCredentials)
        ));
        cfg.store_url = Some("https://db.example".into());
        assert!(cfg.store_credentials().is_err());
        cfg.store_key = Some("service-key".into());
        assert_eq!(
            cfg.store_credentials().unwrap(),
            ("https://db.example", "service-key")
        );
    }
}
