//! Engine and runtime configuration.
//!
//! Values come from code (`with_*` builders), YAML (`RuntimeConfig::from_yaml_str`,
//! `RuntimeConfig::from_file`) or the environment:
//!
//! - `AI_LIB_BATCH_CONCURRENCY` (default 4)
//! - `AI_LIB_BATCH_MAX_CONCURRENCY` (default 64)
//! - `AI_LIB_CANCEL_GRACE_MS` (unset: wait for in-flight calls indefinitely)
//! - `AI_LIB_CACHE_ENABLED` (`1`/`true` or `0`/`false`)
//! - `AI_LIB_CACHE_DIR` (unset: memory only)
//! - `AI_LIB_CACHE_HOT_ENTRIES` (default 1024)

use crate::cache::CacheConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Limit used when a batch is submitted without one.
    pub default_concurrency: usize,
    /// Hard ceiling for any batch.
    pub max_concurrency: usize,
    /// How long to keep waiting on an in-flight provider call after cancellation.
    #[serde(rename = "cancel_grace_ms", with = "millis")]
    pub cancel_grace: Option<Duration>,
    /// Buffer size of each progress stream subscription.
    pub event_capacity: usize,
    /// Payload characters carried in `started` events.
    pub preview_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 4,
            max_concurrency: 64,
            cancel_grace: None,
            event_capacity: 1024,
            preview_chars: 30,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_default_concurrency(mut self, n: usize) -> Self {
        self.default_concurrency = n;
        self
    }
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = Some(grace);
        self
    }
    pub fn with_event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }
    pub fn with_preview_chars(mut self, n: usize) -> Self {
        self.preview_chars = n;
        self
    }

    /// Effective admission limit for a batch: `None` takes the default, zero becomes one, and
    /// everything is capped at `max_concurrency`.
    pub fn resolve_limit(&self, requested: Option<usize>) -> usize {
        let ceiling = self.max_concurrency.max(1);
        requested
            .unwrap_or(self.default_concurrency)
            .max(1)
            .min(ceiling)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(invalid("engine.max_concurrency", "must be at least 1"));
        }
        if self.default_concurrency == 0 {
            return Err(invalid("engine.default_concurrency", "must be at least 1"));
        }
        if self.default_concurrency > self.max_concurrency {
            return Err(invalid(
                "engine.default_concurrency",
                format!(
                    "default {} exceeds max_concurrency {}",
                    self.default_concurrency, self.max_concurrency
                ),
            ));
        }
        if self.event_capacity == 0 {
            return Err(invalid("engine.event_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Everything needed to stand up a cache and an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file: {}", e),
                ErrorContext::new().with_source(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `AI_LIB_*` overrides using `lookup` as the environment.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(n) = parse_var(&lookup, "AI_LIB_BATCH_CONCURRENCY")? {
            self.engine.default_concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "AI_LIB_BATCH_MAX_CONCURRENCY")? {
            self.engine.max_concurrency = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "AI_LIB_CANCEL_GRACE_MS")? {
            self.engine.cancel_grace = Some(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("AI_LIB_CACHE_ENABLED") {
            self.cache.enabled = parse_flag("AI_LIB_CACHE_ENABLED", &raw)?;
        }
        if let Some(dir) = lookup("AI_LIB_CACHE_DIR").filter(|d| !d.trim().is_empty()) {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(n) = parse_var(&lookup, "AI_LIB_CACHE_HOT_ENTRIES")? {
            self.cache.hot_entries = n;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.cache.hot_entries == 0 {
            return Err(invalid("cache.hot_entries", "must be at least 1"));
        }
        if self.cache.max_entry_size == 0 {
            return Err(invalid("cache.max_entry_size", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(msg, ErrorContext::new().with_field_path(field))
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|e| {
        Error::configuration_with_context(
            format!("invalid value {:?}: {}", raw, e),
            ErrorContext::new().with_field_path(name).with_source("env"),
        )
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::configuration_with_context(
            format!("invalid flag {:?}", other),
            ErrorContext::new().with_field_path(name).with_source("env"),
        )),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
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
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_resolve_limit() {
        let cfg = EngineConfig::new().with_default_concurrency(3).with_max_concurrency(8);
        assert_eq!(cfg.resolve_limit(None), 3);
        assert_eq!(cfg.resolve_limit(Some(0)), 1);
        assert_eq!(cfg.resolve_limit(Some(5)), 5);
        assert_eq!(cfg.resolve_limit(Some(500)), 8);
    }

    #[test]
    fn test_yaml_loading_with_partial_fields() {
        let cfg = RuntimeConfig::from_yaml_str(
            "engine:\n  default_concurrency: 2\n  cancel_grace_ms: 250\ncache:\n  dir: /tmp/ai-cache\n",
        )
        .unwrap();
        assert_eq!(cfg.engine.default_concurrency, 2);
        assert_eq!(cfg.engine.max_concurrency, 64);
        assert_eq!(cfg.engine.cancel_grace, Some(Duration::from_millis(250)));
        assert_eq!(cfg.cache.dir, Some(PathBuf::from("/tmp/ai-cache")));
        assert!(cfg.cache.enabled);
    }

    #[test]
    fn test_invalid_yaml_config_is_rejected() {
        let err = RuntimeConfig::from_yaml_str(
            "engine:\n  default_concurrency: 10\n  max_concurrency: 2\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("engine.default_concurrency")
        );
        assert!(matches!(
            RuntimeConfig::from_yaml_str("engine: [1, 2"),
            Err(Error::Yaml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = RuntimeConfig::default()
            .with_overrides(env(&[
                ("AI_LIB_BATCH_CONCURRENCY", "6"),
                ("AI_LIB_CANCEL_GRACE_MS", "100"),
                ("AI_LIB_CACHE_ENABLED", "off"),
                ("AI_LIB_CACHE_HOT_ENTRIES", "32"),
            ]))
            .unwrap();
        assert_eq!(cfg.engine.default_concurrency, 6);
        assert_eq!(cfg.engine.cancel_grace, Some(Duration::from_millis(100)));
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.cache.hot_entries, 32);
    }

    #[test]
    fn test_bad_env_value_names_the_variable() {
        let err = RuntimeConfig::default()
            .with_overrides(env(&[("AI_LIB_BATCH_CONCURRENCY", "many")]))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("AI_LIB_BATCH_CONCURRENCY")
        );
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.yaml");
        let cfg = RuntimeConfig {
            engine: EngineConfig::new().with_cancel_grace(Duration::from_secs(2)),
            cache: CacheConfig::new().with_hot_entries(10),
        };
        std::fs::write(&path, serde_yaml::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(RuntimeConfig::from_file(&path).unwrap(), cfg);
    }
}
