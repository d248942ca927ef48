//! Process-wide configuration, read once at startup (see the external
//! interfaces design).

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{CoreError, Result};

/// Top-level configuration loaded from a TOML file.
///
/// Unknown keys are rejected so a typo in a config file fails loudly at
/// startup instead of silently keeping a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host to bind the RPC listener to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// RPC listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of chunks to speculatively decode after each access.
    /// Zero disables prefetch entirely.
    #[serde(default = "default_n_prefetch")]
    pub n_prefetch: usize,
    /// Cache capacity = `n_prefetch * cache_capacity_multiplier`, floored at 1.
    #[serde(default = "default_cache_capacity_multiplier")]
    pub cache_capacity_multiplier: usize,
    /// Size of the prefetch worker pool.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Minimum severity emitted by the logger.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Path to the native MEF3 decoding library, loaded at startup by the
    /// decoder adapter. Not required when running with the in-memory test
    /// decoder (see `decoder::fake`).
    #[serde(default)]
    pub decoder_library_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Render as a `tracing_subscriber::EnvFilter` directive.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9090
}
fn default_n_prefetch() -> usize {
    3
}
fn default_cache_capacity_multiplier() -> usize {
    4
}
fn default_max_workers() -> usize {
    4
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read config file: {e}")))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CoreError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Cache capacity derived from `n_prefetch * cache_capacity_multiplier`,
    /// floored at 1 per the external interfaces design.
    pub fn cache_capacity(&self) -> usize {
        (self.n_prefetch * self.cache_capacity_multiplier).max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.cache_capacity_multiplier == 0 {
            return Err(CoreError::Config(
                "cache_capacity_multiplier must be >= 1".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(CoreError::Config("max_workers must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_table_empty() {
        let cfg = Config::from_str("").expect("defaults should validate");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.n_prefetch, 3);
        assert_eq!(cfg.cache_capacity(), 12);
    }

    #[test]
    fn zero_prefetch_disables_but_capacity_floors_at_one() {
        let cfg = Config::from_str("n_prefetch = 0\n").expect("valid");
        assert_eq!(cfg.n_prefetch, 0);
        assert_eq!(cfg.cache_capacity(), 1);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::from_str("bogus_key = 1\n").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn rejects_zero_multiplier() {
        let err = Config::from_str("cache_capacity_multiplier = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mefcached.toml");
        std::fs::write(&path, "port = 7000\nmax_workers = 8\n").expect("write");
        let cfg = Config::from_file(&path).expect("load");
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.max_workers, 8);
    }
}
