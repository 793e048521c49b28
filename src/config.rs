//! TOML configuration for the Pulsewatch daemon.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a working configuration.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::baseline::BaselineMethod;
use crate::detect::Thresholds;
use crate::ingest::WindowPolicy;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PULSEWATCH_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/pulsewatch/pulsewatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the monitor process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded monitor configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. An explicit path (from `--config`). Errors here are fatal.
    /// 2. The path in `PULSEWATCH_CONFIG`.
    /// 3. `/etc/pulsewatch/pulsewatch.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PULSEWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.window.policy()?;
        if !(self.baseline.alpha > 0.0 && self.baseline.alpha <= 1.0) {
            bail!("baseline.alpha must be in (0, 1], got {}", self.baseline.alpha);
        }
        if self.baseline.min_samples == 0 {
            bail!("baseline.min_samples must be at least 1");
        }
        self.detector.thresholds.validate()?;
        if !(self.detector.epsilon > 0.0 && self.detector.epsilon.is_finite()) {
            bail!("detector.epsilon must be a positive finite number");
        }
        if self.lifecycle.resolve_after == 0 {
            bail!("lifecycle.resolve_after must be at least 1");
        }
        if self.delivery.log_capacity == 0 {
            bail!("delivery.log_capacity must be at least 1");
        }
        if self.delivery.max_batch == 0 {
            bail!("delivery.max_batch must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5001".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    Count,
    Span,
}

/// Rolling window retained per slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub mode: WindowMode,
    /// Samples kept in `count` mode.
    pub capacity: usize,
    /// Seconds of history kept in `span` mode.
    pub span_secs: u64,
    /// Hard cap on samples in `span` mode.
    pub max_samples: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            mode: WindowMode::Count,
            capacity: 100,
            span_secs: 300,
            max_samples: 10_000,
        }
    }
}

impl WindowConfig {
    pub fn policy(&self) -> Result<WindowPolicy> {
        match self.mode {
            WindowMode::Count => {
                if self.capacity == 0 {
                    bail!("window.capacity must be at least 1");
                }
                Ok(WindowPolicy::Count {
                    capacity: self.capacity,
                })
            }
            WindowMode::Span => {
                if self.span_secs == 0 || self.max_samples == 0 {
                    bail!("window.span_secs and window.max_samples must be at least 1");
                }
                let span_secs = i64::try_from(self.span_secs)
                    .context("window.span_secs is too large")?;
                Ok(WindowPolicy::Span {
                    span: chrono::Duration::seconds(span_secs),
                    max_samples: self.max_samples,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub method: BaselineMethod,
    /// EWMA decay factor, in (0, 1]. Ignored for Welford.
    pub alpha: f64,
    /// Samples required before a baseline is reported.
    pub min_samples: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            method: BaselineMethod::Welford,
            alpha: 0.1,
            min_samples: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Added to the variance before taking the square root.
    pub epsilon: f64,
    pub thresholds: Thresholds,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            thresholds: Thresholds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Consecutive calm samples needed to auto-resolve an alert.
    pub resolve_after: u32,
    /// Resolved alerts kept per slot for queries.
    pub retain_resolved: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            resolve_after: 3,
            retain_resolved: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Delivery items retained in memory.
    pub log_capacity: usize,
    /// Default bound on acknowledgment calls.
    pub ack_timeout_ms: u64,
    /// Largest batch a single poll returns.
    pub max_batch: usize,
    /// Longest a long poll may wait.
    pub max_wait_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            log_capacity: 10_000,
            ack_timeout_ms: 5_000,
            max_batch: 500,
            max_wait_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite journal for alerts and deliveries. In-memory only when unset.
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
