//! Configuration for the motion governance engine (`linkdeck.toml`).
//!
//! Every threshold the engine uses is an overridable field here. Missing
//! fields fall back to the defaults below via `#[serde(default)]`.
//!
//! ```toml
//! [governor]
//! fps_window_ms = 2000
//! low_fps = 30.0
//!
//! [governor.concurrency]
//! high = 5
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

// =============================================================================
// Log format
// =============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

// =============================================================================
// Concurrency limits
// =============================================================================

/// Maximum concurrently admitted animations per policy outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyLimits {
    /// Relaxed default that every policy derivation starts from.
    pub default: usize,
    /// Limit when the user prefers reduced motion.
    pub reduced_motion: usize,
    /// Limit for the `low` tier.
    pub low: usize,
    /// Limit for the `medium` tier.
    pub medium: usize,
    /// Limit for the `high` tier.
    pub high: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            default: 3,
            reduced_motion: 1,
            low: 1,
            medium: 2,
            high: 5,
        }
    }
}

// =============================================================================
// Governor config
// =============================================================================

/// Thresholds and intervals for profiling, sampling and admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Length of one frame-rate sampling window (ms).
    pub fps_window_ms: u64,
    /// Cadence of the native frame tick that stands in for the display
    /// refresh callback (ms).
    pub frame_interval_ms: u64,
    /// Maximum retained frame-rate samples.
    pub max_fps_samples: usize,
    /// Samples required before tier transitions are evaluated.
    pub min_samples_for_transition: usize,
    /// Mean fps below this forces the `low` tier.
    pub low_fps: f64,
    /// Mean fps below this demotes `high` to `medium`.
    pub medium_fps: f64,
    /// Mean fps at or above this promotes back to `high`.
    pub high_fps: f64,
    /// Tasks longer than this are recorded as long tasks (ms).
    pub long_task_threshold_ms: f64,
    /// Maximum retained long-task records.
    pub max_long_tasks: usize,
    /// Heap usage above this logs a warning (bytes).
    pub memory_limit_bytes: u64,
    /// Load time above this logs a warning (ms).
    pub load_time_warning_ms: u64,
    /// Resource sampler cadence (ms).
    pub resource_sample_interval_ms: u64,
    /// Periodic report snapshot cadence (ms).
    pub report_interval_ms: u64,
    /// Quiet period after the last viewport resize before re-profiling (ms).
    pub resize_debounce_ms: u64,
    /// Duration of a driven animation (ms).
    pub animation_duration_ms: u64,
    /// Iterations of the synthetic profiling workload.
    pub benchmark_iterations: u64,
    /// Workload slower than this classifies the host as `low` (ms).
    pub benchmark_low_ms: f64,
    /// Workload slower than this classifies the host as `medium` (ms).
    pub benchmark_medium_ms: f64,
    /// Core count at or below which the host counts as constrained.
    pub low_end_cores: u32,
    /// Device memory at or below which the host counts as constrained (GB).
    pub low_end_memory_gb: f64,
    /// Core count assumed when the host does not report one.
    pub default_cores: u32,
    /// Device memory assumed when the host does not report it (GB).
    pub default_memory_gb: f64,
    /// Initial reduced-motion preference before any live signal arrives.
    pub prefer_reduced_motion: bool,
    /// Admission limits per policy outcome.
    pub concurrency: ConcurrencyLimits,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            fps_window_ms: 2000,
            frame_interval_ms: 16,
            max_fps_samples: 30,
            min_samples_for_transition: 5,
            low_fps: 30.0,
            medium_fps: 50.0,
            high_fps: 58.0,
            long_task_threshold_ms: 50.0,
            max_long_tasks: 10,
            memory_limit_bytes: 100 * 1024 * 1024,
            load_time_warning_ms: 3000,
            resource_sample_interval_ms: 1000,
            report_interval_ms: 30_000,
            resize_debounce_ms: 500,
            animation_duration_ms: 300,
            benchmark_iterations: 1_000_000,
            benchmark_low_ms: 100.0,
            benchmark_medium_ms: 50.0,
            low_end_cores: 2,
            low_end_memory_gb: 2.0,
            default_cores: 2,
            default_memory_gb: 4.0,
            prefer_reduced_motion: false,
            concurrency: ConcurrencyLimits::default(),
        }
    }
}

impl GovernorConfig {
    /// Frame-rate sampling window.
    #[must_use]
    pub fn fps_window(&self) -> Duration {
        Duration::from_millis(self.fps_window_ms)
    }

    /// Native frame tick cadence.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Resource sampler cadence.
    #[must_use]
    pub fn resource_sample_interval(&self) -> Duration {
        Duration::from_millis(self.resource_sample_interval_ms)
    }

    /// Report snapshot cadence.
    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Resize debounce quiet period.
    #[must_use]
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    /// Driven animation duration.
    #[must_use]
    pub fn animation_duration(&self) -> Duration {
        Duration::from_millis(self.animation_duration_ms)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("fps_window_ms", self.fps_window_ms),
            ("frame_interval_ms", self.frame_interval_ms),
            ("resource_sample_interval_ms", self.resource_sample_interval_ms),
            ("report_interval_ms", self.report_interval_ms),
            ("animation_duration_ms", self.animation_duration_ms),
            ("benchmark_iterations", self.benchmark_iterations),
            ("max_fps_samples", self.max_fps_samples as u64),
            ("max_long_tasks", self.max_long_tasks as u64),
            ("min_samples_for_transition", self.min_samples_for_transition as u64),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.min_samples_for_transition > self.max_fps_samples {
            return Err(ConfigError::ValidationError(format!(
                "min_samples_for_transition ({}) exceeds max_fps_samples ({})",
                self.min_samples_for_transition, self.max_fps_samples
            )));
        }

        if !(self.low_fps < self.medium_fps && self.medium_fps <= self.high_fps) {
            return Err(ConfigError::ValidationError(format!(
                "fps bands must satisfy low_fps < medium_fps <= high_fps (got {} / {} / {})",
                self.low_fps, self.medium_fps, self.high_fps
            )));
        }

        if self.benchmark_medium_ms >= self.benchmark_low_ms {
            return Err(ConfigError::ValidationError(format!(
                "benchmark_medium_ms ({}) must be below benchmark_low_ms ({})",
                self.benchmark_medium_ms, self.benchmark_low_ms
            )));
        }

        let limits = self.concurrency;
        for (name, value) in [
            ("concurrency.default", limits.default),
            ("concurrency.reduced_motion", limits.reduced_motion),
            ("concurrency.low", limits.low),
            ("concurrency.medium", limits.medium),
            ("concurrency.high", limits.high),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must allow at least one animation"
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// App config (linkdeck.toml)
// =============================================================================

/// Top-level file layout: `[governor]` and `[logging]` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub governor: GovernorConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.governor.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }
}
