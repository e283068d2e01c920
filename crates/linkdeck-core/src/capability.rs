//! Host capability profiling.
//!
//! Classifies the host into a [`DeviceTier`] from a synthetic timed workload
//! plus static hardware hints, and decides the initial reduced-motion state.
//!
//! | Workload duration      | Tier     |
//! |------------------------|----------|
//! | `> 100ms`              | `low`    |
//! | `50ms < d <= 100ms`    | `medium` |
//! | `<= 50ms`              | `high`   |
//!
//! A `high` result is demoted to `medium` on constrained hardware (cores or
//! memory at or below the low-end thresholds). `medium` and `low` are never
//! demoted further.
//!
//! Hints come from a [`HintSource`]. [`SystemHints`] reads the local
//! machine; [`StaticHints`] wraps fixed values for embedding and tests.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::GovernorConfig;

// =============================================================================
// Device tier
// =============================================================================

/// Coarse device capability classification.
///
/// Ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// =============================================================================
// Hardware hints
// =============================================================================

/// Network effective connection type, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl NetworkType {
    /// Whether this connection alone marks the host as low-end.
    #[must_use]
    pub const fn is_slow(self) -> bool {
        matches!(self, Self::Slow2g | Self::TwoG)
    }
}

impl std::str::FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slow-2g" => Ok(Self::Slow2g),
            "2g" => Ok(Self::TwoG),
            "3g" => Ok(Self::ThreeG),
            "4g" => Ok(Self::FourG),
            _ => Err(format!(
                "unknown network type: {s}. Expected one of: slow-2g, 2g, 3g, 4g"
            )),
        }
    }
}

/// Static capability hints. Every field is optional; the host may not
/// expose it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostHints {
    /// Logical core count.
    pub logical_cores: Option<u32>,
    /// Device memory estimate in GB.
    pub device_memory_gb: Option<f64>,
    /// Network effective type.
    pub network: Option<NetworkType>,
    /// User-agent string, if the host has one.
    pub user_agent: Option<String>,
}

impl HostHints {
    /// Core count with the configured default substituted when absent.
    #[must_use]
    pub fn effective_cores(&self, config: &GovernorConfig) -> u32 {
        self.logical_cores.unwrap_or(config.default_cores)
    }

    /// Device memory with the configured default substituted when absent.
    #[must_use]
    pub fn effective_memory_gb(&self, config: &GovernorConfig) -> f64 {
        match self.device_memory_gb {
            Some(gb) if gb.is_finite() && gb > 0.0 => gb,
            _ => config.default_memory_gb,
        }
    }

    /// Whether the *reported* hints mark the host as low-end.
    ///
    /// Absent hints never count toward low-end here; only values the host
    /// actually reported can force reduced motion.
    #[must_use]
    pub fn is_low_end(&self, config: &GovernorConfig) -> bool {
        let few_cores = self
            .logical_cores
            .is_some_and(|cores| cores <= config.low_end_cores);
        let little_memory = self
            .device_memory_gb
            .is_some_and(|gb| gb.is_finite() && gb <= config.low_end_memory_gb);
        let slow_network = self.network.is_some_and(NetworkType::is_slow);
        few_cores || little_memory || slow_network
    }

    /// Whether the user agent matches a mobile-device signature.
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        self.user_agent.as_deref().is_some_and(is_mobile_user_agent)
    }
}

static MOBILE_UA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini").unwrap()
});

/// Whether `user_agent` matches a mobile-device signature.
#[must_use]
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    MOBILE_UA.is_match(user_agent)
}

/// Source of static capability hints.
pub trait HintSource: Send + Sync {
    fn hints(&self) -> HostHints;
}

/// Fixed hints, for embedders that already know the host and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticHints(pub HostHints);

impl HintSource for StaticHints {
    fn hints(&self) -> HostHints {
        self.0.clone()
    }
}

/// Hints read from the local machine.
///
/// Core count and total memory are detected; network type and user agent
/// have no native equivalent and are supplied by the embedder.
#[derive(Debug, Clone, Default)]
pub struct SystemHints {
    pub network: Option<NetworkType>,
    pub user_agent: Option<String>,
}

impl HintSource for SystemHints {
    fn hints(&self) -> HostHints {
        HostHints {
            logical_cores: detect_logical_cores(),
            device_memory_gb: detect_memory_gb(),
            network: self.network,
            user_agent: self.user_agent.clone(),
        }
    }
}

fn detect_logical_cores() -> Option<u32> {
    std::thread::available_parallelism()
        .ok()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
}

/// Total physical memory in GB, when the platform exposes it.
fn detect_memory_gb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        let total_kb = contents
            .lines()
            .find_map(|line| line.strip_prefix("MemTotal:"))
            .and_then(|val| val.trim().trim_end_matches("kB").trim().parse::<u64>().ok())?;
        Some(total_kb as f64 / (1024.0 * 1024.0))
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|bytes| bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// =============================================================================
// Workload and classification
// =============================================================================

/// Run the synthetic floating-point workload and time it.
///
/// Sums square roots over `iterations` values; the sum is routed through
/// `black_box` so the loop is not optimized away.
#[must_use]
pub fn run_workload(iterations: u64) -> Duration {
    let start = Instant::now();
    let mut sum = 0.0_f64;
    for i in 0..iterations {
        sum += (i as f64).sqrt();
    }
    std::hint::black_box(sum);
    start.elapsed()
}

/// Map a workload duration onto a tier.
#[must_use]
pub fn classify_benchmark(duration: Duration, config: &GovernorConfig) -> DeviceTier {
    let ms = duration.as_secs_f64() * 1000.0;
    if ms > config.benchmark_low_ms {
        DeviceTier::Low
    } else if ms > config.benchmark_medium_ms {
        DeviceTier::Medium
    } else {
        DeviceTier::High
    }
}

/// Demote `high` to `medium` on constrained hardware.
///
/// Absent hints are replaced by the configured defaults before the rule is
/// applied. The default core count is 2, so a host that reports no hints
/// at all lands on `medium` even with a fast benchmark.
#[must_use]
pub fn demote_for_hardware(
    tier: DeviceTier,
    hints: &HostHints,
    config: &GovernorConfig,
) -> DeviceTier {
    if tier != DeviceTier::High {
        return tier;
    }
    let constrained = hints.effective_cores(config) <= config.low_end_cores
        || hints.effective_memory_gb(config) <= config.low_end_memory_gb;
    if constrained {
        DeviceTier::Medium
    } else {
        tier
    }
}

/// Result of one capability detection pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityProfile {
    pub tier: DeviceTier,
    /// Tier from the workload alone, before hardware demotion.
    pub benchmark_tier: DeviceTier,
    pub benchmark_ms: f64,
    pub hints: HostHints,
}

impl CapabilityProfile {
    /// Whether hardware hints lowered the workload's verdict.
    #[must_use]
    pub fn demoted(&self) -> bool {
        self.tier != self.benchmark_tier
    }
}

/// Timed workload used by the profiler.
pub type Workload = Arc<dyn Fn(u64) -> Duration + Send + Sync>;

/// One-shot capability profiler, re-run on viewport resize.
#[derive(Clone)]
pub struct CapabilityProfiler {
    config: GovernorConfig,
    hints: Arc<dyn HintSource>,
    workload: Workload,
}

impl CapabilityProfiler {
    /// Create a profiler that runs the real workload.
    #[must_use]
    pub fn new(config: GovernorConfig, hints: Arc<dyn HintSource>) -> Self {
        Self {
            config,
            hints,
            workload: Arc::new(run_workload),
        }
    }

    /// Replace the timed workload (deterministic tests, pre-measured hosts).
    #[must_use]
    pub fn with_workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// Current hints from the source.
    #[must_use]
    pub fn hints(&self) -> HostHints {
        self.hints.hints()
    }

    /// Run the workload and classify the host.
    #[must_use]
    pub fn detect_device_performance(&self) -> CapabilityProfile {
        let duration = (self.workload)(self.config.benchmark_iterations);
        let hints = self.hints.hints();
        let benchmark_tier = classify_benchmark(duration, &self.config);
        let tier = demote_for_hardware(benchmark_tier, &hints, &self.config);

        tracing::debug!(
            benchmark_ms = duration.as_secs_f64() * 1000.0,
            benchmark_tier = %benchmark_tier,
            tier = %tier,
            cores = ?hints.logical_cores,
            memory_gb = ?hints.device_memory_gb,
            "capability profile measured"
        );

        CapabilityProfile {
            tier,
            benchmark_tier,
            benchmark_ms: duration.as_secs_f64() * 1000.0,
            hints,
        }
    }

    /// Initial reduced-motion state.
    ///
    /// The live `preference` is OR'd with a mobile user agent and with a
    /// low-end host judged from reported hints. This forcing can only turn
    /// reduced motion on; later preference changes are applied by the
    /// governor directly.
    #[must_use]
    pub fn detect_reduced_motion(&self, preference: bool) -> bool {
        let hints = self.hints.hints();
        let mobile = hints.is_mobile();
        let low_end = hints.is_low_end(&self.config);
        if !preference && (mobile || low_end) {
            tracing::info!(mobile, low_end, "forcing reduced motion for constrained host");
        }
        preference || mobile || low_end
    }
}

impl std::fmt::Debug for CapabilityProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProfiler")
            .field("benchmark_iterations", &self.config.benchmark_iterations)
            .finish_non_exhaustive()
    }
}
