//! Live performance sampling.
//!
//! Three independent collectors feed the governor:
//!
//! - [`FrameRateSampler`] counts frames and closes a window every
//!   `fps_window_ms`, yielding one fps sample per window.
//! - [`LongTaskLog`] keeps the most recent tasks that ran past the long-task
//!   threshold.
//! - [`ResourceProbe`] snapshots heap usage and load timing. Snapshots are
//!   checked against warning limits and logged; they never influence the
//!   tier.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::GovernorConfig;
use crate::history::History;

// =============================================================================
// Frame rate
// =============================================================================

/// Windowed frame counter.
#[derive(Debug, Clone)]
pub struct FrameRateSampler {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FrameRateSampler {
    #[must_use]
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            window_start: now,
            frames: 0,
        }
    }

    /// Restart the current window at `now`, discarding partial counts.
    pub fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.frames = 0;
    }

    /// Count one frame. Returns the fps sample when this frame closes the
    /// window.
    pub fn record_frame(&mut self, now: Instant) -> Option<u32> {
        self.frames = self.frames.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let fps = (f64::from(self.frames) * 1000.0 / elapsed_ms).round();
        self.reset(now);
        Some(fps.clamp(0.0, f64::from(u32::MAX)) as u32)
    }

    /// Frames counted in the open window.
    #[must_use]
    pub fn pending_frames(&self) -> u32 {
        self.frames
    }
}

// =============================================================================
// Long tasks
// =============================================================================

/// One entry from the host's long-task notification stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LongTaskEntry {
    /// Task duration in milliseconds.
    pub duration_ms: f64,
    /// Task start, in ms since the host's time origin.
    pub start_time_ms: f64,
}

/// A retained long task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTaskRecord {
    #[serde(rename = "duration")]
    pub duration_ms: f64,
    #[serde(rename = "startTime")]
    pub start_time_ms: f64,
    /// Wall clock at observation (epoch ms).
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
}

/// Bounded log of tasks that exceeded the threshold.
#[derive(Debug)]
pub struct LongTaskLog {
    threshold_ms: f64,
    records: History<LongTaskRecord>,
}

impl LongTaskLog {
    #[must_use]
    pub fn new(threshold_ms: f64, capacity: usize) -> Self {
        Self {
            threshold_ms,
            records: History::new(capacity),
        }
    }

    #[must_use]
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(config.long_task_threshold_ms, config.max_long_tasks)
    }

    /// Record `entry` if it ran longer than the threshold.
    ///
    /// Returns whether the entry was retained.
    pub fn observe(&mut self, entry: LongTaskEntry) -> bool {
        if entry.duration_ms.is_nan() || entry.duration_ms <= self.threshold_ms {
            return false;
        }
        self.records.push(LongTaskRecord {
            duration_ms: entry.duration_ms,
            start_time_ms: entry.start_time_ms,
            timestamp_ms: epoch_ms(),
        });
        tracing::debug!(
            duration_ms = entry.duration_ms,
            start_time_ms = entry.start_time_ms,
            retained = self.records.len(),
            evicted_total = self.records.total_evicted(),
            "long task observed"
        );
        true
    }

    /// Retained records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<LongTaskRecord> {
        self.records.to_vec()
    }
}

// =============================================================================
// Resource snapshots
// =============================================================================

/// One resource reading. Fields the host cannot expose stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub heap_used_bytes: Option<u64>,
    pub load_time_ms: Option<u64>,
}

/// Source of resource snapshots.
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSnapshot;
}

/// Probe for the current process: resident set size as heap usage, and a
/// load time fixed by the embedder once startup completes.
#[derive(Debug, Clone, Default)]
pub struct ProcessProbe {
    load_time: Option<Duration>,
}

impl ProcessProbe {
    #[must_use]
    pub fn new(load_time: Option<Duration>) -> Self {
        Self { load_time }
    }
}

impl ResourceProbe for ProcessProbe {
    fn sample(&mut self) -> ResourceSnapshot {
        ResourceSnapshot {
            heap_used_bytes: process_rss_bytes(),
            load_time_ms: self
                .load_time
                .and_then(|d| u64::try_from(d.as_millis()).ok()),
        }
    }
}

/// Probe returning the same snapshot on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub ResourceSnapshot);

impl ResourceProbe for FixedProbe {
    fn sample(&mut self) -> ResourceSnapshot {
        self.0
    }
}

#[cfg(target_os = "linux")]
fn process_rss_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            // Format: "12345 kB"
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn process_rss_bytes() -> Option<u64> {
    None
}

/// Which warning limits a snapshot crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceWarnings {
    pub memory_exceeded: bool,
    pub slow_load: bool,
}

/// Compare a snapshot against the configured limits, logging each breach.
pub fn check_resources(snapshot: &ResourceSnapshot, config: &GovernorConfig) -> ResourceWarnings {
    let memory_exceeded = snapshot
        .heap_used_bytes
        .is_some_and(|used| used > config.memory_limit_bytes);
    let slow_load = snapshot
        .load_time_ms
        .is_some_and(|ms| ms > config.load_time_warning_ms);

    if memory_exceeded {
        tracing::warn!(
            heap_used_bytes = snapshot.heap_used_bytes,
            limit_bytes = config.memory_limit_bytes,
            "memory usage above limit"
        );
    }
    if slow_load {
        tracing::warn!(
            load_time_ms = snapshot.load_time_ms,
            limit_ms = config.load_time_warning_ms,
            "slow load time"
        );
    }

    ResourceWarnings {
        memory_exceeded,
        slow_load,
    }
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}
