//! Debug report snapshot.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::capability::DeviceTier;
use crate::degradation::DegradationPolicy;
use crate::sampler::LongTaskRecord;

/// Latest heap reading against its warning limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

/// Point-in-time view of the governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub tier: DeviceTier,
    /// Most recent window sample.
    pub fps: u32,
    /// Rounded mean of the retained history (60 when empty).
    #[serde(rename = "averageFPS")]
    pub average_fps: u32,
    pub fps_history: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory_usage: Option<MemoryUsage>,
    pub active_animation_count: usize,
    pub long_tasks: Vec<LongTaskRecord>,
    pub reduced_motion: bool,
    pub policy: DegradationPolicy,
}

impl PerformanceReport {
    /// Human-readable rendering for terminal output.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Tier:              {}", self.tier);
        let _ = writeln!(out, "Reduced motion:    {}", self.reduced_motion);
        let _ = writeln!(out, "FPS:               {} (avg {})", self.fps, self.average_fps);
        if !self.fps_history.is_empty() {
            let samples: Vec<String> = self.fps_history.iter().map(u32::to_string).collect();
            let _ = writeln!(out, "FPS history:       {}", samples.join(" "));
        }
        match self.memory_usage {
            Some(mem) => {
                let _ = writeln!(
                    out,
                    "Memory:            {:.1} MiB / {:.1} MiB",
                    mem.used_bytes as f64 / (1024.0 * 1024.0),
                    mem.limit_bytes as f64 / (1024.0 * 1024.0)
                );
            }
            None => {
                let _ = writeln!(out, "Memory:            n/a");
            }
        }
        let _ = writeln!(
            out,
            "Animations:        {} active / limit {}",
            self.active_animation_count, self.policy.limit_concurrent_animations
        );
        let _ = writeln!(out, "Long tasks:        {}", self.long_tasks.len());
        let _ = writeln!(out, "Policy:");
        let toggles = [
            ("disable complex animations", self.policy.disable_complex_animations),
            ("reduce animation duration", self.policy.reduce_animation_duration),
            ("disable parallax", self.policy.disable_parallax),
            ("reduce blur effects", self.policy.reduce_blur_effects),
        ];
        for (name, on) in toggles {
            let _ = writeln!(out, "  {name:<28}{}", if on { "on" } else { "off" });
        }
        out
    }
}
