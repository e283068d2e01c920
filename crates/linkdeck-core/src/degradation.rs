//! Tier transitions and degradation policy.
//!
//! The controller owns the live `(tier, reduced_motion)` pair and the policy
//! derived from it. Policy is never patched: every change recomputes a
//! complete [`DegradationPolicy`] and a complete [`RenderHints`] value from
//! scratch.
//!
//! # Transition rule
//!
//! Evaluated after each new fps sample once the history holds at least
//! `min_samples_for_transition` entries, on the mean of the whole history:
//!
//! | Mean fps       | Current tier | Next tier   |
//! |----------------|--------------|-------------|
//! | `< 30`         | any          | `low`       |
//! | `30..50`       | `high`       | `medium`    |
//! | `>= 58`        | not `high`   | `high`      |
//! | otherwise      | any          | unchanged   |
//!
//! The `50..58` band while `medium` is a dead zone that prevents
//! oscillation.
//!
//! # Policy table
//!
//! | Input              | Toggles                               | Limit |
//! |--------------------|---------------------------------------|-------|
//! | reduced motion     | all four                              | 1     |
//! | `low`              | all four                              | 1     |
//! | `medium`           | reduce duration, disable parallax     | 2     |
//! | `high`             | none                                  | 5     |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capability::DeviceTier;
use crate::config::{ConcurrencyLimits, GovernorConfig};
use crate::history::History;

/// Degradation toggles plus the animation concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationPolicy {
    pub disable_complex_animations: bool,
    pub reduce_animation_duration: bool,
    pub disable_parallax: bool,
    pub reduce_blur_effects: bool,
    pub limit_concurrent_animations: usize,
}

impl DegradationPolicy {
    /// Relaxed starting point before tier rules are applied.
    #[must_use]
    pub fn relaxed(limits: &ConcurrencyLimits) -> Self {
        Self {
            disable_complex_animations: false,
            reduce_animation_duration: false,
            disable_parallax: false,
            reduce_blur_effects: false,
            limit_concurrent_animations: limits.default,
        }
    }

    /// Every toggle on, with the given limit.
    #[must_use]
    pub fn strictest(limit: usize) -> Self {
        Self {
            disable_complex_animations: true,
            reduce_animation_duration: true,
            disable_parallax: true,
            reduce_blur_effects: true,
            limit_concurrent_animations: limit,
        }
    }

    /// Number of toggles switched on.
    #[must_use]
    pub fn active_toggles(&self) -> usize {
        [
            self.disable_complex_animations,
            self.reduce_animation_duration,
            self.disable_parallax,
            self.reduce_blur_effects,
        ]
        .iter()
        .filter(|on| **on)
        .count()
    }
}

/// Derive the complete policy for `(tier, reduced_motion)`.
#[must_use]
pub fn derive_policy(
    tier: DeviceTier,
    reduced_motion: bool,
    limits: &ConcurrencyLimits,
) -> DegradationPolicy {
    let mut policy = DegradationPolicy::relaxed(limits);

    if reduced_motion {
        return DegradationPolicy::strictest(limits.reduced_motion);
    }

    match tier {
        DeviceTier::Low => policy = DegradationPolicy::strictest(limits.low),
        DeviceTier::Medium => {
            policy.reduce_animation_duration = true;
            policy.disable_parallax = true;
            policy.limit_concurrent_animations = limits.medium;
        }
        DeviceTier::High => policy.limit_concurrent_animations = limits.high,
    }

    policy
}

/// Apply the transition rule to `current` given the history mean.
///
/// Returns the new tier only when it differs from `current`.
#[must_use]
pub fn evaluate_transition(
    current: DeviceTier,
    mean_fps: f64,
    config: &GovernorConfig,
) -> Option<DeviceTier> {
    let next = if mean_fps < config.low_fps {
        DeviceTier::Low
    } else if mean_fps < config.medium_fps && current == DeviceTier::High {
        DeviceTier::Medium
    } else if mean_fps >= config.high_fps && current != DeviceTier::High {
        DeviceTier::High
    } else {
        current
    };
    (next != current).then_some(next)
}

// =============================================================================
// Render hints
// =============================================================================

/// Base animation durations in ms, keyed by hint variable.
const BASE_DURATIONS_MS: [(&str, u64); 3] = [
    ("--animation-duration-fast", 150),
    ("--animation-duration-normal", 300),
    ("--animation-duration-slow", 500),
];

const BLUR_FULL_PX: u32 = 12;
const BLUR_REDUCED_PX: u32 = 4;

/// Styling-facing mirror of the active policy.
///
/// Consumers always receive a whole value; variables and flags from a
/// previous policy never linger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderHints {
    /// Named magnitude variables (durations, blur radius).
    pub variables: BTreeMap<String, String>,
    /// Active state flags.
    pub flags: BTreeSet<String>,
}

impl RenderHints {
    /// Build hints for the given state.
    ///
    /// Durations are halved under `reduce_animation_duration`; the slow
    /// duration drops to zero under `disable_complex_animations`.
    #[must_use]
    pub fn from_policy(policy: &DegradationPolicy, tier: DeviceTier, reduced_motion: bool) -> Self {
        let mut variables = BTreeMap::new();
        for (name, base) in BASE_DURATIONS_MS {
            let mut ms = if policy.reduce_animation_duration {
                base / 2
            } else {
                base
            };
            if policy.disable_complex_animations && name == "--animation-duration-slow" {
                ms = 0;
            }
            variables.insert(name.to_string(), format!("{ms}ms"));
        }
        let blur = if policy.reduce_blur_effects {
            BLUR_REDUCED_PX
        } else {
            BLUR_FULL_PX
        };
        variables.insert("--blur-amount".to_string(), format!("{blur}px"));

        let mut flags = BTreeSet::new();
        flags.insert(format!("perf-{tier}"));
        let toggles = [
            (policy.disable_complex_animations, "disable-complex-animations"),
            (policy.reduce_animation_duration, "reduce-animation-duration"),
            (policy.disable_parallax, "disable-parallax"),
            (policy.reduce_blur_effects, "reduce-blur-effects"),
            (reduced_motion, "reduced-motion"),
        ];
        for (on, flag) in toggles {
            if on {
                flags.insert(flag.to_string());
            }
        }

        Self { variables, flags }
    }

    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}

// =============================================================================
// Controller
// =============================================================================

/// A tier change produced by sampling or re-profiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierChange {
    pub from: DeviceTier,
    pub to: DeviceTier,
    /// History mean that triggered the change; `None` for profiler updates.
    pub average_fps: Option<f64>,
}

/// Owns `(tier, reduced_motion)` and the policy derived from them.
#[derive(Debug, Clone)]
pub struct DegradationController {
    config: GovernorConfig,
    tier: DeviceTier,
    reduced_motion: bool,
    policy: DegradationPolicy,
    hints: RenderHints,
}

impl DegradationController {
    /// Start at `high` with the configured reduced-motion preference.
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        let tier = DeviceTier::High;
        let reduced_motion = config.prefer_reduced_motion;
        let policy = derive_policy(tier, reduced_motion, &config.concurrency);
        let hints = RenderHints::from_policy(&policy, tier, reduced_motion);
        Self {
            config,
            tier,
            reduced_motion,
            policy,
            hints,
        }
    }

    #[must_use]
    pub fn tier(&self) -> DeviceTier {
        self.tier
    }

    #[must_use]
    pub fn reduced_motion(&self) -> bool {
        self.reduced_motion
    }

    #[must_use]
    pub fn policy(&self) -> DegradationPolicy {
        self.policy
    }

    #[must_use]
    pub fn render_hints(&self) -> &RenderHints {
        &self.hints
    }

    /// Whether animation work may run at all.
    #[must_use]
    pub fn should_animate(&self) -> bool {
        !self.reduced_motion && self.tier != DeviceTier::Low
    }

    /// Re-evaluate the tier from the fps history.
    ///
    /// Does nothing until the history holds enough samples. When the tier
    /// changes the policy is recomputed before returning.
    pub fn evaluate(&mut self, history: &History<u32>) -> Option<TierChange> {
        if history.len() < self.config.min_samples_for_transition {
            return None;
        }
        let mean = history.mean()?;
        let next = evaluate_transition(self.tier, mean, &self.config)?;
        let change = TierChange {
            from: self.tier,
            to: next,
            average_fps: Some(mean),
        };
        info!(
            from = %change.from,
            to = %change.to,
            average_fps = mean,
            samples = history.len(),
            "performance tier changed"
        );
        self.tier = next;
        self.recompute();
        Some(change)
    }

    /// Overwrite the tier from a profiler result.
    ///
    /// Always recomputes the policy, even when the tier is unchanged.
    pub fn set_tier(&mut self, tier: DeviceTier) -> Option<TierChange> {
        let change = (tier != self.tier).then_some(TierChange {
            from: self.tier,
            to: tier,
            average_fps: None,
        });
        if let Some(change) = change {
            info!(from = %change.from, to = %change.to, "device tier profiled");
        }
        self.tier = tier;
        self.recompute();
        change
    }

    /// Apply a reduced-motion change. Returns whether the value changed.
    pub fn set_reduced_motion(&mut self, reduced_motion: bool) -> bool {
        if reduced_motion == self.reduced_motion {
            return false;
        }
        info!(reduced_motion, "reduced motion preference changed");
        self.reduced_motion = reduced_motion;
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        let policy = derive_policy(self.tier, self.reduced_motion, &self.config.concurrency);
        if policy != self.policy {
            info!(
                tier = %self.tier,
                reduced_motion = self.reduced_motion,
                limit = policy.limit_concurrent_animations,
                toggles = policy.active_toggles(),
                "degradation policy applied"
            );
        }
        self.policy = policy;
        self.hints = RenderHints::from_policy(&policy, self.tier, self.reduced_motion);
    }
}
