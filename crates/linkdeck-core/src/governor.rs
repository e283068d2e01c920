//! The performance governor.
//!
//! One owned instance ties the capability profiler, the live samplers, the
//! degradation controller and the admission gate together. It is driven
//! from outside: a runtime (see [`crate::runtime`]) or a test feeds it
//! frame ticks, long-task entries, resource snapshots, and visibility and
//! preference changes, always with an explicit `now`.
//!
//! # Integration
//!
//! ```text
//! GovernorRuntime
//!   ├── frame loop      ──► on_frame(now) ──► evaluate tier ──► apply policy
//!   ├── long tasks      ──► record_long_task(entry)
//!   ├── resources       ──► sample_resources(snapshot)
//!   ├── visibility      ──► on_visibility_change(hidden, now)
//!   ├── preference      ──► set_reduced_motion_preference(pref)
//!   └── resize          ──► redetect()
//! ```
//!
//! Every policy application publishes [`RenderHints`] on a watch channel and
//! a [`GovernorEvent::PolicyApplied`] on the event broadcast.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::admission::AdmissionController;
use crate::capability::{CapabilityProfile, CapabilityProfiler, DeviceTier};
use crate::config::GovernorConfig;
use crate::degradation::{DegradationController, DegradationPolicy, RenderHints};
use crate::history::History;
use crate::report::{MemoryUsage, PerformanceReport};
use crate::sampler::{
    FrameRateSampler, LongTaskEntry, LongTaskLog, ResourceSnapshot, ResourceWarnings,
    check_resources,
};

/// Reported average when no sample exists yet.
pub const DEFAULT_FPS: u32 = 60;

const EVENT_CAPACITY: usize = 64;

/// Notifications for subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernorEvent {
    TierChanged {
        from: DeviceTier,
        to: DeviceTier,
        average_fps: Option<f64>,
    },
    PolicyApplied {
        tier: DeviceTier,
        reduced_motion: bool,
        policy: DegradationPolicy,
    },
    /// Tickets released without their owners' involvement.
    TicketsRevoked { tickets: Vec<String> },
}

/// Adaptive performance governor.
pub struct PerformanceGovernor {
    config: GovernorConfig,
    profiler: CapabilityProfiler,
    controller: DegradationController,
    admission: AdmissionController,
    frames: FrameRateSampler,
    fps_history: History<u32>,
    current_fps: u32,
    long_tasks: LongTaskLog,
    last_resources: Option<ResourceSnapshot>,
    monitoring: bool,
    initialized: bool,
    hints_tx: watch::Sender<RenderHints>,
    events_tx: broadcast::Sender<GovernorEvent>,
}

impl PerformanceGovernor {
    /// Create an uninitialized governor. Call [`init`](Self::init) to
    /// profile the host and start monitoring.
    #[must_use]
    pub fn new(config: GovernorConfig, profiler: CapabilityProfiler) -> Self {
        let controller = DegradationController::new(config.clone());
        let admission = AdmissionController::new(
            controller.policy().limit_concurrent_animations,
            config.animation_duration(),
        );
        admission.set_should_animate(controller.should_animate());
        let (hints_tx, _) = watch::channel(controller.render_hints().clone());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            frames: FrameRateSampler::new(config.fps_window(), Instant::now()),
            fps_history: History::new(config.max_fps_samples),
            current_fps: DEFAULT_FPS,
            long_tasks: LongTaskLog::from_config(&config),
            last_resources: None,
            monitoring: false,
            initialized: false,
            config,
            profiler,
            controller,
            admission,
            hints_tx,
            events_tx,
        }
    }

    /// Profile the host, settle the initial policy, and start monitoring.
    pub fn init(&mut self, now: Instant) -> CapabilityProfile {
        let profile = self.profiler.detect_device_performance();
        if let Some(change) = self.controller.set_tier(profile.tier) {
            self.emit(GovernorEvent::TierChanged {
                from: change.from,
                to: change.to,
                average_fps: None,
            });
        }
        let reduced = self
            .profiler
            .detect_reduced_motion(self.config.prefer_reduced_motion);
        self.controller.set_reduced_motion(reduced);
        self.apply_policy();

        self.start_monitoring(now);
        self.initialized = true;
        info!(
            tier = %self.controller.tier(),
            reduced_motion = self.controller.reduced_motion(),
            benchmark_ms = profile.benchmark_ms,
            "performance governor initialized"
        );
        profile
    }

    /// Stop monitoring and release every ticket.
    pub fn dispose(&mut self) -> Vec<String> {
        self.stop_monitoring();
        let revoked = self.revoke_tickets();
        self.initialized = false;
        info!("performance governor disposed");
        revoked
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Begin frame sampling with a fresh window at `now`.
    pub fn start_monitoring(&mut self, now: Instant) {
        self.frames.reset(now);
        if !self.monitoring {
            debug!("frame sampling started");
        }
        self.monitoring = true;
    }

    /// Pause frame sampling. History is kept.
    pub fn stop_monitoring(&mut self) {
        if self.monitoring {
            debug!("frame sampling stopped");
        }
        self.monitoring = false;
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Count a rendered frame.
    ///
    /// When the frame closes a window, the sample is appended, the tier is
    /// re-evaluated and, on a change, the policy is applied before this
    /// returns. Returns the new sample, if any.
    pub fn on_frame(&mut self, now: Instant) -> Option<u32> {
        if !self.monitoring {
            return None;
        }
        let fps = self.frames.record_frame(now)?;
        self.current_fps = fps;
        self.fps_history.push(fps);
        debug!(fps, samples = self.fps_history.len(), "fps sample");

        if let Some(change) = self.controller.evaluate(&self.fps_history) {
            self.emit(GovernorEvent::TierChanged {
                from: change.from,
                to: change.to,
                average_fps: change.average_fps,
            });
            self.apply_policy();
        }
        Some(fps)
    }

    /// Feed one long-task notification. Returns whether it was retained.
    pub fn record_long_task(&mut self, entry: LongTaskEntry) -> bool {
        self.long_tasks.observe(entry)
    }

    /// Store and check a resource snapshot. Never affects the tier.
    pub fn sample_resources(&mut self, snapshot: ResourceSnapshot) -> ResourceWarnings {
        self.last_resources = Some(snapshot);
        check_resources(&snapshot, &self.config)
    }

    /// Apply a live reduced-motion preference change.
    pub fn set_reduced_motion_preference(&mut self, preference: bool) {
        if self.controller.set_reduced_motion(preference) {
            self.apply_policy();
        }
    }

    /// Re-run capability detection (viewport resize) and recompute the
    /// policy.
    pub fn redetect(&mut self) -> CapabilityProfile {
        let profile = self.profiler.detect_device_performance();
        if let Some(change) = self.controller.set_tier(profile.tier) {
            self.emit(GovernorEvent::TierChanged {
                from: change.from,
                to: change.to,
                average_fps: None,
            });
        }
        self.apply_policy();
        profile
    }

    /// Handle a page visibility change.
    ///
    /// Hiding pauses sampling, cancels running animations and revokes every
    /// ticket; the revoked ids are returned and broadcast. Showing restarts
    /// sampling with a fresh window.
    pub fn on_visibility_change(&mut self, hidden: bool, now: Instant) -> Vec<String> {
        if hidden {
            self.stop_monitoring();
            let revoked = self.revoke_tickets();
            info!(revoked = revoked.len(), "page hidden; monitoring paused");
            revoked
        } else {
            if self.initialized {
                self.start_monitoring(now);
                info!("page visible; monitoring resumed");
            }
            Vec::new()
        }
    }

    fn revoke_tickets(&mut self) -> Vec<String> {
        let revoked = self.admission.revoke_all();
        if !revoked.is_empty() {
            self.emit(GovernorEvent::TicketsRevoked {
                tickets: revoked.clone(),
            });
        }
        revoked
    }

    fn apply_policy(&mut self) {
        let policy = self.controller.policy();
        self.admission.set_limit(policy.limit_concurrent_animations);
        self.admission
            .set_should_animate(self.controller.should_animate());
        self.hints_tx
            .send_replace(self.controller.render_hints().clone());
        self.emit(GovernorEvent::PolicyApplied {
            tier: self.controller.tier(),
            reduced_motion: self.controller.reduced_motion(),
            policy,
        });
    }

    fn emit(&self, event: GovernorEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }

    // -- queries --------------------------------------------------------------

    #[must_use]
    pub fn tier(&self) -> DeviceTier {
        self.controller.tier()
    }

    #[must_use]
    pub fn reduced_motion(&self) -> bool {
        self.controller.reduced_motion()
    }

    #[must_use]
    pub fn policy(&self) -> DegradationPolicy {
        self.controller.policy()
    }

    #[must_use]
    pub fn should_animate(&self) -> bool {
        self.controller.should_animate()
    }

    #[must_use]
    pub fn current_fps(&self) -> u32 {
        self.current_fps
    }

    /// Mean of the retained fps history; 60 when empty.
    #[must_use]
    pub fn average_fps(&self) -> f64 {
        self.fps_history.mean().unwrap_or(f64::from(DEFAULT_FPS))
    }

    #[must_use]
    pub fn fps_history(&self) -> Vec<u32> {
        self.fps_history.to_vec()
    }

    #[must_use]
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// A handle onto the admission gate shared with this governor.
    #[must_use]
    pub fn admission(&self) -> AdmissionController {
        self.admission.clone()
    }

    pub fn register_animation(&self, id: &str) -> bool {
        self.admission.register_animation(id)
    }

    pub fn unregister_animation(&self, id: &str) {
        self.admission.unregister_animation(id);
    }

    #[must_use]
    pub fn render_hints(&self) -> RenderHints {
        self.hints_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_hints(&self) -> watch::Receiver<RenderHints> {
        self.hints_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<GovernorEvent> {
        self.events_tx.subscribe()
    }

    #[must_use]
    pub fn performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            tier: self.controller.tier(),
            fps: self.current_fps,
            average_fps: self.average_fps().round() as u32,
            fps_history: self.fps_history.to_vec(),
            memory_usage: self
                .last_resources
                .and_then(|snap| snap.heap_used_bytes)
                .map(|used| MemoryUsage {
                    used_bytes: used,
                    limit_bytes: self.config.memory_limit_bytes,
                }),
            active_animation_count: self.admission.active_count(),
            long_tasks: self.long_tasks.records(),
            reduced_motion: self.controller.reduced_motion(),
            policy: self.controller.policy(),
        }
    }
}

impl std::fmt::Debug for PerformanceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceGovernor")
            .field("tier", &self.controller.tier())
            .field("reduced_motion", &self.controller.reduced_motion())
            .field("monitoring", &self.monitoring)
            .field("fps_history", &self.fps_history)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{HostHints, StaticHints};
    use std::sync::Arc;
    use std::time::Duration;

    fn roomy() -> HostHints {
        HostHints {
            logical_cores: Some(8),
            device_memory_gb: Some(8.0),
            network: None,
            user_agent: None,
        }
    }

    fn governor_with(hints: HostHints, benchmark: Duration) -> PerformanceGovernor {
        let config = GovernorConfig::default();
        let profiler = CapabilityProfiler::new(config.clone(), Arc::new(StaticHints(hints)))
            .with_workload(Arc::new(move |_| benchmark));
        PerformanceGovernor::new(config, profiler)
    }

    /// Drive one 2s window with `fps` frames per second.
    fn run_window(gov: &mut PerformanceGovernor, start: Instant, fps: u32) -> Instant {
        let frames = fps * 2;
        let window = Duration::from_secs(2);
        for i in 1..=frames {
            gov.on_frame(start + window * i / frames);
        }
        start + window
    }

    #[test]
    fn average_fps_defaults_to_sixty() {
        let gov = governor_with(roomy(), Duration::from_millis(5));
        assert!((gov.average_fps() - 60.0).abs() < f64::EPSILON);
        assert_eq!(gov.performance_report().average_fps, 60);
        assert_eq!(gov.current_fps(), 60);
    }

    #[test]
    fn init_profiles_and_publishes_policy() {
        let mut gov = governor_with(roomy(), Duration::from_millis(70));
        let mut events = gov.subscribe_events();
        let profile = gov.init(Instant::now());
        assert_eq!(profile.tier, DeviceTier::Medium);
        assert_eq!(gov.tier(), DeviceTier::Medium);
        assert_eq!(gov.admission().limit(), 2);
        assert!(gov.is_monitoring());
        assert!(gov.render_hints().has_flag("perf-medium"));

        assert!(matches!(
            events.try_recv().unwrap(),
            GovernorEvent::TierChanged {
                from: DeviceTier::High,
                to: DeviceTier::Medium,
                ..
            }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            GovernorEvent::PolicyApplied { .. }
        ));
    }

    #[test]
    fn init_forces_reduced_motion_on_mobile() {
        let hints = HostHints {
            user_agent: Some("Mozilla/5.0 (iPhone)".to_string()),
            ..roomy()
        };
        let mut gov = governor_with(hints, Duration::from_millis(5));
        gov.init(Instant::now());
        assert!(gov.reduced_motion());
        assert!(!gov.should_animate());
        assert_eq!(gov.policy(), DegradationPolicy::strictest(1));
    }

    #[test]
    fn sustained_low_fps_drops_to_low() {
        let mut gov = governor_with(roomy(), Duration::from_millis(5));
        let mut now = Instant::now();
        gov.init(now);
        assert_eq!(gov.tier(), DeviceTier::High);
        for _ in 0..5 {
            now = run_window(&mut gov, now, 20);
        }
        assert_eq!(gov.fps_history(), vec![20; 5]);
        assert_eq!(gov.tier(), DeviceTier::Low);
        assert_eq!(gov.admission().limit(), 1);
        assert!(!gov.admission().should_animate());
    }

    #[test]
    fn recovery_scenario_reaches_high() {
        let mut gov = governor_with(roomy(), Duration::from_millis(70));
        let mut now = Instant::now();
        gov.init(now);
        assert_eq!(gov.tier(), DeviceTier::Medium);
        for fps in [60, 58, 59, 60, 61] {
            now = run_window(&mut gov, now, fps);
        }
        assert_eq!(gov.fps_history(), vec![60, 58, 59, 60, 61]);
        assert_eq!(gov.performance_report().average_fps, 60);
        assert_eq!(gov.tier(), DeviceTier::High);
        assert_eq!(gov.policy().limit_concurrent_animations, 5);
    }

    #[test]
    fn frames_ignored_while_not_monitoring() {
        let mut gov = governor_with(roomy(), Duration::from_millis(5));
        let now = Instant::now();
        assert!(gov.on_frame(now + Duration::from_secs(3)).is_none());
        assert!(gov.fps_history().is_empty());
    }

    #[test]
    fn hide_revokes_tickets_and_pauses() {
        let mut gov = governor_with(roomy(), Duration::from_millis(5));
        let now = Instant::now();
        gov.init(now);
        let mut events = gov.subscribe_events();
        assert!(gov.register_animation("a"));
        assert!(gov.register_animation("b"));

        let revoked = gov.on_visibility_change(true, now);
        assert_eq!(revoked, vec!["a", "b"]);
        assert!(!gov.is_monitoring());
        assert_eq!(gov.admission().active_count(), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            GovernorEvent::TicketsRevoked {
                tickets: vec!["a".to_string(), "b".to_string()]
            }
        );

        assert!(gov.on_visibility_change(false, now).is_empty());
        assert!(gov.is_monitoring());
    }

    #[test]
    fn preference_change_reapplies_policy() {
        let mut gov = governor_with(roomy(), Duration::from_millis(5));
        gov.init(Instant::now());
        let mut hints = gov.subscribe_hints();
        gov.set_reduced_motion_preference(true);
        assert!(hints.has_changed().unwrap());
        assert!(hints.borrow_and_update().has_flag("reduced-motion"));
        assert_eq!(gov.admission().limit(), 1);

        gov.set_reduced_motion_preference(false);
        assert!(!gov.reduced_motion());
        assert_eq!(gov.admission().limit(), 5);
    }

    #[test]
    fn resources_reach_report_only() {
        let mut gov = governor_with(roomy(), Duration::from_millis(5));
        gov.init(Instant::now());
        let warnings = gov.sample_resources(ResourceSnapshot {
            heap_used_bytes: Some(200 * 1024 * 1024),
            load_time_ms: Some(100),
        });
        assert!(warnings.memory_exceeded);
        assert_eq!(gov.tier(), DeviceTier::High);
        let mem = gov.performance_report().memory_usage.unwrap();
        assert_eq!(mem.used_bytes, 200 * 1024 * 1024);
    }

    #[test]
    fn dispose_stops_everything() {
        let mut gov = governor_with(roomy(), Duration::from_millis(5));
        gov.init(Instant::now());
        gov.register_animation("x");
        assert_eq!(gov.dispose(), vec!["x"]);
        assert!(!gov.is_initialized());
        assert!(!gov.is_monitoring());
    }

    #[test]
    fn redetect_applies_new_profile() {
        let mut gov = governor_with(roomy(), Duration::from_millis(200));
        gov.init(Instant::now());
        assert_eq!(gov.tier(), DeviceTier::Low);
        let profile = gov.redetect();
        assert_eq!(profile.tier, DeviceTier::Low);
        assert_eq!(gov.policy().limit_concurrent_animations, 1);
    }
}
