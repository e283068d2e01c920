//! Tokio driver for the performance governor.
//!
//! [`GovernorRuntime::start`] initializes a [`PerformanceGovernor`] and
//! spawns one task per signal source:
//!
//! ```text
//! GovernorRuntime
//!   ├── frame_loop      ──► on_frame + step animations   (every frame_interval)
//!   ├── resource_task   ──► sample_resources              (every 1s, needs a probe)
//!   ├── long_task_task  ──► record_long_task              (needs a stream)
//!   ├── visibility_task ──► on_visibility_change          (needs a watch)
//!   ├── preference_task ──► set_reduced_motion_preference (needs a watch)
//!   ├── resize_task     ──► redetect after 500ms quiet    (needs a stream)
//!   └── report_task     ──► debug-level report            (every 30s)
//! ```
//!
//! A missing optional source disables its task with a warning; the rest of
//! the governor keeps running. All governor mutation happens under a single
//! lock, and animation callbacks run after that lock is released.
//!
//! Time is read from `tokio::time::Instant`, so a paused test clock drives
//! the whole governor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, CancelHandle, ProgressCallback};
use crate::capability::DeviceTier;
use crate::degradation::RenderHints;
use crate::governor::{GovernorEvent, PerformanceGovernor};
use crate::report::PerformanceReport;
use crate::sampler::{LongTaskEntry, ResourceProbe};

/// Page visibility as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Viewport dimensions from a resize notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Optional host signal sources. Any may be absent.
#[derive(Default)]
pub struct PlatformSources {
    pub long_tasks: Option<mpsc::Receiver<LongTaskEntry>>,
    pub visibility: Option<watch::Receiver<Visibility>>,
    pub resize: Option<mpsc::Receiver<ViewportSize>>,
    pub reduced_motion: Option<watch::Receiver<bool>>,
    pub probe: Option<Box<dyn ResourceProbe>>,
}

impl std::fmt::Debug for PlatformSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSources")
            .field("long_tasks", &self.long_tasks.is_some())
            .field("visibility", &self.visibility.is_some())
            .field("resize", &self.resize.is_some())
            .field("reduced_motion", &self.reduced_motion.is_some())
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn lock(governor: &Mutex<PerformanceGovernor>) -> MutexGuard<'_, PerformanceGovernor> {
    match governor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Spawns governor tasks onto the current tokio runtime.
pub struct GovernorRuntime;

impl GovernorRuntime {
    /// Initialize `governor` (if not already) and spawn its tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(mut governor: PerformanceGovernor, sources: PlatformSources) -> GovernorHandle {
        if !governor.is_initialized() {
            governor.init(now());
        }
        let config = governor.config().clone();
        let admission = governor.admission();
        let governor = Arc::new(Mutex::new(governor));
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        tasks.push((
            "frame_loop",
            tokio::spawn(frame_loop(
                Arc::clone(&governor),
                admission.clone(),
                config.frame_interval(),
                Arc::clone(&shutdown_flag),
                shutdown_rx.clone(),
            )),
        ));

        match sources.probe {
            Some(probe) => tasks.push((
                "resources",
                tokio::spawn(resource_task(
                    Arc::clone(&governor),
                    probe,
                    config.resource_sample_interval(),
                    Arc::clone(&shutdown_flag),
                    shutdown_rx.clone(),
                )),
            )),
            None => warn!("resource probe unavailable; resource sampling disabled"),
        }

        match sources.long_tasks {
            Some(rx) => tasks.push((
                "long_tasks",
                tokio::spawn(long_task_task(
                    Arc::clone(&governor),
                    rx,
                    shutdown_rx.clone(),
                )),
            )),
            None => warn!("long-task notifications unavailable; long-task tracking disabled"),
        }

        match sources.visibility {
            Some(rx) => tasks.push((
                "visibility",
                tokio::spawn(visibility_task(
                    Arc::clone(&governor),
                    rx,
                    shutdown_rx.clone(),
                )),
            )),
            None => warn!("visibility notifications unavailable; pause on hide disabled"),
        }

        match sources.reduced_motion {
            Some(rx) => tasks.push((
                "preference",
                tokio::spawn(preference_task(
                    Arc::clone(&governor),
                    rx,
                    shutdown_rx.clone(),
                )),
            )),
            None => warn!("reduced-motion preference unavailable; using initial value"),
        }

        match sources.resize {
            Some(rx) => tasks.push((
                "resize",
                tokio::spawn(resize_task(
                    Arc::clone(&governor),
                    rx,
                    config.resize_debounce(),
                    shutdown_rx.clone(),
                )),
            )),
            None => warn!("viewport resize notifications unavailable; re-profiling disabled"),
        }

        tasks.push((
            "report",
            tokio::spawn(report_task(
                Arc::clone(&governor),
                config.report_interval(),
                Arc::clone(&shutdown_flag),
                shutdown_rx,
            )),
        ));

        info!(
            tasks = tasks.len(),
            frame_interval_ms = config.frame_interval_ms,
            "governor runtime started"
        );

        GovernorHandle {
            governor,
            admission,
            shutdown_flag,
            shutdown_tx: Arc::new(shutdown_tx),
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }
}

/// Cloneable handle onto a running governor.
#[derive(Clone)]
pub struct GovernorHandle {
    governor: Arc<Mutex<PerformanceGovernor>>,
    admission: AdmissionController,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl GovernorHandle {
    /// Run `f` with the governor locked.
    pub fn with_governor<T>(&self, f: impl FnOnce(&mut PerformanceGovernor) -> T) -> T {
        f(&mut lock(&self.governor))
    }

    pub fn register_animation(&self, id: &str) -> bool {
        self.admission.register_animation(id)
    }

    pub fn unregister_animation(&self, id: &str) {
        self.admission.unregister_animation(id);
    }

    /// Start a progress animation driven by the frame loop.
    pub fn animate(&self, callback: ProgressCallback, ticket: Option<&str>) -> CancelHandle {
        self.admission.animate(now(), callback, ticket)
    }

    #[must_use]
    pub fn admission(&self) -> AdmissionController {
        self.admission.clone()
    }

    #[must_use]
    pub fn performance_report(&self) -> PerformanceReport {
        lock(&self.governor).performance_report()
    }

    #[must_use]
    pub fn tier(&self) -> DeviceTier {
        lock(&self.governor).tier()
    }

    #[must_use]
    pub fn should_animate(&self) -> bool {
        lock(&self.governor).should_animate()
    }

    #[must_use]
    pub fn subscribe_hints(&self) -> watch::Receiver<RenderHints> {
        lock(&self.governor).subscribe_hints()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<GovernorEvent> {
        lock(&self.governor).subscribe_events()
    }

    /// Names of the tasks spawned at start.
    #[must_use]
    pub fn task_names(&self) -> Vec<&'static str> {
        match self.tasks.lock() {
            Ok(tasks) => tasks.iter().map(|(name, _)| *name).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(name, _)| *name).collect(),
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Signal shutdown without waiting.
    pub fn signal_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop every task and dispose the governor.
    ///
    /// Returns the tickets revoked by disposal. Safe to call more than once.
    pub async fn shutdown(&self) -> Vec<String> {
        self.signal_shutdown();
        let tasks = {
            let mut guard = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };

        let join_all = async {
            for (name, task) in tasks {
                if let Err(err) = task.await {
                    warn!(task = name, error = %err, "governor task ended abnormally");
                }
            }
        };
        if timeout(Duration::from_secs(5), join_all).await.is_err() {
            warn!("governor tasks did not stop within timeout");
        }

        let mut governor = lock(&self.governor);
        if governor.is_initialized() {
            governor.dispose()
        } else {
            Vec::new()
        }
    }
}

impl std::fmt::Debug for GovernorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorHandle")
            .field("shutdown", &self.is_shutdown())
            .field("tasks", &self.task_names())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tasks
// =============================================================================

async fn frame_loop(
    governor: Arc<Mutex<PerformanceGovernor>>,
    admission: AdmissionController,
    frame_interval: Duration,
    shutdown: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let now = now();
        lock(&governor).on_frame(now);
        admission.step_frame(now);
    }
    debug!("frame loop stopped");
}

async fn resource_task(
    governor: Arc<Mutex<PerformanceGovernor>>,
    mut probe: Box<dyn ResourceProbe>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let snapshot = probe.sample();
        lock(&governor).sample_resources(snapshot);
    }
}

async fn long_task_task(
    governor: Arc<Mutex<PerformanceGovernor>>,
    mut rx: mpsc::Receiver<LongTaskEntry>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let entry = tokio::select! {
            entry = rx.recv() => entry,
            _ = shutdown_rx.changed() => break,
        };
        let Some(entry) = entry else {
            debug!("long-task stream closed");
            break;
        };
        lock(&governor).record_long_task(entry);
    }
}

async fn visibility_task(
    governor: Arc<Mutex<PerformanceGovernor>>,
    mut rx: watch::Receiver<Visibility>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // A page can already be hidden when the runtime starts.
    if *rx.borrow_and_update() == Visibility::Hidden {
        lock(&governor).on_visibility_change(true, now());
    }
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("visibility source closed");
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
        let visibility = *rx.borrow_and_update();
        lock(&governor).on_visibility_change(visibility == Visibility::Hidden, now());
    }
}

async fn preference_task(
    governor: Arc<Mutex<PerformanceGovernor>>,
    mut rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // An initial `false` must not undo reduced motion forced at detection.
    if *rx.borrow_and_update() {
        lock(&governor).set_reduced_motion_preference(true);
    }
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("reduced-motion source closed");
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
        let preference = *rx.borrow_and_update();
        lock(&governor).set_reduced_motion_preference(preference);
    }
}

async fn resize_task(
    governor: Arc<Mutex<PerformanceGovernor>>,
    mut rx: mpsc::Receiver<ViewportSize>,
    debounce: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            size = rx.recv() => size,
            _ = shutdown_rx.changed() => return,
        };
        let Some(mut size) = first else {
            debug!("resize stream closed");
            return;
        };

        // Wait for a quiet period; each new event restarts the wait.
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(next) => size = next,
                    None => break,
                },
                () = sleep(debounce) => break,
                _ = shutdown_rx.changed() => return,
            }
        }

        debug!(width = size.width, height = size.height, "viewport settled");
        lock(&governor).redetect();
    }
}

async fn report_task(
    governor: Arc<Mutex<PerformanceGovernor>>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let report = lock(&governor).performance_report();
        debug!(
            tier = %report.tier,
            fps = report.fps,
            average_fps = report.average_fps,
            active = report.active_animation_count,
            long_tasks = report.long_tasks.len(),
            reduced_motion = report.reduced_motion,
            "performance report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityProfiler, HostHints, StaticHints};
    use crate::config::GovernorConfig;

    fn governor() -> PerformanceGovernor {
        let config = GovernorConfig::default();
        let hints = HostHints {
            logical_cores: Some(8),
            device_memory_gb: Some(8.0),
            network: None,
            user_agent: None,
        };
        let profiler = CapabilityProfiler::new(config.clone(), Arc::new(StaticHints(hints)))
            .with_workload(Arc::new(|_| Duration::from_millis(5)));
        PerformanceGovernor::new(config, profiler)
    }

    #[tokio::test(start_paused = true)]
    async fn missing_sources_only_spawn_core_tasks() {
        let handle = GovernorRuntime::start(governor(), PlatformSources::default());
        assert_eq!(handle.task_names(), vec!["frame_loop", "report"]);
        handle.shutdown().await;
        assert!(handle.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_produce_samples() {
        let handle = GovernorRuntime::start(governor(), PlatformSources::default());
        sleep(Duration::from_millis(4100)).await;
        let report = handle.performance_report();
        assert_eq!(report.fps_history.len(), 2);
        assert!(report.fps > 55);
        assert_eq!(report.tier, DeviceTier::High);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn initially_hidden_page_is_paused() {
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Hidden);
        let handle = GovernorRuntime::start(
            governor(),
            PlatformSources {
                visibility: Some(vis_rx),
                ..PlatformSources::default()
            },
        );
        sleep(Duration::from_millis(3_000)).await;
        assert!(!handle.with_governor(|g| g.is_monitoring()));
        assert!(handle.performance_report().fps_history.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn initial_reduced_motion_preference_applies() {
        let (_pref_tx, pref_rx) = watch::channel(true);
        let handle = GovernorRuntime::start(
            governor(),
            PlatformSources {
                reduced_motion: Some(pref_rx),
                ..PlatformSources::default()
            },
        );
        sleep(Duration::from_millis(20)).await;
        assert!(handle.performance_report().reduced_motion);
        assert_eq!(handle.admission().limit(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_twice_is_harmless() {
        let handle = GovernorRuntime::start(governor(), PlatformSources::default());
        assert!(handle.register_animation("a"));
        assert_eq!(handle.shutdown().await, vec!["a"]);
        assert!(handle.shutdown().await.is_empty());
    }
}
