//! Concurrency-limited animation admission.
//!
//! Callers request a ticket before starting an animation. A ticket is
//! granted only while fewer than `limit` tickets are outstanding; shrinking
//! the limit never evicts existing tickets, it only blocks new grants until
//! the count falls below the new limit.
//!
//! The controller also drives time-based progress callbacks: [`animate`]
//! queues a callback that receives `min(elapsed / duration, 1)` on every
//! [`step_frame`] until it completes or is cancelled.
//!
//! Callbacks are invoked with no internal lock held, so they may call
//! `register_animation`, `unregister_animation`, or `animate` themselves.
//!
//! [`animate`]: AdmissionController::animate
//! [`step_frame`]: AdmissionController::step_frame

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

/// Progress callback; receives a value in `0.0..=1.0`.
pub type ProgressCallback = Box<dyn FnMut(f64) + Send>;

struct RunningAnimation {
    started: Instant,
    ticket: Option<String>,
    done: Arc<AtomicBool>,
    callback: ProgressCallback,
}

struct AdmissionState {
    active: BTreeSet<String>,
    limit: usize,
    should_animate: bool,
    duration: Duration,
    running: Vec<RunningAnimation>,
    // Done flags of animations taken out by an in-progress `step_frame`.
    in_flight: Vec<Arc<AtomicBool>>,
}

/// Shared admission gate. Clones refer to the same ticket set.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Mutex<AdmissionState>>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(limit: usize, duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AdmissionState {
                active: BTreeSet::new(),
                limit,
                should_animate: true,
                duration,
                running: Vec::new(),
                in_flight: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Try to take a slot for `id`.
    ///
    /// Returns `false` when the limit is reached, even for an id that
    /// already holds a slot; the active set is left unchanged. Below the
    /// limit, an id that already holds a slot succeeds without taking a
    /// second one.
    pub fn register_animation(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.active.len() >= state.limit {
            debug!(
                ticket = id,
                active = state.active.len(),
                limit = state.limit,
                "animation refused"
            );
            return false;
        }
        state.active.insert(id.to_string());
        true
    }

    /// Release the slot held by `id`. Absent ids are ignored.
    pub fn unregister_animation(&self, id: &str) {
        self.lock().active.remove(id);
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.lock().active.contains(id)
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    /// Change the limit. Outstanding tickets are kept.
    pub fn set_limit(&self, limit: usize) {
        self.lock().limit = limit;
    }

    #[must_use]
    pub fn should_animate(&self) -> bool {
        self.lock().should_animate
    }

    pub fn set_should_animate(&self, should_animate: bool) {
        self.lock().should_animate = should_animate;
    }

    /// Animations still receiving frames.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// Run `callback` over the animation duration.
    ///
    /// When animation is disabled or `ticket` is refused, `callback(1.0)` is
    /// invoked immediately and an inert handle is returned. Otherwise the
    /// callback is driven by [`step_frame`](Self::step_frame) and the ticket
    /// is released on completion or cancellation.
    pub fn animate(
        &self,
        now: Instant,
        mut callback: ProgressCallback,
        ticket: Option<&str>,
    ) -> CancelHandle {
        let admitted = {
            let should_animate = self.should_animate();
            should_animate && ticket.is_none_or(|id| self.register_animation(id))
        };
        if !admitted {
            callback(1.0);
            return CancelHandle::inert();
        }

        let done = Arc::new(AtomicBool::new(false));
        self.lock().running.push(RunningAnimation {
            started: now,
            ticket: ticket.map(str::to_string),
            done: Arc::clone(&done),
            callback,
        });
        CancelHandle {
            done,
            ticket: ticket.map(str::to_string),
            admission: Some(self.clone()),
        }
    }

    /// Deliver one frame to every running animation.
    ///
    /// Cancelled animations are dropped without a callback, and an
    /// animation revoked while its own callback runs gets no further frames.
    /// Returns the number still running afterwards.
    pub fn step_frame(&self, now: Instant) -> usize {
        let (mut batch, duration) = {
            let mut state = self.lock();
            let batch = std::mem::take(&mut state.running);
            state.in_flight = batch.iter().map(|anim| Arc::clone(&anim.done)).collect();
            (batch, state.duration)
        };

        batch.retain_mut(|anim| {
            if anim.done.load(Ordering::Acquire) {
                return false;
            }
            let progress = if duration.is_zero() {
                1.0
            } else {
                (now.saturating_duration_since(anim.started).as_secs_f64()
                    / duration.as_secs_f64())
                .min(1.0)
            };
            (anim.callback)(progress);
            if progress < 1.0 {
                return !anim.done.load(Ordering::Acquire);
            }
            if !anim.done.swap(true, Ordering::AcqRel) {
                if let Some(ticket) = &anim.ticket {
                    self.unregister_animation(ticket);
                }
            }
            false
        });

        let mut state = self.lock();
        state.in_flight.clear();
        // A revoke may have landed after the animation's last check.
        batch.retain(|anim| !anim.done.load(Ordering::Acquire));
        // Animations started from inside callbacks were queued meanwhile.
        batch.append(&mut state.running);
        state.running = batch;
        state.running.len()
    }

    /// Cancel every running animation and release every ticket.
    ///
    /// Animations currently inside a frame step are cancelled too. Returns
    /// the released ticket ids in sorted order.
    pub fn revoke_all(&self) -> Vec<String> {
        let mut state = self.lock();
        for anim in state.running.drain(..) {
            anim.done.store(true, Ordering::Release);
        }
        for done in &state.in_flight {
            done.store(true, Ordering::Release);
        }
        let revoked: Vec<String> = std::mem::take(&mut state.active).into_iter().collect();
        if !revoked.is_empty() {
            debug!(count = revoked.len(), "animation tickets revoked");
        }
        revoked
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AdmissionController")
            .field("active", &state.active)
            .field("limit", &state.limit)
            .field("should_animate", &state.should_animate)
            .field("running", &state.running.len())
            .finish()
    }
}

/// Stops a running animation.
///
/// Cancellation is cooperative: the animation is dropped at its next frame
/// step, while the ticket is released immediately.
#[derive(Clone)]
pub struct CancelHandle {
    done: Arc<AtomicBool>,
    ticket: Option<String>,
    admission: Option<AdmissionController>,
}

impl CancelHandle {
    /// A handle for an animation that already completed synchronously.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            done: Arc::new(AtomicBool::new(true)),
            ticket: None,
            admission: None,
        }
    }

    /// Stop frame delivery and release the ticket. Idempotent, and a no-op
    /// once the animation has completed.
    pub fn cancel(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let (Some(ticket), Some(admission)) = (&self.ticket, &self.admission) {
            admission.unregister_animation(ticket);
        }
    }

    /// Whether the animation has completed or been cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("ticket", &self.ticket)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn controller(limit: usize) -> AdmissionController {
        AdmissionController::new(limit, Duration::from_millis(300))
    }

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, ProgressCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            seen,
            Box::new(move |p| sink.lock().unwrap().push(p)),
        )
    }

    #[test]
    fn limit_three_scenario() {
        let ac = controller(3);
        assert!(ac.register_animation("a"));
        assert!(ac.register_animation("b"));
        assert!(ac.register_animation("c"));
        assert!(!ac.register_animation("d"));
        assert_eq!(ac.active_count(), 3);
        ac.unregister_animation("b");
        assert!(ac.register_animation("d"));
        assert!(ac.is_active("d"));
        assert!(!ac.is_active("b"));
    }

    #[test]
    fn unregister_absent_is_noop() {
        let ac = controller(2);
        ac.register_animation("a");
        ac.unregister_animation("zzz");
        ac.unregister_animation("zzz");
        assert_eq!(ac.active_count(), 1);
    }

    #[test]
    fn duplicate_register_takes_one_slot() {
        let ac = controller(2);
        assert!(ac.register_animation("a"));
        assert!(ac.register_animation("a"));
        assert_eq!(ac.active_count(), 1);
    }

    #[test]
    fn duplicate_register_at_limit_is_refused() {
        let ac = controller(1);
        assert!(ac.register_animation("a"));
        assert!(!ac.register_animation("a"));
        assert_eq!(ac.active_count(), 1);
        assert!(ac.is_active("a"));
    }

    #[test]
    fn second_animate_on_held_ticket_at_limit_jumps_to_end() {
        let ac = controller(1);
        let t0 = Instant::now();
        let (_, first) = recorder();
        let running = ac.animate(t0, first, Some("card"));
        let (seen, second) = recorder();
        let _ = ac.animate(t0, second, Some("card"));
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
        assert_eq!(ac.running_count(), 1);
        assert!(ac.is_active("card"));
        assert!(!running.is_finished());
    }

    #[test]
    fn shrinking_limit_keeps_tickets() {
        let ac = controller(5);
        for id in ["a", "b", "c", "d"] {
            assert!(ac.register_animation(id));
        }
        ac.set_limit(2);
        assert_eq!(ac.active_count(), 4);
        assert!(!ac.register_animation("e"));
        ac.unregister_animation("a");
        ac.unregister_animation("b");
        assert!(!ac.register_animation("e"));
        ac.unregister_animation("c");
        assert!(ac.register_animation("e"));
    }

    #[test]
    fn animate_drives_progress_to_completion() {
        let ac = controller(3);
        let t0 = Instant::now();
        let (seen, cb) = recorder();
        let handle = ac.animate(t0, cb, Some("card"));
        assert!(ac.is_active("card"));

        assert_eq!(ac.step_frame(t0 + Duration::from_millis(150)), 1);
        assert_eq!(ac.step_frame(t0 + Duration::from_millis(450)), 0);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!((seen[0] - 0.5).abs() < 1e-9);
        assert!((seen[1] - 1.0).abs() < f64::EPSILON);
        assert!(!ac.is_active("card"));
        assert!(handle.is_finished());
    }

    #[test]
    fn disabled_animation_jumps_to_end() {
        let ac = controller(3);
        ac.set_should_animate(false);
        let (seen, cb) = recorder();
        let handle = ac.animate(Instant::now(), cb, Some("card"));
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
        assert!(handle.is_finished());
        assert_eq!(ac.active_count(), 0);
        assert_eq!(ac.running_count(), 0);
    }

    #[test]
    fn refused_ticket_jumps_to_end() {
        let ac = controller(1);
        assert!(ac.register_animation("busy"));
        let (seen, cb) = recorder();
        let _ = ac.animate(Instant::now(), cb, Some("card"));
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
        assert!(!ac.is_active("card"));
    }

    #[test]
    fn untracked_animation_ignores_limit() {
        let ac = controller(1);
        assert!(ac.register_animation("busy"));
        let (seen, cb) = recorder();
        let _ = ac.animate(Instant::now(), cb, None);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(ac.running_count(), 1);
    }

    #[test]
    fn cancel_releases_ticket_and_stops_frames() {
        let ac = controller(3);
        let t0 = Instant::now();
        let (seen, cb) = recorder();
        let handle = ac.animate(t0, cb, Some("card"));
        handle.cancel();
        assert!(!ac.is_active("card"));
        handle.cancel();
        assert_eq!(ac.step_frame(t0 + Duration::from_millis(100)), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_after_completion_does_not_release_reused_id() {
        let ac = controller(3);
        let t0 = Instant::now();
        let (_, cb) = recorder();
        let handle = ac.animate(t0, cb, Some("card"));
        ac.step_frame(t0 + Duration::from_millis(300));
        assert!(ac.register_animation("card"));
        handle.cancel();
        assert!(ac.is_active("card"));
    }

    #[test]
    fn callbacks_may_reenter_controller() {
        let ac = controller(3);
        let inner = ac.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = Arc::clone(&calls);
        let t0 = Instant::now();
        let _ = ac.animate(
            t0,
            Box::new(move |_| {
                calls_cb.fetch_add(1, Ordering::SeqCst);
                inner.register_animation("nested");
                let _ = inner.animate(t0, Box::new(|_| {}), None);
            }),
            None,
        );
        assert_eq!(ac.step_frame(t0 + Duration::from_millis(100)), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ac.is_active("nested"));
    }

    #[test]
    fn revoke_all_returns_sorted_ids() {
        let ac = controller(5);
        let t0 = Instant::now();
        let (seen, cb) = recorder();
        let handle = ac.animate(t0, cb, Some("m"));
        ac.register_animation("z");
        ac.register_animation("a");
        assert_eq!(ac.revoke_all(), vec!["a", "m", "z"]);
        assert_eq!(ac.active_count(), 0);
        assert_eq!(ac.running_count(), 0);
        assert!(handle.is_finished());
        ac.step_frame(t0 + Duration::from_millis(100));
        assert!(seen.lock().unwrap().is_empty());
        assert!(ac.revoke_all().is_empty());
    }

    #[test]
    fn revoke_during_step_stops_in_flight_animation() {
        let ac = controller(3);
        let inner = ac.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let t0 = Instant::now();
        let handle = ac.animate(
            t0,
            Box::new(move |p| {
                sink.lock().unwrap().push(p);
                assert_eq!(inner.revoke_all(), vec!["card"]);
            }),
            Some("card"),
        );

        assert_eq!(ac.step_frame(t0 + Duration::from_millis(100)), 0);
        assert_eq!(ac.running_count(), 0);
        assert!(handle.is_finished());

        // A new owner of the same id keeps its slot.
        assert!(ac.register_animation("card"));
        ac.step_frame(t0 + Duration::from_millis(200));
        ac.step_frame(t0 + Duration::from_millis(400));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(ac.is_active("card"));
    }

    #[test]
    fn revoke_during_step_skips_rest_of_batch() {
        let ac = controller(3);
        let inner = ac.clone();
        let t0 = Instant::now();
        let _ = ac.animate(
            t0,
            Box::new(move |_| {
                inner.revoke_all();
            }),
            Some("first"),
        );
        let (seen, cb) = recorder();
        let second = ac.animate(t0, cb, Some("second"));

        assert_eq!(ac.step_frame(t0 + Duration::from_millis(100)), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert!(second.is_finished());
        assert_eq!(ac.active_count(), 0);
    }

    #[test]
    fn zero_duration_completes_on_first_frame() {
        let ac = AdmissionController::new(3, Duration::ZERO);
        let (seen, cb) = recorder();
        let t0 = Instant::now();
        let _ = ac.animate(t0, cb, Some("x"));
        assert_eq!(ac.step_frame(t0), 0);
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }
}
