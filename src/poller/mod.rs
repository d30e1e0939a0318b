pub mod aggregator;

use crate::error::{TrackerError, TrackerResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// What a poll result asks the scheduler to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

/// One polling session, created by `start` and retired by `stop`
pub struct PollHandle {
    interval: Duration,
    running: Mutex<bool>,
    in_flight: AtomicBool,
    invocations: AtomicU64,
    skipped_ticks: AtomicU64,
    shutdown: Notify,
}

impl PollHandle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Mutex::new(true),
            in_flight: AtomicBool::new(false),
            invocations: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        *self.gate()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::SeqCst)
    }

    fn gate(&self) -> MutexGuard<'_, bool> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns whether the handle was still running
    fn halt(&self) -> bool {
        let was_running = {
            let mut running = self.gate();
            std::mem::replace(&mut *running, false)
        };
        self.shutdown.notify_one();
        was_running
    }
}

/// Restartable periodic invoker with at most one invocation in flight.
///
/// The first invocation happens immediately. A tick that elapses while the
/// previous invocation is pending is skipped, never queued. `stop` does not
/// abort an in-flight invocation, but its result is discarded.
#[derive(Default)]
pub struct PollScheduler {
    handle: Mutex<Option<Arc<PollHandle>>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `poll_fn` every `interval`.
    ///
    /// An `Err` from an invocation is logged and polling carries on; returning
    /// `Ok(PollControl::Stop)` ends the session.
    pub fn start<F, Fut>(&self, poll_fn: F, interval: Duration) -> TrackerResult<Arc<PollHandle>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TrackerResult<PollControl>> + Send + 'static,
    {
        self.start_with_handler(
            poll_fn,
            |outcome: TrackerResult<PollControl>| match outcome {
                Ok(control) => control,
                Err(e) => {
                    warn!(error = %e, "poll invocation failed");
                    PollControl::Continue
                }
            },
            interval,
        )
    }

    /// Like `start`, but each result goes through `handler` on the scheduler
    /// task. The handler only sees results produced while the session is
    /// running; it must return `PollControl::Stop` instead of calling `stop`.
    pub fn start_with_handler<F, Fut, T, H>(
        &self,
        poll_fn: F,
        handler: H,
        interval: Duration,
    ) -> TrackerResult<Arc<PollHandle>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        H: FnMut(T) -> PollControl + Send + 'static,
    {
        if interval.is_zero() {
            return Err(TrackerError::InvalidInterval);
        }

        let mut slot = self.slot();
        if let Some(previous) = slot.take() {
            if previous.halt() {
                debug!("restarting poll scheduler");
            }
        }

        let handle = Arc::new(PollHandle::new(interval));
        *slot = Some(handle.clone());
        tokio::spawn(run_loop(handle.clone(), poll_fn, handler));

        debug!(interval_ms = interval.as_millis() as u64, "poll scheduler started");
        Ok(handle)
    }

    /// Halt future invocations. Safe to call any number of times.
    pub fn stop(&self) {
        if let Some(handle) = self.slot().take() {
            if handle.halt() {
                debug!(invocations = handle.invocations(), "poll scheduler stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| h.is_running())
    }

    pub fn handle(&self) -> Option<Arc<PollHandle>> {
        self.slot().clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<PollHandle>>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<F, Fut, T, H>(handle: Arc<PollHandle>, mut poll_fn: F, mut handler: H)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
    H: FnMut(T) -> PollControl + Send + 'static,
{
    let mut ticker = interval(handle.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let (done_tx, mut done_rx) = mpsc::channel::<T>(1);

    loop {
        tokio::select! {
            biased;
            _ = handle.shutdown.notified() => {
                break;
            }
            Some(outcome) = done_rx.recv() => {
                handle.in_flight.store(false, Ordering::SeqCst);
                if !deliver(&handle, &mut handler, outcome) {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !handle.is_running() {
                    break;
                }
                if handle.in_flight.swap(true, Ordering::SeqCst) {
                    handle.skipped_ticks.fetch_add(1, Ordering::SeqCst);
                    trace!("previous poll still in flight, skipping tick");
                    continue;
                }

                handle.invocations.fetch_add(1, Ordering::SeqCst);
                let work = poll_fn();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    // The loop may be gone by now; the result is dropped with the channel.
                    let _ = done_tx.send(work.await).await;
                });
            }
        }
    }
}

/// Hand one result to the handler under the running gate.
/// Returns whether the loop should keep going.
fn deliver<T, H>(handle: &PollHandle, handler: &mut H, outcome: T) -> bool
where
    H: FnMut(T) -> PollControl,
{
    let mut running = handle.gate();
    if !*running {
        trace!("discarding poll result after stop");
        return false;
    }
    if handler(outcome) == PollControl::Stop {
        *running = false;
        debug!("poll scheduler stopped by handler");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct Probe {
        busy: AtomicBool,
        calls: AtomicUsize,
        overlaps: AtomicUsize,
        completed: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                busy: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                overlaps: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            })
        }
    }

    type PollFuture = std::pin::Pin<Box<dyn Future<Output = TrackerResult<PollControl>> + Send>>;

    fn probe_fn(probe: &Arc<Probe>, work: Duration) -> impl FnMut() -> PollFuture + Send + 'static {
        let probe = probe.clone();
        move || -> PollFuture {
            let probe = probe.clone();
            Box::pin(async move {
                if probe.busy.swap(true, Ordering::SeqCst) {
                    probe.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                probe.calls.fetch_add(1, Ordering::SeqCst);
                sleep(work).await;
                probe.busy.store(false, Ordering::SeqCst);
                probe.completed.fetch_add(1, Ordering::SeqCst);
                Ok(PollControl::Continue)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invokes_once_per_tick_without_overlap() {
        let probe = Probe::new();
        let scheduler = PollScheduler::new();
        let handle = scheduler
            .start(probe_fn(&probe, Duration::from_millis(10)), Duration::from_millis(100))
            .unwrap();

        sleep(Duration::from_millis(450)).await;
        scheduler.stop();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
        assert_eq!(handle.invocations(), 5);
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_invocation_is_immediate() {
        let probe = Probe::new();
        let scheduler = PollScheduler::new();
        scheduler
            .start(probe_fn(&probe, Duration::from_millis(1)), Duration::from_secs(60))
            .unwrap();

        sleep(Duration::from_millis(5)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_skips_ticks() {
        let probe = Probe::new();
        let scheduler = PollScheduler::new();
        let handle = scheduler
            .start(probe_fn(&probe, Duration::from_millis(250)), Duration::from_millis(100))
            .unwrap();

        sleep(Duration::from_millis(650)).await;
        scheduler.stop();

        // Invocations at 0ms, 300ms and 600ms; the ticks in between are skipped.
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
        assert!(handle.skipped_ticks() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let probe = Probe::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let scheduler = PollScheduler::new();

        let seen = delivered.clone();
        let handle = scheduler
            .start_with_handler(
                probe_fn(&probe, Duration::from_millis(200)),
                move |_outcome| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    PollControl::Continue
                },
                Duration::from_millis(50),
            )
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert!(handle.is_in_flight());
        scheduler.stop();

        sleep(Duration::from_millis(500)).await;

        // The slow invocation ran to completion but nothing acted on it.
        assert_eq!(probe.completed.load(Ordering::SeqCst), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let scheduler = PollScheduler::new();
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.handle().is_none());

        let probe = Probe::new();
        scheduler
            .start(probe_fn(&probe, Duration::from_millis(1)), Duration::from_millis(100))
            .unwrap();
        assert!(scheduler.is_running());
        sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_session() {
        let first = Probe::new();
        let second = Probe::new();
        let scheduler = PollScheduler::new();

        let old = scheduler
            .start(probe_fn(&first, Duration::from_millis(1)), Duration::from_millis(100))
            .unwrap();
        sleep(Duration::from_millis(150)).await;
        let new = scheduler
            .start(probe_fn(&second, Duration::from_millis(1)), Duration::from_millis(100))
            .unwrap();
        sleep(Duration::from_millis(250)).await;
        scheduler.stop();

        assert!(!old.is_running());
        assert!(!new.is_running());
        assert_eq!(first.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = PollScheduler::new();

        let counter = calls.clone();
        scheduler
            .start(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(TrackerError::Transient("502 Bad Gateway".to_string())) }
                },
                Duration::from_millis(100),
            )
            .unwrap();

        sleep(Duration::from_millis(350)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(scheduler.is_running());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_fn_can_stop_the_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = PollScheduler::new();

        let counter = calls.clone();
        let handle = scheduler
            .start(
                move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n >= 3 {
                            Ok(PollControl::Stop)
                        } else {
                            Ok(PollControl::Continue)
                        }
                    }
                },
                Duration::from_millis(100),
            )
            .unwrap();

        sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!handle.is_running());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = PollScheduler::new();
        let result = scheduler.start(|| async { Ok(PollControl::Continue) }, Duration::ZERO);
        assert!(matches!(result, Err(TrackerError::InvalidInterval)));
        assert!(!scheduler.is_running());
    }
}
