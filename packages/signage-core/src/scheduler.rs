//! Timeline scheduler (§4.8): drives a playlist forward on a monotonic
//! clock, looping indefinitely and emitting play/transition/complete
//! events.
//!
//! Built on `tokio::time::{Instant, sleep_until}` following the
//! metronome-tick idiom in the teacher's audio cadence loop, generalized
//! from fixed 20ms frames to variable per-item display budgets: the
//! per-item budget varies, unlike audio frame cadence, so a one-shot
//! deadline per phase replaces a fixed-period interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::snapshot::types::TimelineItem;

/// Events emitted by the scheduler as it drives a playlist.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    PlayItem { item: TimelineItem },
    TransitionStart { current: TimelineItem, next: Option<TimelineItem> },
    ItemComplete { item: TimelineItem },
    TimelineComplete,
}

/// Jitter statistics measured between a tick's scheduled deadline and its
/// actual wake time, the same measurement the teacher's cadence loop
/// performs for audio frame delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterStats {
    pub mean_ms: f64,
    pub max_ms: f64,
    samples: u64,
}

impl JitterStats {
    fn record(&mut self, jitter_ms: f64) {
        self.samples += 1;
        self.mean_ms += (jitter_ms - self.mean_ms) / self.samples as f64;
        if jitter_ms > self.max_ms {
            self.max_ms = jitter_ms;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Drives a non-empty, looping sequence of [`TimelineItem`]s forward.
pub struct TimelineScheduler {
    items: RwLock<Vec<TimelineItem>>,
    state: RwLock<RunState>,
    jitter: RwLock<JitterStats>,
    remaining_budget: RwLock<Option<Duration>>,
    cancel: CancellationToken,
    pause_notify: Arc<Notify>,
    stopped: AtomicBool,
}

impl TimelineScheduler {
    pub fn new(items: Vec<TimelineItem>) -> Arc<Self> {
        Arc::new(Self {
            items: RwLock::new(items),
            state: RwLock::new(RunState::Running),
            jitter: RwLock::new(JitterStats::default()),
            remaining_budget: RwLock::new(None),
            cancel: CancellationToken::new(),
            pause_notify: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn jitter_stats(&self) -> JitterStats {
        *self.jitter.read()
    }

    /// Freezes the current item: the in-flight display/transition timer is
    /// woken immediately and its remaining duration banked in
    /// `remaining_budget`, so nothing elapses until [`Self::resume`].
    pub fn pause(&self) {
        *self.state.write() = RunState::Paused;
        self.pause_notify.notify_waiters();
    }

    /// Resumes with the remainder of the current item's display budget.
    pub fn resume(&self) {
        let mut state = self.state.write();
        if *state == RunState::Paused {
            *state = RunState::Running;
        }
    }

    /// Cancels all outstanding timers and clears internal state.
    pub fn stop(&self) {
        *self.state.write() = RunState::Stopped;
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Runs the timeline loop, sending events on `tx` until `stop()` is
    /// called or the channel closes. Loops indefinitely over `items`.
    pub async fn run(self: Arc<Self>, tx: tokio::sync::mpsc::Sender<SchedulerEvent>) {
        loop {
            let items = self.items.read().clone();
            if items.is_empty() {
                return;
            }

            for (idx, item) in items.iter().enumerate() {
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                self.wait_while_paused().await;
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }

                if tx.send(SchedulerEvent::PlayItem { item: item.clone() }).await.is_err() {
                    return;
                }

                let budget = self
                    .remaining_budget
                    .write()
                    .take()
                    .unwrap_or_else(|| Duration::from_millis(item.display_ms));

                let transition_at = budget.saturating_sub(Duration::from_millis(item.transition_duration_ms));
                let mut scheduled_complete = Instant::now() + budget;

                if item.transition_duration_ms > 0 && transition_at > Duration::ZERO {
                    let (flow, paused) = self.sleep_pausable(transition_at).await;
                    if flow.is_break() {
                        return;
                    }
                    scheduled_complete += paused;

                    let next = items.get((idx + 1) % items.len()).cloned();
                    if tx
                        .send(SchedulerEvent::TransitionStart {
                            current: item.clone(),
                            next,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let remaining_after_transition = scheduled_complete.saturating_duration_since(Instant::now());
                    let (flow, paused) = self.sleep_pausable(remaining_after_transition).await;
                    if flow.is_break() {
                        return;
                    }
                    scheduled_complete += paused;
                } else {
                    let (flow, paused) = self.sleep_pausable(budget).await;
                    if flow.is_break() {
                        return;
                    }
                    scheduled_complete += paused;
                }

                let jitter_ms = Instant::now()
                    .saturating_duration_since(scheduled_complete)
                    .as_secs_f64()
                    * 1000.0;
                self.jitter.write().record(jitter_ms);

                if tx.send(SchedulerEvent::ItemComplete { item: item.clone() }).await.is_err() {
                    return;
                }
            }

            if tx.send(SchedulerEvent::TimelineComplete).await.is_err() {
                return;
            }
        }
    }

    async fn wait_while_paused(&self) {
        loop {
            if *self.state.read() != RunState::Paused {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Sleeps for `duration`, freezing the remaining time whenever
    /// [`Self::pause`] fires mid-sleep and picking back up from where it
    /// left off once [`Self::resume`] is called. Returns the total time
    /// spent paused alongside the usual break/continue signal, so the
    /// caller can push its own deadline bookkeeping out by the same amount.
    async fn sleep_pausable(&self, duration: Duration) -> (std::ops::ControlFlow<()>, Duration) {
        let mut remaining = duration;
        let mut paused_total = Duration::ZERO;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return (std::ops::ControlFlow::Break(()), paused_total);
            }
            if *self.state.read() == RunState::Paused {
                *self.remaining_budget.write() = Some(remaining);
                let pause_started = Instant::now();
                self.wait_while_paused().await;
                paused_total += pause_started.elapsed();
                if self.stopped.load(Ordering::SeqCst) {
                    return (std::ops::ControlFlow::Break(()), paused_total);
                }
                remaining = self.remaining_budget.write().take().unwrap_or(remaining);
            }

            let started = Instant::now();
            tokio::select! {
                _ = self.cancel.cancelled() => return (std::ops::ControlFlow::Break(()), paused_total),
                _ = self.pause_notify.notified() => {
                    remaining = remaining.saturating_sub(started.elapsed());
                    continue;
                }
                _ = tokio::time::sleep(remaining) => return (std::ops::ControlFlow::Continue(()), paused_total),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::types::{Fit, MediaType};

    fn item(id: &str, display_ms: u64, transition_ms: u64) -> TimelineItem {
        TimelineItem {
            id: id.to_string(),
            media_id: Some(id.to_string()),
            media_type: MediaType::Image,
            remote_url: None,
            local_path: Some(format!("/cache/{id}.jpg")),
            local_url: None,
            display_ms,
            fit: Fit::Contain,
            muted: false,
            sha256: None,
            transition_duration_ms: transition_ms,
            meta: serde_json::Value::Null,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transition_start_fires_before_item_complete() {
        let scheduler = TimelineScheduler::new(vec![item("a", 100, 20), item("b", 100, 0)]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = tokio::spawn(scheduler.clone().run(tx));

        let mut events = Vec::new();
        for _ in 0..4 {
            events.push(rx.recv().await.unwrap());
        }
        scheduler.stop();
        let _ = handle.await;

        assert!(matches!(events[0], SchedulerEvent::PlayItem { .. }));
        assert!(matches!(events[1], SchedulerEvent::TransitionStart { .. }));
        assert!(matches!(events[2], SchedulerEvent::ItemComplete { .. }));
        assert!(matches!(events[3], SchedulerEvent::PlayItem { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_the_in_flight_item_timer() {
        let scheduler = TimelineScheduler::new(vec![item("a", 1000, 0)]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = tokio::spawn(scheduler.clone().run(tx));

        assert!(matches!(rx.recv().await.unwrap(), SchedulerEvent::PlayItem { .. }));

        tokio::time::sleep(Duration::from_millis(400)).await;
        scheduler.pause();

        // The item's original 1000ms budget has long since elapsed, but
        // nothing should complete while paused.
        let during_pause = tokio::time::timeout(Duration::from_millis(1000), rx.recv()).await;
        assert!(during_pause.is_err(), "item completed while paused");

        scheduler.resume();
        let event = tokio::time::timeout(Duration::from_millis(1000), rx.recv())
            .await
            .expect("item completes after resume")
            .unwrap();
        assert!(matches!(event, SchedulerEvent::ItemComplete { .. }));

        scheduler.stop();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_the_loop() {
        let scheduler = TimelineScheduler::new(vec![item("a", 50, 0)]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = tokio::spawn(scheduler.clone().run(tx));
        let _ = rx.recv().await;
        scheduler.stop();
        let result = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert!(result.is_ok());
    }
}
