// src/ingest/scheduler.rs
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::enrich::EnrichedRow;
use crate::ingest::types::{PollOptions, PollResult};
use crate::ingest::{process_events, PollingEngine};

/// Recommended lower bound for the poll interval.
pub const MIN_RECOMMENDED_INTERVAL: Duration = Duration::from_millis(5_000);
/// Hard floor; tokio timers reject a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Running totals for the UI layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStats {
    pub total_events: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub skipped_ticks: u64,
    pub last_tick_at: Option<i64>,
}

/// Drives [`PollingEngine`] on a fixed interval. At most one scheduled cycle
/// runs at a time; ticks that land while a cycle is in flight are dropped.
pub struct Scheduler {
    engine: Arc<PollingEngine>,
    options: PollOptions,
    in_flight: Arc<AtomicBool>,
    stats: Arc<Mutex<PollStats>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<PollingEngine>, options: PollOptions) -> Self {
        Self {
            engine,
            options,
            in_flight: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(PollStats::default())),
            timer: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<PollingEngine> {
        &self.engine
    }

    /// Start ticking every `interval`; the first tick fires after one interval.
    /// Calling `start` again replaces the running timer. Intervals below
    /// [`MIN_INTERVAL`] are raised to it.
    pub fn start<F, Fut>(&self, interval: Duration, on_result: F)
    where
        F: Fn(Vec<PollResult>, Vec<EnrichedRow>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        if interval < MIN_RECOMMENDED_INTERVAL {
            tracing::warn!(
                target: "ingest",
                interval_ms = interval.as_millis() as u64,
                "poll interval below recommended minimum of 5000ms"
            );
        }

        let engine = Arc::clone(&self.engine);
        let options = self.options.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let stats = Arc::clone(&self.stats);
        let on_result = Arc::new(on_result);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                if in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    tracing::warn!(target: "ingest", "previous polling cycle still in progress, skipping tick");
                    counter!("pipeline_ticks_skipped_total").increment(1);
                    stats.lock().skipped_ticks += 1;
                    continue;
                }

                let engine = Arc::clone(&engine);
                let options = options.clone();
                let in_flight = Arc::clone(&in_flight);
                let stats = Arc::clone(&stats);
                let on_result = Arc::clone(&on_result);
                // Detached: `stop()` aborts the ticker only, never a running cycle.
                tokio::spawn(async move {
                    let _reset = InFlightReset(in_flight);
                    let (results, rows) = run_cycle(&engine, &options, &stats).await;
                    tracing::info!(
                        target: "ingest",
                        endpoints = results.len(),
                        rows = rows.len(),
                        "scheduled poll tick"
                    );
                    on_result(results, rows).await;
                });
            }
        });

        if let Some(prev) = self.timer.lock().replace(handle) {
            prev.abort();
        }
    }

    /// Stop scheduling. A cycle already running is left to finish.
    pub fn stop(&self) {
        if let Some(h) = self.timer.lock().take() {
            h.abort();
            tracing::info!(target: "ingest", "scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Whether a scheduled cycle is currently in flight.
    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Poll everything right now. Bypasses the overlap guard.
    pub async fn poll_now(&self) -> (Vec<PollResult>, Vec<EnrichedRow>) {
        run_cycle(&self.engine, &self.options, &self.stats).await
    }

    pub fn stats(&self) -> PollStats {
        *self.stats.lock()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InFlightReset(Arc<AtomicBool>);

impl Drop for InFlightReset {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_cycle(
    engine: &PollingEngine,
    options: &PollOptions,
    stats: &Mutex<PollStats>,
) -> (Vec<PollResult>, Vec<EnrichedRow>) {
    let results = engine.poll_all_endpoints(options).await;
    let rows: Vec<EnrichedRow> = results.iter().flat_map(process_events).collect();

    let now = chrono::Utc::now().timestamp();
    gauge!("pipeline_last_tick_ts").set(now as f64);
    {
        let mut s = stats.lock();
        for r in &results {
            s.total_events += r.events.len() as u64;
            if r.is_ok() {
                s.successful_polls += 1;
            } else {
                s.failed_polls += 1;
            }
        }
        s.last_tick_at = Some(now);
    }

    (results, rows)
}
