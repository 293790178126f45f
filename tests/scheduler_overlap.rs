// tests/scheduler_overlap.rs
//
// Tick cadence, overlap protection and stop semantics on tokio's paused clock.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{page, unavailable, ScriptedTransport};
use event_pipeline::ingest::types::PollOptions;
use event_pipeline::{PollingEngine, Scheduler};

fn scheduler_with(t: &Arc<ScriptedTransport>, endpoints: &[&str]) -> Scheduler {
    let engine = Arc::new(PollingEngine::with_transport(Arc::clone(t) as _));
    for id in endpoints {
        engine.register_endpoint(id, &format!("https://api.example.com/poller/{id}"), "k");
    }
    Scheduler::new(engine, PollOptions::default())
}

#[tokio::test(start_paused = true)]
async fn first_tick_fires_after_one_interval() {
    let t = Arc::new(ScriptedTransport::new(vec![Ok(page(2, "c1"))]));
    let s = scheduler_with(&t, &["a"]);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = Arc::clone(&seen);

    s.start(Duration::from_secs(10), move |_results, rows| {
        let seen = Arc::clone(&seen2);
        async move {
            seen.fetch_add(rows.len(), Ordering::SeqCst);
        }
    });
    assert!(s.is_running());

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(t.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(t.call_count(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    let stats = s.stats();
    assert_eq!(stats.total_events, 2);
    assert_eq!(stats.successful_polls, 1);
    assert!(stats.last_tick_at.is_some());
    s.stop();
}

#[tokio::test(start_paused = true)]
async fn slow_cycle_causes_following_ticks_to_be_skipped() {
    // Each fetch takes 25s against a 10s interval.
    let t = Arc::new(ScriptedTransport::new(vec![]).with_delay(Duration::from_secs(25)));
    let s = scheduler_with(&t, &["a"]);
    s.start(Duration::from_secs(10), |_, _| async {});

    // Ticks at 10 (runs until 35), 20 and 30 (skipped), 40 (runs).
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(s.is_polling());
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(t.call_count(), 2);
    assert_eq!(s.stats().skipped_ticks, 2);
    s.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_lets_running_cycle_finish() {
    let t = Arc::new(ScriptedTransport::new(vec![Ok(page(1, "c1"))]).with_delay(Duration::from_secs(5)));
    let s = scheduler_with(&t, &["a"]);

    // Never started.
    s.stop();
    assert!(!s.is_running());

    let done = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&done);
    s.start(Duration::from_secs(10), move |_, _| {
        let d = Arc::clone(&d);
        async move {
            d.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(s.is_polling());
    s.stop();
    s.stop();
    assert!(!s.is_running());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(t.call_count(), 1);
    assert!(!s.is_polling());
}

#[tokio::test(start_paused = true)]
async fn poll_now_runs_even_while_a_tick_is_in_flight() {
    let t = Arc::new(
        ScriptedTransport::new(vec![Ok(page(1, "c1")), Ok(page(3, "c2"))]).with_delay(Duration::from_secs(5)),
    );
    let s = scheduler_with(&t, &["a"]);
    s.start(Duration::from_secs(10), |_, _| async {});

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(s.is_polling());

    let (results, rows) = s.poll_now().await;
    assert_eq!(results.len(), 1);
    assert_eq!(rows.len(), 3);
    assert_eq!(t.call_count(), 2);
    s.stop();
}

#[tokio::test(start_paused = true)]
async fn failed_endpoints_count_as_failed_polls() {
    let t = Arc::new(ScriptedTransport::new(vec![Ok(page(1, "c1")), unavailable()]));
    let s = scheduler_with(&t, &["a", "b"]);

    let (results, rows) = s.poll_now().await;
    assert_eq!(results.len(), 2);
    assert_eq!(rows.len(), 1);
    let stats = s.stats();
    assert_eq!(stats.successful_polls, 1);
    assert_eq!(stats.failed_polls, 1);
    assert_eq!(stats.total_events, 1);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_raised_to_the_floor_and_keeps_ticking() {
    let t = Arc::new(ScriptedTransport::new(vec![]));
    let s = scheduler_with(&t, &["a"]);
    s.start(Duration::ZERO, |_, _| async {});

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(s.is_running());
    assert!(t.call_count() >= 1);
    assert!(s.stats().successful_polls >= 1);
    s.stop();
}
