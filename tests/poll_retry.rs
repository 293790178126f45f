// tests/poll_retry.rs
//
// Retry/backoff, ordering and credential rotation with a scripted transport
// on tokio's paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{page, unavailable, ScriptedTransport};
use event_pipeline::ingest::types::{ErrorHandling, PollError, PollHealth, PollOptions};
use event_pipeline::PollingEngine;

fn engine_with(transport: &Arc<ScriptedTransport>) -> PollingEngine {
    PollingEngine::with_transport(Arc::clone(transport) as _)
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_after_two_failures_with_doubling_backoff() {
    let t = Arc::new(ScriptedTransport::new(vec![
        unavailable(),
        unavailable(),
        Ok(page(2, "cur-9")),
    ]));
    let engine = engine_with(&t);
    engine.register_endpoint("a", "https://api.example.com/poller/a", "k");

    let res = engine
        .poll_endpoint("a", &PollOptions::retry(3))
        .await
        .expect("third attempt succeeds");
    assert_eq!(res.events.len(), 2);
    assert_eq!(engine.cursor("a").as_deref(), Some("cur-9"));

    let times = t.call_times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[1] - times[0], Duration::from_secs(1));
    assert_eq!(times[2] - times[1], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_degrade_to_error() {
    let t = Arc::new(ScriptedTransport::new(vec![
        unavailable(),
        unavailable(),
        unavailable(),
        unavailable(),
        Ok(page(1, "never")),
    ]));
    let engine = engine_with(&t);
    engine.register_endpoint("a", "https://api.example.com/poller/a", "k");

    let err = engine.poll_endpoint("a", &PollOptions::retry(3)).await.unwrap_err();
    match err {
        PollError::Transport { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(t.call_count(), 4);
    assert_eq!(engine.cursor("a"), None);
}

#[tokio::test(start_paused = true)]
async fn throw_policy_makes_a_single_attempt() {
    let t = Arc::new(ScriptedTransport::new(vec![unavailable(), Ok(page(1, "x"))]));
    let engine = engine_with(&t);
    engine.register_endpoint("a", "https://api.example.com/poller/a", "k");

    assert!(engine.poll_endpoint("a", &PollOptions::default()).await.is_err());
    assert_eq!(t.call_count(), 1);
    assert!(matches!(
        engine.poll_endpoint("missing", &PollOptions::default()).await,
        Err(PollError::UnknownEndpoint(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn poll_all_keeps_registration_order_and_flags_failures() {
    let t = Arc::new(ScriptedTransport::new(vec![
        Ok(page(1, "z1")),
        unavailable(),
        Ok(page(3, "a1")),
    ]));
    let engine = engine_with(&t);
    engine.register_endpoint("zeta", "https://api.example.com/poller/zeta", "k");
    engine.register_endpoint("mid", "https://api.example.com/poller/mid", "k");
    engine.register_endpoint("alpha", "https://api.example.com/poller/alpha", "k");

    let opts = PollOptions {
        error_handling: ErrorHandling::Throw,
        ..PollOptions::default()
    };
    let results = engine.poll_all_endpoints(&opts).await;
    let ids: Vec<&str> = results.iter().map(|r| r.endpoint_id.as_str()).collect();
    assert_eq!(ids, vec!["zeta", "mid", "alpha"]);

    assert_eq!(results[0].health, PollHealth::Ok);
    assert!(results[1].events.is_empty());
    assert!(matches!(results[1].health, PollHealth::Failed { .. }));
    assert_eq!(results[2].events.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn in_flight_poll_keeps_old_credential_after_rotation() {
    let t = Arc::new(
        ScriptedTransport::new(vec![Ok(page(1, "c1")), Ok(page(1, "c2"))]).with_delay(Duration::from_secs(5)),
    );
    let engine = Arc::new(engine_with(&t));
    engine.register_endpoint("a", "https://api.example.com/poller/a", "old-key");

    let e = Arc::clone(&engine);
    let in_flight = tokio::spawn(async move { e.poll_endpoint("a", &PollOptions::default()).await });

    // Let the spawned poll reach the transport, then rotate.
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.update_endpoint_credential("a", "new-key").unwrap();

    in_flight.await.unwrap().unwrap();
    engine.poll_endpoint("a", &PollOptions::default()).await.unwrap();

    let creds: Vec<String> = t.requests().into_iter().map(|r| r.credential).collect();
    assert_eq!(creds, vec!["old-key".to_string(), "new-key".to_string()]);
    assert_eq!(engine.cursor("a").as_deref(), Some("c2"));
}

#[tokio::test(start_paused = true)]
async fn removing_endpoint_mid_poll_discards_cursor_write() {
    let t = Arc::new(ScriptedTransport::new(vec![Ok(page(1, "c1"))]).with_delay(Duration::from_secs(5)));
    let engine = Arc::new(engine_with(&t));
    engine.register_endpoint("a", "https://api.example.com/poller/a", "k");

    let e = Arc::clone(&engine);
    let in_flight = tokio::spawn(async move { e.poll_endpoint("a", &PollOptions::default()).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(engine.remove_endpoint("a"));

    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.events.len(), 1);
    assert!(engine.endpoint("a").is_none());
}
