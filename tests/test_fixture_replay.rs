//! Replays a recorded market stream through the listener and compares the
//! reconstructed book with a golden document.

use exchange_stream::{Listener, OutputQueue, StreamSettings, SubscriptionKind};
use serde_json::Value;

const FRAMES: &str = include_str!("fixtures/market_replay.jsonl");
const EXPECTED: &str = include_str!("fixtures/market_replay_expected.json");

fn replay(settings: StreamSettings) -> (Listener, Vec<exchange_stream::Batch>) {
    let (publisher, receiver) = OutputQueue::unbounded();
    let mut listener = Listener::new(publisher, settings);
    listener.register_stream(1, SubscriptionKind::Market);

    for line in FRAMES.lines().filter(|l| !l.trim().is_empty()) {
        listener.on_data(line);
    }

    let batches = receiver.try_iter().collect();
    (listener, batches)
}

#[test]
fn test_replay_matches_golden_book() {
    let (listener, _batches) = replay(StreamSettings::default());

    let snap = listener.snap(SubscriptionKind::Market, None);
    assert_eq!(snap.len(), 1);

    let actual = snap[0].to_value().unwrap();
    let expected: Value = serde_json::from_str(EXPECTED).unwrap();
    assert_eq!(actual, expected);
}

#[test]
fn test_replay_tracks_resume_tokens() {
    let (listener, batches) = replay(StreamSettings::default());

    assert_eq!(listener.clk(SubscriptionKind::Market).as_deref(), Some("DDD"));
    assert_eq!(listener.initial_clk(SubscriptionKind::Market).as_deref(), Some("III"));
    assert_eq!(listener.updates_processed(SubscriptionKind::Market), 4);

    // one batch per change message, each carrying the market once
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|batch| batch.len() == 1));
}

#[test]
fn test_replay_intermediate_books() {
    let (_listener, batches) = replay(StreamSettings::default());

    let after_image = batches[0][0].as_market_book().unwrap();
    assert_eq!(after_image.publish_time, 1000);
    assert_eq!(after_image.runners.len(), 2);
    assert!(!after_image.streaming_snap);
    let runner = after_image.runner(101).unwrap();
    let backs: Vec<_> = runner
        .ex
        .available_to_back
        .iter()
        .map(|ps| (ps.price.to_string(), ps.size.to_string()))
        .collect();
    assert_eq!(
        backs,
        vec![("2.48".to_string(), "10".to_string()), ("2.46".to_string(), "5".to_string())]
    );

    let after_new_runner = batches[2][0].as_market_book().unwrap();
    assert_eq!(after_new_runner.runners.len(), 3);
    assert!(after_new_runner.runner(103).unwrap().status.is_none());
}

#[test]
fn test_lightweight_replay_matches_typed() {
    let (typed, _) = replay(StreamSettings::default());
    let (lightweight, batches) = replay(StreamSettings {
        lightweight: true,
        ..StreamSettings::default()
    });

    assert!(batches.iter().flatten().all(|r| r.as_market_book().is_none()));

    let typed = typed.snap(SubscriptionKind::Market, None)[0].to_value().unwrap();
    let raw = lightweight.snap(SubscriptionKind::Market, None)[0].to_value().unwrap();
    assert_eq!(typed, raw);
}
