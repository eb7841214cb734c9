//! End-to-end tests for the event pipeline (bus -> logger + broker).

use lgh_events::{
    read_events, select_last, EventContext, EventLogger, EventType, FnHandler, LoggerConfig,
    LOG_FILE_NAME,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_push_event_is_logged_and_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = EventContext::open(dir.path()).unwrap();
    let mut subscribers: Vec<_> = (0..4).map(|_| ctx.broker().subscribe_client()).collect();

    let payload = json!({
        "changes": {"refs/heads/main": {"action": "updated", "new": "abc1234"}}
    });
    let event = ctx.publish(EventType::GitPush, "demo", payload.as_object().cloned());

    for sub in &mut subscribers {
        let received = sub.try_recv().expect("subscriber should receive the push");
        assert_eq!(received, event);
        assert!(sub.try_recv().is_none());
    }

    ctx.shutdown().unwrap();

    let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["type"], "git.push");
    assert_eq!(value["repo"], "demo");
    assert_eq!(
        value["payload"]["changes"]["refs/heads/main"]["new"],
        "abc1234"
    );
}

#[test]
fn test_failing_observer_does_not_block_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = EventContext::open(dir.path()).unwrap();
    let mut sub = ctx.broker().subscribe_client();

    ctx.bus().subscribe(Arc::new(FnHandler::new("exploding", |_: &lgh_events::Event| {
        panic!("observer bug")
    })));
    let after = Arc::new(AtomicUsize::new(0));
    let counter = after.clone();
    ctx.bus().subscribe(Arc::new(FnHandler::new("counter", move |_: &lgh_events::Event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })));

    ctx.publish(EventType::RepoAdded, "demo", None);

    assert!(sub.try_recv().is_some());
    assert_eq!(after.load(Ordering::SeqCst), 1);

    ctx.shutdown().unwrap();
    assert_eq!(read_events(dir.path().join(LOG_FILE_NAME)).unwrap().len(), 1);
}

#[test]
fn test_concurrent_publishers_exceeding_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let logger = EventLogger::with_config(
        dir.path(),
        LoggerConfig {
            queue_capacity: 4,
            ..LoggerConfig::default()
        },
    )
    .unwrap();
    let ctx = EventContext::with_logger(logger);

    let threads: Vec<_> = (0..6)
        .map(|t| {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    ctx.publish(EventType::GitPush, format!("t{}-{}", t, i), None);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    ctx.shutdown().unwrap();

    let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
    let stats = ctx.logger().unwrap().stats();
    let mut count = 0u64;
    for line in contents.lines() {
        let value: serde_json::Value = serde_json::from_str(line).expect("every line is valid JSON");
        assert_eq!(value["type"], "git.push");
        count += 1;
    }
    assert!(count <= 1200);
    assert_eq!(count, stats.accepted);
    assert_eq!(stats.accepted + stats.dropped, 1200);
}

#[test]
fn test_log_can_be_read_back_for_replay() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = EventContext::open(dir.path()).unwrap();

    for i in 0..5 {
        ctx.publish(EventType::GitPush, format!("push-{}", i), None);
        ctx.publish(EventType::RepoAdded, format!("add-{}", i), None);
    }
    ctx.shutdown().unwrap();

    let events = read_events(dir.path().join(LOG_FILE_NAME)).unwrap();
    let last = select_last(events, 3, Some("git.push"));
    let repos: Vec<_> = last.iter().map(|e| e.repo_name().to_string()).collect();
    assert_eq!(repos, vec!["push-2", "push-3", "push-4"]);
}
