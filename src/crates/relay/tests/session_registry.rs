//! Integration tests for push-channel session lifecycle

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use relay::session::{CloseReason, ReleaseCallback, SessionError, SessionMeta, SessionRegistry};
use relay::SessionStats;

fn recording(log: &Arc<Mutex<Vec<CloseReason>>>) -> ReleaseCallback {
    let log = log.clone();
    Box::new(move |reason| log.lock().push(reason))
}

fn meta() -> SessionMeta {
    SessionMeta {
        source_address: Some("127.0.0.1:50000".to_string()),
        path: "/stream".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_session_evicted_exactly_once() {
    let registry = SessionRegistry::new(Duration::from_secs(1), 2);
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.add_session("s-1", meta(), recording(&log)).unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(registry.heartbeat("s-1"));

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert!(registry.sweep(Instant::now()).is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(registry.sweep(Instant::now()), vec!["s-1".to_string()]);
    assert_eq!(registry.get_stats(), SessionStats { active: 0, stale: 0 });

    // late removal and a second sweep are harmless
    assert!(!registry.remove_session("s-1"));
    assert!(registry.sweep(Instant::now()).is_empty());
    assert!(!registry.heartbeat("s-1"));
    assert_eq!(*log.lock(), vec![CloseReason::Timeout]);
}

#[tokio::test(start_paused = true)]
async fn test_stats_count_stale_sessions_without_evicting() {
    let registry = SessionRegistry::new(Duration::from_secs(1), 2);
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.add_session("quiet", meta(), recording(&log)).unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;
    registry.add_session("fresh", meta(), recording(&log)).unwrap();

    assert_eq!(registry.get_stats(), SessionStats { active: 1, stale: 1 });
    assert_eq!(registry.len(), 2);
    assert!(log.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_evicts() {
    let registry = Arc::new(SessionRegistry::new(Duration::from_secs(1), 2));
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.add_session("s-1", meta(), recording(&log)).unwrap();
    let sweeps = Arc::new(AtomicUsize::new(0));
    let counter = sweeps.clone();
    let handle = registry.spawn_sweeper_with(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert!(!registry.contains("s-1"));
    assert_eq!(*log.lock(), vec![CloseReason::Timeout]);
    assert!(sweeps.load(Ordering::SeqCst) >= 3);
    handle.abort();
}

#[tokio::test]
async fn test_duplicate_session_rejected() {
    let registry = SessionRegistry::new(Duration::from_secs(15), 4);
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.add_session("s-1", meta(), recording(&log)).unwrap();

    let second = registry.add_session("s-1", SessionMeta::default(), recording(&log));
    assert_eq!(second, Err(SessionError::Duplicate("s-1".to_string())));
    assert_eq!(registry.meta("s-1"), Some(meta()));

    assert!(registry.remove_session("s-1"));
    assert_eq!(*log.lock(), vec![CloseReason::Client]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_releases_once() {
    let registry = Arc::new(SessionRegistry::new(Duration::from_secs(15), 4));
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    registry
        .add_session(
            "s-1",
            meta(),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    registry.remove_session("s-1")
                } else {
                    registry.close_session("s-1", CloseReason::Completed)
                }
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_replace_releases_previous_registration() {
    let registry = SessionRegistry::new(Duration::from_secs(15), 4);
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = registry.replace_session("s-1", meta(), recording(&log));
    let second = registry.replace_session("s-1", SessionMeta::default(), recording(&log));

    assert_eq!(*log.lock(), vec![CloseReason::Client]);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.meta("s-1"), Some(SessionMeta::default()));

    // the displaced owner can no longer close the session
    assert!(!registry.close_generation("s-1", first, CloseReason::Client));
    assert!(registry.contains("s-1"));

    assert!(registry.close_generation("s-1", second, CloseReason::Completed));
    assert_eq!(*log.lock(), vec![CloseReason::Client, CloseReason::Completed]);
    assert!(registry.is_empty());
}
