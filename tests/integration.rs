//! Integration tests for composed blocks

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blockweld::buffer::drain;
use blockweld::prelude::*;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_test::{assert_err, assert_ok};

/// Collects everything delivered to it.
fn collector<T: Send + 'static>() -> (Arc<ActionBlock<T>>, Arc<Mutex<Vec<T>>>) {
    let items = Arc::new(Mutex::new(Vec::new()));
    let sink = items.clone();
    let block = ActionBlock::with_options(
        move |item: T| {
            let sink = sink.clone();
            async move {
                sink.lock().await.push(item);
                Ok(())
            }
        },
        ExecutionOptions::sequential(),
    );
    (Arc::new(block), items)
}

#[tokio::test(start_paused = true)]
async fn test_debounce_collapse() {
    let throttle = ThrottleBlock::<String>::new(Duration::from_millis(200));
    let (sink, items) = collector::<String>();
    throttle.link(sink.clone(), LinkOptions::propagating());

    for word in ["S", "SF", "SF ", "SF C"] {
        throttle.post(word.to_string());
        sleep(Duration::from_millis(50)).await;
    }
    sleep(Duration::from_millis(400)).await;
    throttle.complete();

    assert_ok!(sink.completion().await);
    assert_eq!(*items.lock().await, vec!["SF C".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_restart() {
    let throttle = ThrottleBlock::new(Duration::from_millis(100));
    let start = Instant::now();
    for i in 0..10 {
        throttle.post(i);
        sleep(Duration::from_millis(90)).await;
    }

    assert_eq!(throttle.receive().await, Some(9));
    assert!(start.elapsed() >= Duration::from_millis(910));
}

#[tokio::test(start_paused = true)]
async fn test_delay_preserves_content() {
    let delay = DelayBlock::new(Duration::from_millis(100));
    delay.post("x");
    sleep(Duration::from_millis(1)).await;
    delay.post("y");
    delay.complete();

    let buffer = BufferBlock::<&str>::new();
    delay.link(Arc::new(buffer.clone()), LinkOptions::propagating());
    let items: HashSet<_> = assert_ok!(drain(&buffer).await).into_iter().collect();
    assert_eq!(items, HashSet::from(["x", "y"]));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_delay_count() {
    let delay = DelayBlock::<i32>::new(Duration::from_millis(100));
    let (sink, items) = collector::<i32>();
    delay.link(sink.clone(), LinkOptions::propagating());

    for i in 0..1000 {
        assert!(delay.post(i));
    }
    delay.complete();
    assert_ok!(sink.completion().await);

    let mut collected = items.lock().await.clone();
    assert_eq!(collected.len(), 1000);
    collected.sort();
    assert_eq!(collected, (0..1000).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_throttle_feeding_delay() {
    let throttle = ThrottleBlock::<i32>::new(Duration::from_millis(50));
    let delay = Arc::new(DelayBlock::<i32>::new(Duration::from_millis(50)));
    throttle.link(delay.clone(), LinkOptions::propagating());

    throttle.post(1);
    throttle.post(2);
    sleep(Duration::from_millis(200)).await;
    throttle.complete();

    assert_eq!(delay.receive().await, Some(2));
    assert_eq!(delay.receive().await, None);
    assert_ok!(delay.completion().await);
}

#[tokio::test(start_paused = true)]
async fn test_fault_propagates_through_links() {
    let throttle = ThrottleBlock::<u32>::new(Duration::from_millis(50));
    let delay = Arc::new(DelayBlock::<u32>::new(Duration::from_millis(50)));
    let (sink, _items) = collector::<u32>();
    throttle.link(delay.clone(), LinkOptions::propagating());
    delay.link(sink.clone(), LinkOptions::propagating());

    throttle.fault(Error::custom("upstream failed"));

    let error = assert_err!(sink.completion().await);
    assert_eq!(error.to_string(), "upstream failed");
    assert!(!delay.post(1));
}

#[tokio::test]
async fn test_idempotent_completion() {
    let buffer = BufferBlock::<u8>::new();
    let action = ActionBlock::new(|_: u8| async { Ok(()) });
    let throttle = ThrottleBlock::<u8>::new(Duration::from_millis(10));
    let delay = DelayBlock::<u8>::new(Duration::from_millis(10));
    let (_events, rx) = mpsc::unbounded_channel::<WatchEvent>();
    let file_drop =
        FileDropSource::from_events(UnboundedReceiverStream::new(rx), Duration::from_millis(10));

    let blocks: Vec<&dyn Block> = vec![&buffer, &action, &throttle, &delay, &file_drop];
    for block in &blocks {
        block.complete();
        block.complete();
    }
    for block in &blocks {
        assert_ok!(block.completion().await);
        block.fault(Error::custom("after completion"));
        assert_ok!(block.completion().await);
    }
}

#[tokio::test]
async fn test_file_drop_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileDropConfig::new(dir.path())
        .filter("*.txt")
        .quiet_period(Duration::from_millis(50))
        .poll_interval(Duration::from_millis(20));
    let source = FileDropSource::watch(config).unwrap();

    sleep(Duration::from_millis(100)).await;
    std::fs::write(dir.path().join("ignored.bin"), b"skip").unwrap();
    std::fs::write(dir.path().join("dropped.txt"), b"hello").unwrap();

    let path = timeout(Duration::from_secs(5), source.receive())
        .await
        .unwrap();
    assert_eq!(path, Some(dir.path().join("dropped.txt")));

    source.complete();
    assert_eq!(source.receive().await, None);
    assert_ok!(source.completion().await);
}

#[tokio::test]
async fn test_file_drop_fault_on_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileDropConfig::new(dir.path().join("missing"));
    let source = FileDropSource::watch(config).unwrap();

    let error = assert_err!(timeout(Duration::from_secs(5), source.completion().wait())
        .await
        .unwrap());
    assert!(matches!(error, Error::Io(_)));
    assert!(source.submit(PathBuf::from("late.txt")).is_err());
}

#[tokio::test]
async fn test_outcome_mapping() {
    let addresses = vec![
        "erez@example.com".to_string(),
        "dave@example.com".to_string(),
        "not-an-address".to_string(),
    ];

    let outcomes = collect_outcomes(
        addresses,
        ExecutionOptions::default().max_concurrency(2),
        |address: String| async move {
            sleep(Duration::from_millis(5)).await;
            if address.contains('@') {
                Ok(())
            } else {
                Err(Error::custom(format!("cannot deliver to {}", address)))
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(outcomes["erez@example.com"], Outcome::Success);
    assert_eq!(outcomes["dave@example.com"], Outcome::Success);
    assert_eq!(outcomes["not-an-address"].to_string(), "fail");
}
