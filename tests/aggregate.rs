//! Tests for aggregating independent named streams.

use async_trait::async_trait;
use conflux::testing::{assert_keys_never_removed, collect, from_values};
use conflux::{BoundedStream, BoxStream, BroadcastBuilder, Error, Object, Stream, StreamExt, aggregate};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn obj(pairs: &[(&str, i32)]) -> Object<i32> {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

#[tokio::test]
async fn test_first_tuple_holds_first_values() {
    let cancel = CancellationToken::new();
    let mut agg = aggregate(
        &cancel,
        vec![("a", from_values(vec![1, 2, 3])), ("b", from_values(vec![10]))],
    );
    assert_eq!(agg.arity(), 2);

    let tuples = collect(&mut agg).await.unwrap();
    assert_eq!(tuples[0], obj(&[("a", 1), ("b", 10)]));
    assert_eq!(tuples.last(), Some(&obj(&[("a", 3), ("b", 10)])));
    assert_keys_never_removed(&tuples);
    agg.close().await.unwrap();
}

#[tokio::test]
async fn test_updates_after_first_tuple() {
    let mut a = BroadcastBuilder::<i32>::new();
    let mut b = BroadcastBuilder::<i32>::new();
    let cancel = CancellationToken::new();
    let mut agg = aggregate(
        &cancel,
        vec![("a", a.subscribe().boxed()), ("b", b.subscribe().boxed())],
    );
    let mut a = a.start();
    let mut b = b.start();

    a.emit(1, &cancel).await.unwrap();
    b.emit(2, &cancel).await.unwrap();
    assert_eq!(agg.next(&cancel).await.unwrap(), obj(&[("a", 1), ("b", 2)]));

    b.emit(3, &cancel).await.unwrap();
    let update = tokio::time::timeout(Duration::from_secs(2), agg.next(&cancel)).await.unwrap();
    assert_eq!(update.unwrap(), obj(&[("a", 1), ("b", 3)]));

    a.close();
    b.close();
    let end = tokio::time::timeout(Duration::from_secs(2), agg.next(&cancel)).await.unwrap();
    assert!(end.unwrap_err().is_end_of_stream());
}

#[tokio::test]
async fn test_name_ending_without_value_ends_aggregate() {
    let cancel = CancellationToken::new();
    let mut agg = aggregate(
        &cancel,
        vec![("a", from_values(vec![1])), ("b", from_values(Vec::new()))],
    );
    assert!(agg.next(&cancel).await.unwrap_err().is_end_of_stream());
}

#[tokio::test]
async fn test_no_streams_is_empty() {
    let cancel = CancellationToken::new();
    let mut agg = aggregate::<u8, &str, _>(&cancel, Vec::new());
    assert!(agg.next(&cancel).await.unwrap_err().is_end_of_stream());
}

#[tokio::test]
async fn test_stream_failure_surfaces() {
    let cancel = CancellationToken::new();
    let failing: BoxStream<i32> = BoundedStream::new(|| async { anyhow::bail!("check failed") }).boxed();
    let mut agg = aggregate(&cancel, vec![("a", from_values(vec![1])), ("b", failing)]);
    match agg.next(&cancel).await {
        Err(Error::Source(err)) => assert!(err.to_string().contains("check failed")),
        other => panic!("expected source error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_blocked_next_is_interruptible() {
    let mut silent = BroadcastBuilder::<i32>::new();
    let cancel = CancellationToken::new();
    let mut agg = aggregate(&cancel, vec![("a", silent.subscribe().boxed())]);
    let _publisher = silent.start();

    let call = CancellationToken::new();
    let trigger = call.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let next = tokio::time::timeout(Duration::from_secs(2), agg.next(&call)).await.unwrap();
    assert!(next.unwrap_err().is_interrupted());
}

struct Tracked {
    closed: Arc<AtomicBool>,
    fail_close: bool,
}

#[async_trait]
impl Stream<i32> for Tracked {
    async fn next(&mut self, cancel: &CancellationToken) -> conflux::Result<i32> {
        cancel.cancelled().await;
        Err(Error::Interrupted)
    }

    async fn close(&mut self) -> conflux::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            Err(Error::upstream(anyhow::anyhow!("close failed")))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_close_closes_every_input_and_collects_errors() {
    let first = Arc::new(AtomicBool::new(false));
    let second = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();
    let mut agg = aggregate(
        &cancel,
        vec![
            ("ok", Tracked { closed: Arc::clone(&first), fail_close: false }.boxed()),
            ("bad", Tracked { closed: Arc::clone(&second), fail_close: true }.boxed()),
        ],
    );

    let closed = tokio::time::timeout(Duration::from_secs(2), agg.close()).await.unwrap();
    match closed {
        Err(Error::Close(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].0, "bad");
        }
        other => panic!("expected close error, got {other:?}"),
    }
    assert!(first.load(Ordering::SeqCst));
    assert!(second.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_inputs_run_at_most_one_slot_ahead() -> anyhow::Result<()> {
    let mut a = BroadcastBuilder::<i32>::new();
    let cancel = CancellationToken::new();
    let mut agg = aggregate(&cancel, vec![("a", a.subscribe().boxed())]);
    let mut a = a.start();

    let producer = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        for v in 1..=5 {
            a.emit(v, &cancel).await?;
        }
        a.close();
        Ok::<(), Error>(())
    });

    // one value buffered, one held by the fan-in task, the third emit waits
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!producer.is_finished());

    let tuples = collect(&mut agg).await?;
    assert_eq!(tuples.first(), Some(&obj(&[("a", 1)])));
    assert_eq!(tuples.last(), Some(&obj(&[("a", 5)])));
    producer.await??;
    agg.close().await?;
    Ok(())
}
