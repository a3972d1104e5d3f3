//! Tests for resource checks and the polling version stream.

use anyhow::Result;
use conflux::config::ResourceConfig;
use conflux::resource::{ResourceVersion, check_stream, latest_version, version_stream};
use conflux::testing::{ScriptedChecker, collect, init_tracing, single_check_resource, take, version};
use conflux::{Error, Stream};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn repo() -> Arc<ResourceConfig> {
    Arc::new(single_check_resource("repo"))
}

#[tokio::test]
async fn test_check_without_from_keeps_latest_only() -> Result<()> {
    let checker = Arc::new(ScriptedChecker::new().with_versions("repo", [1, 2, 3]));
    let mut stream = check_stream(repo(), checker.clone(), None);
    assert_eq!(collect(&mut stream).await?, vec![version("repo", 3)]);
    assert_eq!(checker.calls_for("repo"), 1);
    Ok(())
}

#[tokio::test]
async fn test_check_from_version_returns_it_and_newer() -> Result<()> {
    let checker = Arc::new(ScriptedChecker::new().with_versions("repo", [1, 2, 3]));
    let mut stream = check_stream(repo(), checker.clone(), Some(json!({"v": 2})));
    assert_eq!(
        collect(&mut stream).await?,
        vec![version("repo", 2), version("repo", 3)]
    );
    assert_eq!(checker.calls()[0].from, Some(json!({"v": 2})));
    Ok(())
}

#[test]
fn test_check_is_lazy() {
    let checker = Arc::new(ScriptedChecker::new().with_versions("repo", [1]));
    let stream = check_stream(repo(), checker.clone(), None);
    drop(stream);
    assert_eq!(checker.calls_for("repo"), 0);
}

#[tokio::test]
async fn test_failed_check_names_the_resource() -> Result<()> {
    let checker = Arc::new(ScriptedChecker::new().failing("repo", "401 unauthorized"));
    let mut stream = check_stream(repo(), checker, None);
    let err = stream.next(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Source(_)));
    let message = err.to_string();
    assert!(message.contains("checking resource repo"), "{message}");
    assert!(message.contains("401 unauthorized"), "{message}");
    Ok(())
}

#[tokio::test]
async fn test_version_stream_discovers_new_versions() -> Result<()> {
    init_tracing();
    let checker = Arc::new(ScriptedChecker::new().with_versions("repo", [1, 2]));
    let mut stream = version_stream(repo(), checker.clone(), None, Duration::from_millis(10));

    assert_eq!(take(&mut stream, 1).await?, vec![version("repo", 2)]);
    checker.push_version("repo", 3);
    checker.push_version("repo", 4);
    assert_eq!(
        take(&mut stream, 2).await?,
        vec![version("repo", 3), version("repo", 4)]
    );

    let calls = checker.calls();
    assert_eq!(calls[0].from, None);
    assert!(calls[1..].iter().any(|c| c.from == Some(json!({"v": 2}))));
    Ok(())
}

#[tokio::test]
async fn test_version_stream_with_empty_history_waits_for_first_version() -> Result<()> {
    let checker = Arc::new(ScriptedChecker::new());
    let mut stream = version_stream(repo(), checker.clone(), None, Duration::from_millis(10));

    let pusher = Arc::clone(&checker);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        pusher.push_version("repo", 1);
    });
    assert_eq!(take(&mut stream, 1).await?, vec![version("repo", 1)]);
    Ok(())
}

#[tokio::test]
async fn test_version_stream_stops_on_cancel() -> Result<()> {
    let checker = Arc::new(ScriptedChecker::new().with_versions("repo", [1]));
    let mut stream = version_stream(repo(), checker, None, Duration::from_secs(3600));
    let cancel = CancellationToken::new();
    assert_eq!(stream.next(&cancel).await?, version("repo", 1));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    assert!(stream.next(&cancel).await.unwrap_err().is_interrupted());
    stream.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_latest_version() -> Result<()> {
    let checker = ScriptedChecker::new().with_versions("repo", [1, 2]);
    let latest = latest_version(&repo(), &checker).await?;
    assert_eq!(latest, version("repo", 2));

    let err = latest_version(&single_check_resource("empty"), &checker).await.unwrap_err();
    assert!(err.to_string().contains("has no versions"));
    Ok(())
}

#[test]
fn test_version_equality_ignores_metadata() {
    let plain = ResourceVersion::new("repo", json!({"ref": "abc"}));
    let annotated = plain.clone().with_metadata("author", "someone");
    assert_eq!(plain, annotated);
    assert_ne!(plain, ResourceVersion::new("fork", json!({"ref": "abc"})));
    assert_eq!(plain.to_string(), r#"repo@{"ref":"abc"}"#);
}
