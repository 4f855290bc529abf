mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use common::*;
use engine_cache::prelude::*;

struct Fixture {
    store: Arc<BlobStore>,
    fetcher: Arc<ScriptedFetcher>,
    flow: Arc<DownloadFlow<Arc<ScriptedFetcher>, StubLoader>>,
}

async fn fixture() -> Fixture {
    let store = Arc::new(BlobStore::open_in_memory().await.unwrap());
    let session = Arc::new(SessionFlags::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let manager = Arc::new(DownloadManager::new(
        test_manifest(),
        store.clone(),
        session,
        fetcher.clone(),
    ));
    let init = Arc::new(EngineInitializer::new(StubLoader::new()));
    let flow = Arc::new(DownloadFlow::new(manager, store.clone(), init));
    Fixture {
        store,
        fetcher,
        flow,
    }
}

#[tokio::test]
async fn check_if_downloaded_without_cache_returns_to_idle() {
    let fx = fixture().await;
    assert!(!fx.flow.check_if_downloaded().await);
    assert_eq!(fx.flow.status(), FlowStatus::Idle);
}

#[tokio::test]
async fn check_if_downloaded_with_valid_cache_completes() {
    let fx = fixture().await;
    fx.store.put("a", &text_payload(100)).await.unwrap();
    fx.store.put("b", &binary_payload(100)).await.unwrap();

    assert!(fx.flow.check_if_downloaded().await);
    assert_eq!(fx.flow.status(), FlowStatus::Completed);
    assert_eq!(fx.fetcher.request_count(), 0);
}

#[tokio::test]
async fn corrupt_cache_is_cleared_and_redownloaded_from_scratch() {
    let fx = fixture().await;
    fx.store.put("a", &text_payload(100)).await.unwrap();
    // Binary entry cached with a text payload: verification must fail.
    fx.store.put("b", &text_payload(100)).await.unwrap();

    assert!(!fx.flow.check_if_downloaded().await);
    assert_eq!(fx.flow.status(), FlowStatus::Idle);
    // The corrupt bundle is wiped, entries valid before the wipe included.
    assert!(!fx.store.exists("a").await.unwrap());
    assert!(!fx.store.exists("b").await.unwrap());

    // The next download run starts from scratch instead of trusting "b".
    fx.fetcher
        .script(primary_url("a"), ScriptedResponse::Ok(text_payload(100)));
    fx.fetcher
        .script(primary_url("b"), ScriptedResponse::Ok(binary_payload(100)));
    let report = fx.flow.start_download().await;
    assert!(report.success);
    assert_eq!(fx.fetcher.request_count(), 2);
    assert!(fx.flow.check_if_downloaded().await);
}

#[tokio::test]
async fn show_options_publishes_the_dialog_state() {
    let fx = fixture().await;
    fx.flow.show_options();
    assert_eq!(fx.flow.status(), FlowStatus::Options);
    assert_eq!(*fx.flow.watch_status().borrow(), FlowStatus::Options);
}

#[tokio::test]
async fn successful_download_reports_progress_and_completes() {
    let fx = fixture().await;
    fx.fetcher
        .script(primary_url("a"), ScriptedResponse::Ok(text_payload(100)));
    fx.fetcher
        .script(primary_url("b"), ScriptedResponse::Ok(binary_payload(100)));

    let report = fx.flow.start_download().await;
    assert!(report.success);
    assert_eq!(fx.flow.status(), FlowStatus::Completed);
    assert_eq!(fx.flow.watch_progress().borrow().aggregate_percent, 100);
}

#[tokio::test]
async fn failed_download_freezes_progress_in_error_state() {
    let fx = fixture().await;
    fx.fetcher
        .script(primary_url("a"), ScriptedResponse::Ok(text_payload(100)));
    fx.fetcher.script(primary_url("b"), ScriptedResponse::Fail);
    fx.fetcher.script(fallback_url("b"), ScriptedResponse::Fail);

    let report = fx.flow.start_download().await;
    assert!(!report.success);
    assert_eq!(fx.flow.status(), FlowStatus::Error);
    // "a" settled before the abort, so the UI freezes at its credit.
    assert_eq!(fx.flow.watch_progress().borrow().aggregate_percent, 50);
}

#[tokio::test]
async fn cancel_download_aborts_and_returns_to_idle() {
    let fx = fixture().await;
    fx.fetcher.script(primary_url("a"), ScriptedResponse::Hang);

    let runner = {
        let flow = fx.flow.clone();
        tokio::spawn(async move { flow.start_download().await })
    };

    // Wait for the transfer to be visibly in flight, then cancel it.
    let mut status = fx.flow.watch_status();
    timeout(Duration::from_secs(5), async {
        while *status.borrow() != FlowStatus::Downloading {
            status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    fx.flow.cancel_download();

    let report = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
    assert!(!report.success);
    assert!(matches!(report.error, Some(DownloadError::Cancelled)));
    assert_eq!(fx.flow.status(), FlowStatus::Idle);
    assert!(!fx.store.exists("a").await.unwrap());
}

#[tokio::test]
async fn download_and_initialize_skips_network_when_cached() {
    let fx = fixture().await;
    fx.store.put("a", &text_payload(100)).await.unwrap();
    fx.store.put("b", &binary_payload(100)).await.unwrap();

    let engine = fx.flow.download_and_initialize().await.unwrap();
    assert_eq!(engine.id, 1);
    assert_eq!(fx.fetcher.request_count(), 0);
    assert_eq!(fx.flow.status(), FlowStatus::Completed);
}
