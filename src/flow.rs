use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::downloader::{DownloadError, DownloadManager, DownloadReport, ProgressReport};
use crate::engine::{EngineInitError, EngineInitializer, EngineLoader};
use crate::fetch::Fetcher;
use crate::store::BlobStore;
use crate::verifier;

/// What the presentation layer should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    Idle,
    Checking,
    /// Waiting for the user to pick a download option.
    Options,
    Downloading,
    Completed,
    Error,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("download failed: {0}")]
    Download(DownloadError),
    #[error(transparent)]
    Init(#[from] EngineInitError),
}

/// Orchestrates the user-facing download flow: status and progress go out on
/// watch channels, user intents come in as method calls. On failure the
/// status flips to `Error` while the progress channel keeps the last known
/// report, so the UI freezes at the percentage reached.
pub struct DownloadFlow<F: Fetcher, L: EngineLoader> {
    manager: Arc<DownloadManager<F>>,
    store: Arc<BlobStore>,
    init: Arc<EngineInitializer<L>>,
    status_tx: watch::Sender<FlowStatus>,
    progress_tx: watch::Sender<ProgressReport>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl<F: Fetcher, L: EngineLoader> DownloadFlow<F, L> {
    pub fn new(
        manager: Arc<DownloadManager<F>>,
        store: Arc<BlobStore>,
        init: Arc<EngineInitializer<L>>,
    ) -> Self {
        let (status_tx, _) = watch::channel(FlowStatus::Idle);
        let (progress_tx, _) = watch::channel(ProgressReport::default());
        Self {
            manager,
            store,
            init,
            status_tx,
            progress_tx,
            cancel: std::sync::Mutex::new(None),
        }
    }

    pub fn status(&self) -> FlowStatus {
        *self.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<FlowStatus> {
        self.status_tx.subscribe()
    }

    pub fn watch_progress(&self) -> watch::Receiver<ProgressReport> {
        self.progress_tx.subscribe()
    }

    /// User intent: surface the download options dialog.
    pub fn show_options(&self) {
        self.status_tx.send_replace(FlowStatus::Options);
    }

    /// Checks whether the bundle is already cached and valid, without any
    /// network access. Moves the status to `Completed` or back to `Idle`.
    pub async fn check_if_downloaded(&self) -> bool {
        self.status_tx.send_replace(FlowStatus::Checking);

        let manifest = self.manager.manifest();
        for entry in manifest.required() {
            match self.store.exists(&entry.key).await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    self.status_tx.send_replace(FlowStatus::Idle);
                    return false;
                }
            }
        }
        let valid = matches!(
            verifier::verify(manifest, &self.store).await,
            Ok(report) if report.all_valid
        );
        if !valid {
            // A corrupt entry would otherwise count as cached on the next
            // run and never be re-fetched; wipe so the download starts from
            // scratch.
            tracing::warn!("cached bundle failed verification, clearing it");
            if let Err(e) = self.store.clear().await {
                tracing::warn!(error = %e, "failed to clear corrupt cache");
            }
        }
        self.status_tx
            .send_replace(if valid { FlowStatus::Completed } else { FlowStatus::Idle });
        valid
    }

    /// User intent: start (or restart) the bundle download. Progress reports
    /// are forwarded to the progress channel as they arrive.
    pub async fn start_download(&self) -> DownloadReport {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());

        self.status_tx.send_replace(FlowStatus::Downloading);
        self.progress_tx.send_replace(ProgressReport::default());

        let progress_tx = self.progress_tx.clone();
        let report = self
            .manager
            .download_all(
                move |report| {
                    progress_tx.send_replace(report);
                },
                |key| tracing::debug!(key = %key, "bundle file ready"),
                &token,
            )
            .await;

        *self.cancel.lock().unwrap() = None;
        match (report.success, &report.error) {
            (true, _) => self.status_tx.send_replace(FlowStatus::Completed),
            (false, Some(DownloadError::Cancelled)) => {
                self.status_tx.send_replace(FlowStatus::Idle)
            }
            (false, _) => self.status_tx.send_replace(FlowStatus::Error),
        };
        report
    }

    /// User intent: abort an in-flight download.
    pub fn cancel_download(&self) {
        if let Some(token) = self.cancel.lock().unwrap().take() {
            tracing::info!("download cancelled by user");
            token.cancel();
        }
    }

    /// The whole acquisition in one call: skip the download when the cache
    /// is already valid, then construct the engine.
    pub async fn download_and_initialize(&self) -> Result<Arc<L::Engine>, FlowError> {
        if !self.check_if_downloaded().await {
            let report = self.start_download().await;
            if !report.success {
                return Err(FlowError::Download(
                    report.error.unwrap_or(DownloadError::Cancelled),
                ));
            }
        }
        match self.init.get_instance().await {
            Ok(engine) => Ok(engine),
            Err(e) => {
                self.status_tx.send_replace(FlowStatus::Error);
                Err(e.into())
            }
        }
    }
}
