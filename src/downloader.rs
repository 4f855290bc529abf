use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::fetch::{FetchError, Fetcher};
use crate::manifest::{Manifest, ManifestEntry, META_DOWNLOAD_DATE, META_VERSION};
use crate::payload::Payload;
use crate::session::{DownloadPhase, SessionFlags};
use crate::store::{BlobStore, StoreError};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of '{key}' failed on primary and fallback: {source}")]
    Network { key: String, source: FetchError },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("download cancelled")]
    Cancelled,
}

/// How a single manifest entry was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOutcome {
    Downloaded,
    Cached,
    Skipped,
}

/// Result of one `download_all` run. On failure `files` holds the outcomes
/// reached before the abort.
#[derive(Debug)]
pub struct DownloadReport {
    pub success: bool,
    pub error: Option<DownloadError>,
    pub files: HashMap<String, FileOutcome>,
}

/// Emitted on every received chunk and whenever a file is settled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub aggregate_percent: u8,
    pub current_key: String,
    pub file_percent: u8,
}

fn percent(numerator: u64, denominator: u64) -> u8 {
    if denominator == 0 {
        return 100;
    }
    let pct = (numerator as f64 / denominator as f64 * 100.0).round() as u64;
    pct.min(100) as u8
}

/// Fetches the manifest in declared order, persisting each completed file
/// into the blob store. Files already cached are credited in full without
/// touching the network. The session flag brackets the run so concurrent
/// readiness checks never race a half-finished download.
pub struct DownloadManager<F: Fetcher> {
    manifest: Manifest,
    store: Arc<BlobStore>,
    session: Arc<SessionFlags>,
    fetcher: F,
}

impl<F: Fetcher> DownloadManager<F> {
    pub fn new(
        manifest: Manifest,
        store: Arc<BlobStore>,
        session: Arc<SessionFlags>,
        fetcher: F,
    ) -> Self {
        Self {
            manifest,
            store,
            session,
            fetcher,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Downloads every required entry that is not already cached.
    ///
    /// Aggregate progress is size-weighted: settled files contribute their
    /// declared size, the in-flight file its current byte count, over the
    /// manifest's total declared size. The reported aggregate never goes
    /// backwards within one run, even across a fallback retry.
    pub async fn download_all(
        &self,
        mut progress: impl FnMut(ProgressReport) + Send,
        mut on_file_complete: impl FnMut(&str) + Send,
        cancel: &CancellationToken,
    ) -> DownloadReport {
        let total = self.manifest.total_declared_size();
        let mut completed_bytes: u64 = 0;
        let mut last_aggregate: u8 = 0;
        let mut files: HashMap<String, FileOutcome> = HashMap::new();

        // Monotonicity guard over the raw size-weighted percentage.
        let mut emit = |mut report: ProgressReport| {
            if report.aggregate_percent < last_aggregate {
                report.aggregate_percent = last_aggregate;
            } else {
                last_aggregate = report.aggregate_percent;
            }
            progress(report);
        };

        self.session.set_download_phase(DownloadPhase::Downloading);

        for entry in self.manifest.entries() {
            if entry.optional {
                tracing::debug!(key = %entry.key, "skipping optional bundle entry");
                files.insert(entry.key.clone(), FileOutcome::Skipped);
                continue;
            }

            match self.store.exists(&entry.key).await {
                Ok(true) => {
                    completed_bytes += entry.declared_size;
                    emit(ProgressReport {
                        aggregate_percent: percent(completed_bytes, total),
                        current_key: entry.key.clone(),
                        file_percent: 100,
                    });
                    on_file_complete(&entry.key);
                    files.insert(entry.key.clone(), FileOutcome::Cached);
                    continue;
                }
                Ok(false) => {}
                Err(e) => return self.abort(files, e.into()),
            }

            let payload = match self
                .fetch_with_fallback(entry, completed_bytes, total, &mut emit, cancel)
                .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "download run aborted");
                    return self.abort(files, e);
                }
            };

            if let Err(e) = self.store.put(&entry.key, &payload).await {
                return self.abort(files, e.into());
            }

            completed_bytes += entry.declared_size;
            emit(ProgressReport {
                aggregate_percent: percent(completed_bytes, total),
                current_key: entry.key.clone(),
                file_percent: 100,
            });
            on_file_complete(&entry.key);
            files.insert(entry.key.clone(), FileOutcome::Downloaded);
        }

        if let Err(e) = self.write_metadata().await {
            return self.abort(files, e.into());
        }

        emit(ProgressReport {
            aggregate_percent: 100,
            current_key: String::new(),
            file_percent: 100,
        });
        self.session.set_download_phase(DownloadPhase::Completed);
        tracing::info!(version = %self.manifest.version(), "engine bundle download complete");
        DownloadReport {
            success: true,
            error: None,
            files,
        }
    }

    /// Resets the session flag so waiters are never stuck on a phantom
    /// in-progress session, then reports the failure.
    fn abort(&self, files: HashMap<String, FileOutcome>, error: DownloadError) -> DownloadReport {
        self.session.set_download_phase(DownloadPhase::Idle);
        DownloadReport {
            success: false,
            error: Some(error),
            files,
        }
    }

    async fn fetch_with_fallback(
        &self,
        entry: &ManifestEntry,
        completed_bytes: u64,
        total: u64,
        emit: &mut (impl FnMut(ProgressReport) + Send),
        cancel: &CancellationToken,
    ) -> Result<Payload, DownloadError> {
        match self
            .fetch_one(entry, &entry.url, completed_bytes, total, emit, cancel)
            .await
        {
            Ok(payload) => Ok(payload),
            Err(DownloadError::Cancelled) => Err(DownloadError::Cancelled),
            Err(first) => {
                tracing::warn!(
                    key = %entry.key,
                    error = %first,
                    "primary fetch failed, retrying against mirror"
                );
                self.fetch_one(entry, &entry.fallback_url, completed_bytes, total, emit, cancel)
                    .await
            }
        }
    }

    async fn fetch_one(
        &self,
        entry: &ManifestEntry,
        url: &str,
        completed_bytes: u64,
        total: u64,
        emit: &mut (impl FnMut(ProgressReport) + Send),
        cancel: &CancellationToken,
    ) -> Result<Payload, DownloadError> {
        let key = entry.key.clone();
        let declared = entry.declared_size;
        let mut on_chunk = |bytes: u64| {
            emit(ProgressReport {
                aggregate_percent: percent(completed_bytes + bytes, total),
                current_key: key.clone(),
                file_percent: percent(bytes, declared),
            });
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.fetcher.fetch(url, entry.kind, &mut on_chunk) => {
                result.map_err(|source| DownloadError::Network {
                    key: entry.key.clone(),
                    source,
                })
            }
        }
    }

    async fn write_metadata(&self) -> Result<(), StoreError> {
        self.store
            .put(
                META_VERSION,
                &Payload::Text(self.manifest.version().to_string()),
            )
            .await?;
        self.store
            .put(
                META_DOWNLOAD_DATE,
                &Payload::Text(chrono::Utc::now().to_rfc3339()),
            )
            .await?;
        Ok(())
    }
}
