use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::manifest::Manifest;
use crate::session::{DownloadPhase, SessionFlags};
use crate::store::BlobStore;
use crate::verifier;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// The single predicate "is the engine usable right now".
///
/// Consults the session flag first so a check issued while another flow's
/// download is mid-flight waits for that download instead of concluding "not
/// ready" and triggering a duplicate.
pub struct ReadinessGate {
    manifest: Manifest,
    store: Arc<BlobStore>,
    session: Arc<SessionFlags>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl ReadinessGate {
    pub fn new(manifest: Manifest, store: Arc<BlobStore>, session: Arc<SessionFlags>) -> Self {
        Self {
            manifest,
            store,
            session,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Overrides the in-flight wait timings. Used by tests.
    pub fn with_wait(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    /// Returns true when every required bundle file is cached and verified.
    /// Storage errors read as "not ready" rather than propagating; readiness
    /// is a best-effort predicate.
    pub async fn check_ready(&self) -> bool {
        self.wait_for_inflight_download().await;

        for entry in self.manifest.required() {
            match self.store.exists(&entry.key).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(key = %entry.key, "bundle file not cached");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "readiness existence check failed");
                    return false;
                }
            }
        }

        match verifier::verify(&self.manifest, &self.store).await {
            Ok(report) => report.all_valid,
            Err(e) => {
                tracing::warn!(error = %e, "readiness verification failed");
                false
            }
        }
    }

    /// Polls the session flag until it leaves `Downloading` or `max_wait`
    /// elapses. On timeout the check proceeds anyway; a stuck flag must never
    /// wedge readiness permanently.
    async fn wait_for_inflight_download(&self) {
        if self.session.download_phase() != DownloadPhase::Downloading {
            return;
        }
        tracing::info!("download in progress elsewhere, waiting before readiness check");

        let deadline = Instant::now() + self.max_wait;
        while self.session.download_phase() == DownloadPhase::Downloading {
            if Instant::now() >= deadline {
                tracing::warn!("gave up waiting for in-flight download, checking anyway");
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
