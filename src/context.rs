use std::path::Path;
use std::sync::Arc;

use crate::downloader::DownloadManager;
use crate::engine::{EngineInitializer, EngineLoader};
use crate::fetch::Fetcher;
use crate::manifest::Manifest;
use crate::readiness::ReadinessGate;
use crate::session::{DownloadPhase, SessionFlags};
use crate::store::{BlobStore, StoreError};

/// Process-scoped wiring for the acquisition subsystem.
///
/// The blob store, session flags, readiness gate and engine initializer are
/// the only state shared between independent call sites. They are built once
/// here and handed out as `Arc` handles, never reached for as ambient
/// globals. Lifecycle: initialized on first use, torn down via [`reset`].
///
/// [`reset`]: EngineContext::reset
pub struct EngineContext<F: Fetcher, L: EngineLoader> {
    manifest: Manifest,
    store: Arc<BlobStore>,
    session: Arc<SessionFlags>,
    fetcher: Arc<F>,
    gate: Arc<ReadinessGate>,
    init: Arc<EngineInitializer<L>>,
    downloader: Arc<DownloadManager<Arc<F>>>,
}

impl<F: Fetcher, L: EngineLoader> EngineContext<F, L> {
    pub async fn open(
        db_path: &Path,
        manifest: Manifest,
        fetcher: F,
        loader: L,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(BlobStore::open(db_path).await?);
        Ok(Self::new(manifest, store, fetcher, loader))
    }

    /// Context over an in-memory store. Used by tests.
    pub async fn open_in_memory(
        manifest: Manifest,
        fetcher: F,
        loader: L,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(BlobStore::open_in_memory().await?);
        Ok(Self::new(manifest, store, fetcher, loader))
    }

    /// Wires a context around an already opened store. Lets the loader share
    /// the same store handle.
    pub fn new(manifest: Manifest, store: Arc<BlobStore>, fetcher: F, loader: L) -> Self {
        let session = Arc::new(SessionFlags::new());
        let fetcher = Arc::new(fetcher);
        let gate = Arc::new(ReadinessGate::new(
            manifest.clone(),
            store.clone(),
            session.clone(),
        ));
        let init = Arc::new(EngineInitializer::new(loader));
        let downloader = Arc::new(DownloadManager::new(
            manifest.clone(),
            store.clone(),
            session.clone(),
            fetcher.clone(),
        ));
        Self {
            manifest,
            store,
            session,
            fetcher,
            gate,
            init,
            downloader,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn store(&self) -> Arc<BlobStore> {
        self.store.clone()
    }

    pub fn session(&self) -> Arc<SessionFlags> {
        self.session.clone()
    }

    pub fn fetcher(&self) -> Arc<F> {
        self.fetcher.clone()
    }

    pub fn gate(&self) -> Arc<ReadinessGate> {
        self.gate.clone()
    }

    pub fn initializer(&self) -> Arc<EngineInitializer<L>> {
        self.init.clone()
    }

    pub fn downloader(&self) -> Arc<DownloadManager<Arc<F>>> {
        self.downloader.clone()
    }

    /// Explicit teardown: drops the engine instance and resets the session
    /// flag. Cached assets stay on disk.
    pub async fn reset(&self) {
        self.init.reset().await;
        self.session.set_download_phase(DownloadPhase::Idle);
    }
}
