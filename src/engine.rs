use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::fetch::Fetcher;
use crate::manifest::Manifest;
use crate::payload::Payload;
use crate::store::BlobStore;

/// Construction failures are delivered identically to every concurrent
/// waiter, so the error carries owned strings and stays `Clone`.
#[derive(Debug, Clone, Error)]
pub enum EngineInitError {
    #[error("engine assets unavailable: {0}")]
    AssetsUnavailable(String),
    #[error("engine load failed: {0}")]
    LoadFailed(String),
}

/// Constructs the heavyweight engine instance. The loader is responsible for
/// sourcing its own assets (from the blob cache, or the network if the cache
/// is cold — the engine entry point can self-fetch).
pub trait EngineLoader: Send + Sync + 'static {
    type Engine: Send + Sync + 'static;

    fn load(&self) -> BoxFuture<'static, Result<Self::Engine, EngineInitError>>;
}

type SharedLoad<E> = Shared<BoxFuture<'static, Result<Arc<E>, EngineInitError>>>;

enum Slot<E> {
    Empty,
    InFlight(SharedLoad<E>),
    Ready(Arc<E>),
}

struct InitState<E> {
    /// Bumped on every new construction and on reset, so a stale completion
    /// can never clobber a newer state.
    epoch: u64,
    slot: Slot<E>,
}

/// Single-flight memoized factory for the engine instance.
///
/// At most one construction is in flight per process; every caller arriving
/// during construction awaits the same shared future and observes the same
/// result, success or failure. A failure clears the slot so a later call can
/// retry from scratch.
pub struct EngineInitializer<L: EngineLoader> {
    loader: L,
    state: Mutex<InitState<L::Engine>>,
}

impl<L: EngineLoader> EngineInitializer<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            state: Mutex::new(InitState {
                epoch: 0,
                slot: Slot::Empty,
            }),
        }
    }

    pub async fn get_instance(&self) -> Result<Arc<L::Engine>, EngineInitError> {
        let (shared, epoch) = {
            let mut state = self.state.lock().await;
            match &state.slot {
                Slot::Ready(engine) => return Ok(engine.clone()),
                Slot::InFlight(shared) => (shared.clone(), state.epoch),
                Slot::Empty => {
                    let load = self.loader.load();
                    let shared = async move { load.await.map(Arc::new) }.boxed().shared();
                    state.epoch += 1;
                    state.slot = Slot::InFlight(shared.clone());
                    tracing::info!("starting engine construction");
                    (shared, state.epoch)
                }
            }
        };

        let result = shared.await;

        let mut state = self.state.lock().await;
        if state.epoch == epoch {
            match &result {
                Ok(engine) => state.slot = Slot::Ready(engine.clone()),
                Err(e) => {
                    tracing::warn!(error = %e, "engine construction failed");
                    state.slot = Slot::Empty;
                }
            }
        }
        result
    }

    pub async fn is_initialized(&self) -> bool {
        matches!(self.state.lock().await.slot, Slot::Ready(_))
    }

    /// Drops the live instance (or disowns an in-flight construction).
    /// The next `get_instance` builds a fresh engine.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.epoch += 1;
        state.slot = Slot::Empty;
    }
}

/// Gathers the payloads an engine loader needs: every required manifest entry
/// from the cache, falling back to a direct fetch of that entry when it is
/// not cached.
pub async fn load_cached_assets<F: Fetcher>(
    manifest: &Manifest,
    store: &BlobStore,
    fetcher: &F,
) -> Result<HashMap<String, Payload>, EngineInitError> {
    let mut assets = HashMap::new();
    for entry in manifest.required() {
        let cached = store
            .get(&entry.key)
            .await
            .map_err(|e| EngineInitError::AssetsUnavailable(e.to_string()))?;
        let payload = match cached {
            Some(payload) => payload,
            None => {
                tracing::info!(key = %entry.key, "asset not cached, fetching directly");
                let mut ignore_progress = |_: u64| {};
                match fetcher.fetch(&entry.url, entry.kind, &mut ignore_progress).await {
                    Ok(payload) => payload,
                    Err(_) => fetcher
                        .fetch(&entry.fallback_url, entry.kind, &mut ignore_progress)
                        .await
                        .map_err(|e| EngineInitError::AssetsUnavailable(e.to_string()))?,
                }
            }
        };
        assets.insert(entry.key.clone(), payload);
    }
    Ok(assets)
}
