use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use futures_util::future::BoxFuture;

use engine_cache::engine::load_cached_assets;
use engine_cache::prelude::*;

/// Demo engine: counts the assets it was constructed from.
struct DemoEngine {
    assets: usize,
    total_bytes: usize,
}

#[derive(Clone)]
struct DemoLoader {
    manifest: Manifest,
    store: Arc<BlobStore>,
    fetcher: HttpFetcher,
}

impl EngineLoader for DemoLoader {
    type Engine = DemoEngine;

    fn load(&self) -> BoxFuture<'static, Result<DemoEngine, EngineInitError>> {
        let loader = self.clone();
        Box::pin(async move {
            let assets =
                load_cached_assets(&loader.manifest, &loader.store, &loader.fetcher).await?;
            let total_bytes = assets.values().map(|p| p.len()).sum();
            Ok(DemoEngine {
                assets: assets.len(),
                total_bytes,
            })
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let manifest = Manifest::bundled(ENGINE_VERSION);
    let db_path = PathBuf::from("engine-cache.db");

    let store = Arc::new(BlobStore::open(&db_path).await?);
    let fetcher = HttpFetcher::new();
    let loader = DemoLoader {
        manifest: manifest.clone(),
        store: store.clone(),
        fetcher: fetcher.clone(),
    };
    let ctx = EngineContext::new(manifest, store, fetcher, loader);
    let flow = DownloadFlow::new(ctx.downloader(), ctx.store(), ctx.initializer());

    if flow.check_if_downloaded().await {
        println!("Bundle already cached and verified.");
    } else {
        println!("Downloading engine bundle...");
        let mut progress = flow.watch_progress();
        let printer = tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let p = progress.borrow().clone();
                println!(
                    "[{:3}%] {} ({}%)",
                    p.aggregate_percent, p.current_key, p.file_percent
                );
            }
        });

        let report = flow.start_download().await;
        printer.abort();
        if !report.success {
            bail!("download failed: {:?}", report.error);
        }
        println!("Download complete: {} files settled.", report.files.len());
    }

    println!("Engine ready: {}", ctx.gate().check_ready().await);

    let verification = engine_cache::verifier::verify(ctx.manifest(), &ctx.store()).await?;
    println!("Verification: {}", serde_json::to_string_pretty(&verification)?);

    let engine = ctx.initializer().get_instance().await?;
    println!(
        "Engine constructed from {} assets ({} bytes).",
        engine.assets, engine.total_bytes
    );

    Ok(())
}
