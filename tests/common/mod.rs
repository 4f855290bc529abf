#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

use engine_cache::collab::{
    ProcessProgress, Processor, ProcessingError, ResultBlob, SelectError, SourceItem,
    SourceSelector,
};
use engine_cache::engine::{EngineInitError, EngineLoader};
use engine_cache::fetch::{ChunkCallback, FetchError, Fetcher};
use engine_cache::manifest::{Manifest, ManifestEntry};
use engine_cache::payload::{Payload, PayloadKind};

/// Two required entries ("a" text, "b" binary, 100 bytes each) plus an
/// optional worker entry.
pub fn test_manifest() -> Manifest {
    Manifest::new(
        "test-1",
        vec![
            entry("a", PayloadKind::Text, false),
            entry("b", PayloadKind::Binary, false),
            entry("w", PayloadKind::Text, true),
        ],
    )
}

pub fn entry(key: &str, kind: PayloadKind, optional: bool) -> ManifestEntry {
    ManifestEntry {
        key: key.into(),
        url: primary_url(key),
        fallback_url: fallback_url(key),
        declared_size: 100,
        kind,
        optional,
    }
}

pub fn primary_url(key: &str) -> String {
    format!("http://cdn.test/{key}")
}

pub fn fallback_url(key: &str) -> String {
    format!("http://mirror.test/{key}")
}

pub fn text_payload(len: usize) -> Payload {
    Payload::Text("x".repeat(len))
}

pub fn binary_payload(len: usize) -> Payload {
    Payload::Binary(vec![7u8; len])
}

/// What the scripted fetcher does for one URL.
#[derive(Clone)]
pub enum ScriptedResponse {
    /// Deliver the payload in fixed-size chunks.
    Ok(Payload),
    /// Fail immediately.
    Fail,
    /// Report some progress, then fail.
    FailAfter(u64),
    /// Never complete; the transfer must be cancelled from outside.
    Hang,
}

/// In-memory stand-in for the network. Responses are scripted per URL;
/// unscripted URLs fail.
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, ScriptedResponse>>,
    pub requests: AtomicUsize,
    chunk_size: usize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
            chunk_size: 32,
        }
    }

    pub fn script(&self, url: impl Into<String>, response: ScriptedResponse) {
        self.responses.lock().unwrap().insert(url.into(), response);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        _kind: PayloadKind,
        on_chunk: ChunkCallback<'a>,
    ) -> BoxFuture<'a, Result<Payload, FetchError>> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let response = self.responses.lock().unwrap().get(url).cloned();
            match response {
                Some(ScriptedResponse::Ok(payload)) => {
                    let total = payload.len() as u64;
                    let mut sent = 0u64;
                    while sent < total {
                        sent = (sent + self.chunk_size as u64).min(total);
                        on_chunk(sent);
                        tokio::task::yield_now().await;
                    }
                    Ok(payload)
                }
                Some(ScriptedResponse::FailAfter(bytes)) => {
                    on_chunk(bytes);
                    tokio::task::yield_now().await;
                    Err(FetchError::Other(format!("connection reset on {url}")))
                }
                Some(ScriptedResponse::Hang) => {
                    on_chunk(1);
                    futures_util::future::pending::<()>().await;
                    unreachable!()
                }
                Some(ScriptedResponse::Fail) | None => {
                    Err(FetchError::Other(format!("unreachable: {url}")))
                }
            }
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StubEngine {
    pub id: usize,
}

/// Counts construction attempts; failure is switchable so tests can exercise
/// the shared-error path and the retry that follows it.
#[derive(Clone)]
pub struct StubLoader {
    pub attempts: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub delay: Duration,
}

impl StubLoader {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
            delay: Duration::from_millis(20),
        }
    }
}

impl EngineLoader for StubLoader {
    type Engine = StubEngine;

    fn load(&self) -> BoxFuture<'static, Result<StubEngine, EngineInitError>> {
        let attempts = self.attempts.clone();
        let fail = self.fail.clone();
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            let id = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if fail.load(Ordering::SeqCst) {
                Err(EngineInitError::LoadFailed("stub loader failure".into()))
            } else {
                Ok(StubEngine { id })
            }
        })
    }
}

/// Hands out a fixed item, or reports a cancelled picker dialog.
pub struct StubSelector {
    pub item: Option<SourceItem>,
}

impl StubSelector {
    pub fn with_item(item: SourceItem) -> Self {
        Self { item: Some(item) }
    }

    pub fn cancelled() -> Self {
        Self { item: None }
    }
}

impl SourceSelector for StubSelector {
    fn select(&self) -> BoxFuture<'_, Result<SourceItem, SelectError>> {
        Box::pin(async move {
            self.item.clone().ok_or(SelectError::Cancelled)
        })
    }
}

/// Records how many times it ran; optionally fails every run.
pub struct StubProcessor {
    pub executions: Arc<AtomicUsize>,
    pub fail: bool,
}

impl StubProcessor {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            executions: Arc::new(AtomicUsize::new(0)),
            fail: true,
        }
    }
}

impl Processor<StubEngine> for StubProcessor {
    fn process(
        &self,
        _engine: Arc<StubEngine>,
        item: SourceItem,
        mut on_progress: ProcessProgress,
    ) -> BoxFuture<'_, Result<ResultBlob, ProcessingError>> {
        Box::pin(async move {
            self.executions.fetch_add(1, Ordering::SeqCst);
            on_progress(50, "processing");
            if self.fail {
                return Err(ProcessingError("stub processor failure".into()));
            }
            on_progress(100, "done");
            Ok(ResultBlob {
                content_type: "audio/aac".into(),
                data: item.payload,
            })
        })
    }
}
