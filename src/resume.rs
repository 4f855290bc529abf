use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::collab::{Processor, ResultBlob, SourceItem};
use crate::engine::{EngineInitError, EngineInitializer, EngineLoader};
use crate::readiness::ReadinessGate;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Error)]
pub enum ResumeError {
    #[error("a task is already deferred")]
    AlreadyDeferred,
    #[error(transparent)]
    Init(#[from] EngineInitError),
    #[error("processing failed: {0}")]
    Processing(String),
}

/// Lifecycle of one deferred task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPhase {
    NoTask,
    Pending,
    Admitted,
    Executing,
    Failed,
}

struct Inner {
    phase: TaskPhase,
    task: Option<SourceItem>,
    poll_cancel: Option<CancellationToken>,
}

struct Shared<L: EngineLoader> {
    gate: Arc<ReadinessGate>,
    init: Arc<EngineInitializer<L>>,
    processor: Arc<dyn Processor<L::Engine>>,
    inner: Mutex<Inner>,
    phase_tx: watch::Sender<TaskPhase>,
    last_result: std::sync::Mutex<Option<ResultBlob>>,
    last_error: std::sync::Mutex<Option<ResumeError>>,
}

/// Runs a deferred task exactly once, the moment the engine becomes ready.
///
/// While a task is `Pending` two triggers are armed: an explicit
/// "download just completed" notification (checked after a short settle delay
/// so cache writes land first) and a periodic readiness poll as a safety net
/// for readiness achieved by an unrelated flow. Whichever trigger first
/// observes readiness wins the admission; the mutex-guarded phase transition
/// is the latch that stops the other trigger from admitting the same task.
///
/// The coordinator is a cheap handle; clones share the same task state.
pub struct ResumeCoordinator<L: EngineLoader> {
    shared: Arc<Shared<L>>,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<L: EngineLoader> Clone for ResumeCoordinator<L> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            poll_interval: self.poll_interval,
            settle_delay: self.settle_delay,
        }
    }
}

impl<L: EngineLoader> ResumeCoordinator<L> {
    pub fn new(
        gate: Arc<ReadinessGate>,
        init: Arc<EngineInitializer<L>>,
        processor: Arc<dyn Processor<L::Engine>>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(TaskPhase::NoTask);
        Self {
            shared: Arc::new(Shared {
                gate,
                init,
                processor,
                inner: Mutex::new(Inner {
                    phase: TaskPhase::NoTask,
                    task: None,
                    poll_cancel: None,
                }),
                phase_tx,
                last_result: std::sync::Mutex::new(None),
                last_error: std::sync::Mutex::new(None),
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Overrides the trigger timings. Used by tests.
    pub fn with_timing(mut self, poll_interval: Duration, settle_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.settle_delay = settle_delay;
        self
    }

    pub fn phase(&self) -> TaskPhase {
        *self.shared.phase_tx.borrow()
    }

    /// Phase change stream for the owner (and tests).
    pub fn watch_phase(&self) -> watch::Receiver<TaskPhase> {
        self.shared.phase_tx.subscribe()
    }

    /// The result of the last successfully executed task, if any.
    pub fn take_result(&self) -> Option<ResultBlob> {
        self.shared.last_result.lock().unwrap().take()
    }

    /// The failure that moved the task to `Failed`, if any. Never retried
    /// automatically; the owner decides what to do next.
    pub fn last_error(&self) -> Option<ResumeError> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Parks `item` until the engine is ready, arming the periodic readiness
    /// poll. Only one task may be deferred at a time.
    pub async fn defer(&self, item: SourceItem) -> Result<(), ResumeError> {
        let cancel = CancellationToken::new();
        {
            let mut inner = self.shared.inner.lock().await;
            if !matches!(inner.phase, TaskPhase::NoTask | TaskPhase::Failed) {
                return Err(ResumeError::AlreadyDeferred);
            }
            inner.task = Some(item);
            inner.poll_cancel = Some(cancel.clone());
            self.set_phase(&mut inner, TaskPhase::Pending);
        }
        tracing::info!("task deferred until engine is ready");

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.poll_interval) => {
                        if this.try_admit().await {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Event trigger: a download finished somewhere. Waits the settle delay
    /// so the final cache writes land, then attempts admission.
    pub fn notify_download_complete(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.settle_delay).await;
            this.try_admit().await;
        });
    }

    /// Drops a still-pending task without executing it.
    pub async fn abandon(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.phase == TaskPhase::Pending {
            if let Some(cancel) = inner.poll_cancel.take() {
                cancel.cancel();
            }
            inner.task = None;
            self.set_phase(&mut inner, TaskPhase::NoTask);
        }
    }

    /// Admission attempt shared by both triggers. Returns true when this
    /// call won the admission and ran the task (to completion or failure).
    async fn try_admit(&self) -> bool {
        if self.phase() != TaskPhase::Pending {
            return false;
        }
        if !self.shared.gate.check_ready().await {
            return false;
        }

        // The latch: only one trigger can see Pending here.
        let item = {
            let mut inner = self.shared.inner.lock().await;
            if inner.phase != TaskPhase::Pending {
                return false;
            }
            if let Some(cancel) = inner.poll_cancel.take() {
                cancel.cancel();
            }
            self.set_phase(&mut inner, TaskPhase::Admitted);
            inner.task.take()
        };
        let Some(item) = item else {
            return false;
        };

        tracing::info!(item = %item.name, "engine ready, resuming deferred task");
        self.execute(item).await;
        true
    }

    async fn execute(&self, item: SourceItem) {
        {
            let mut inner = self.shared.inner.lock().await;
            self.set_phase(&mut inner, TaskPhase::Executing);
        }

        let outcome = match self.shared.init.get_instance().await {
            Ok(engine) => {
                let on_progress = Box::new(|pct: u8, status: &str| {
                    tracing::debug!(percent = pct, status = %status, "processing progress");
                });
                self.shared
                    .processor
                    .process(engine, item, on_progress)
                    .await
                    .map_err(|e| ResumeError::Processing(e.to_string()))
            }
            Err(e) => Err(ResumeError::Init(e)),
        };

        let mut inner = self.shared.inner.lock().await;
        match outcome {
            Ok(blob) => {
                *self.shared.last_result.lock().unwrap() = Some(blob);
                *self.shared.last_error.lock().unwrap() = None;
                self.set_phase(&mut inner, TaskPhase::NoTask);
            }
            Err(e) => {
                tracing::warn!(error = %e, "deferred task failed");
                *self.shared.last_error.lock().unwrap() = Some(e);
                self.set_phase(&mut inner, TaskPhase::Failed);
            }
        }
    }

    fn set_phase(&self, inner: &mut Inner, phase: TaskPhase) {
        inner.phase = phase;
        self.shared.phase_tx.send_replace(phase);
    }
}
