use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

/// A user-chosen source item awaiting processing. Opaque to the core.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Output of the processing collaborator.
#[derive(Debug, Clone)]
pub struct ResultBlob {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("selection cancelled")]
    Cancelled,
    #[error("selection failed: {0}")]
    Failed(String),
}

/// Collaborator-reported processing failure, opaque to this subsystem.
#[derive(Debug, Clone, Error)]
#[error("processing failed: {0}")]
pub struct ProcessingError(pub String);

/// "Select a source item" interaction, e.g. a file picker.
pub trait SourceSelector: Send + Sync {
    fn select(&self) -> BoxFuture<'_, Result<SourceItem, SelectError>>;
}

/// Progress sink for a processing run: percentage plus a status line.
pub type ProcessProgress = Box<dyn FnMut(u8, &str) + Send>;

/// "Process item with engine E" collaborator.
pub trait Processor<E>: Send + Sync {
    fn process(
        &self,
        engine: Arc<E>,
        item: SourceItem,
        on_progress: ProcessProgress,
    ) -> BoxFuture<'_, Result<ResultBlob, ProcessingError>>;
}
