pub mod collab;
pub mod context;
pub mod downloader;
pub mod engine;
pub mod fetch;
pub mod flow;
pub mod manifest;
pub mod payload;
pub mod readiness;
pub mod resume;
pub mod session;
pub mod store;
pub mod verifier;

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::collab::{Processor, ProcessingError, ResultBlob, SourceItem, SourceSelector};
    pub use crate::context::EngineContext;
    pub use crate::downloader::{
        DownloadError, DownloadManager, DownloadReport, FileOutcome, ProgressReport,
    };
    pub use crate::engine::{EngineInitError, EngineInitializer, EngineLoader};
    pub use crate::fetch::{Fetcher, HttpFetcher};
    pub use crate::flow::{DownloadFlow, FlowStatus};
    pub use crate::manifest::{Manifest, ManifestEntry, ENGINE_VERSION};
    pub use crate::payload::{Payload, PayloadKind};
    pub use crate::readiness::ReadinessGate;
    pub use crate::resume::{ResumeCoordinator, TaskPhase};
    pub use crate::session::{DownloadPhase, SessionFlags};
    pub use crate::store::BlobStore;
    pub use crate::verifier::{verify, KeyVerdict, VerificationReport};
}
