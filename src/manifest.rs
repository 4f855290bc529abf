use serde::{Deserialize, Serialize};

use crate::payload::PayloadKind;

/// Default engine bundle version the built-in manifest points at.
pub const ENGINE_VERSION: &str = "0.12.6";

/// Metadata row written once a full download completes.
pub const META_VERSION: &str = "engine-version";
/// Metadata row recording when the bundle was downloaded.
pub const META_DOWNLOAD_DATE: &str = "engine-download-date";

/// Session flag key carrying the download phase.
pub const DOWNLOAD_STATUS_KEY: &str = "download-status";

/// One file of the engine bundle: where to get it, how big it claims to be,
/// and what shape the payload must have once cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    pub url: String,
    pub fallback_url: String,
    pub declared_size: u64,
    pub kind: PayloadKind,
    /// Optional entries (e.g. a worker script absent from single-threaded
    /// engine builds) are skipped by the downloader and the readiness check.
    pub optional: bool,
}

/// Static declaration of the files making up the engine bundle. Immutable,
/// built once at process start.
#[derive(Debug, Clone)]
pub struct Manifest {
    version: String,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(version: impl Into<String>, entries: Vec<ManifestEntry>) -> Self {
        Self {
            version: version.into(),
            entries,
        }
    }

    /// Bundle version, recorded in the store once a download completes.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The default engine bundle: core script, core wasm and an optional
    /// worker script, served from a primary CDN with a mirror fallback.
    pub fn bundled(version: &str) -> Self {
        let primary = format!("https://unpkg.com/@engine/core@{version}/dist/umd");
        let mirror = format!("https://cdn.jsdelivr.net/npm/@engine/core@{version}/dist/umd");
        let entry = |key: &str, size: u64, kind: PayloadKind, optional: bool| ManifestEntry {
            key: key.to_string(),
            url: format!("{primary}/{key}"),
            fallback_url: format!("{mirror}/{key}"),
            declared_size: size,
            kind,
            optional,
        };
        Self::new(version, vec![
            entry("engine-core.js", 500 * 1024, PayloadKind::Text, false),
            entry("engine-core.wasm", 8 * 1024 * 1024, PayloadKind::Binary, false),
            entry("engine-core.worker.js", 50 * 1024, PayloadKind::Text, true),
        ])
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Entries that must be cached and valid for the engine to be usable.
    pub fn required(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| !e.optional)
    }

    pub fn entry(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Total declared size of the required entries. Optional entries are
    /// excluded so a fully acquired bundle always reports 100%.
    pub fn total_declared_size(&self) -> u64 {
        self.required().map(|e| e.declared_size).sum()
    }
}
