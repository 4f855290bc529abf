use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;
use crate::payload::PayloadKind;
use crate::store::{BlobStore, StoreError};

/// Per-key verification verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyVerdict {
    Valid,
    /// Optional entry, excluded from verification.
    Skipped,
    Missing,
    KindMismatch {
        expected: PayloadKind,
        actual: PayloadKind,
    },
}

impl KeyVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, KeyVerdict::Valid | KeyVerdict::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub all_valid: bool,
    pub per_key: HashMap<String, KeyVerdict>,
}

/// Checks that every required manifest entry is cached with the kind it was
/// declared with. Payloads are tagged at write time, so this is a tag
/// comparison, not a byte inspection.
pub async fn verify(manifest: &Manifest, store: &BlobStore) -> Result<VerificationReport, StoreError> {
    let mut per_key = HashMap::new();

    for entry in manifest.entries() {
        if entry.optional {
            per_key.insert(entry.key.clone(), KeyVerdict::Skipped);
            continue;
        }
        let verdict = match store.get(&entry.key).await? {
            None => KeyVerdict::Missing,
            Some(payload) if payload.kind() != entry.kind => KeyVerdict::KindMismatch {
                expected: entry.kind,
                actual: payload.kind(),
            },
            Some(_) => KeyVerdict::Valid,
        };
        per_key.insert(entry.key.clone(), verdict);
    }

    let all_valid = per_key.values().all(KeyVerdict::is_valid);
    Ok(VerificationReport { all_valid, per_key })
}
