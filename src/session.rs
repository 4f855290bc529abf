use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::manifest::DOWNLOAD_STATUS_KEY;

/// Phase of the one logical download session. At most one session is
/// `Downloading` at a time; other components consult this before starting a
/// duplicate download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadPhase {
    Idle,
    Downloading,
    Completed,
}

impl DownloadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadPhase::Idle => "idle",
            DownloadPhase::Downloading => "downloading",
            DownloadPhase::Completed => "completed",
        }
    }

    /// Absent or unrecognized values read as `Idle`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "downloading" => DownloadPhase::Downloading,
            "completed" => DownloadPhase::Completed,
            _ => DownloadPhase::Idle,
        }
    }
}

/// Ephemeral per-process string store used purely as a signal channel between
/// independent flows. Nothing here survives the process; last write wins.
#[derive(Debug, Default)]
pub struct SessionFlags {
    values: Mutex<HashMap<String, String>>,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.lock().unwrap().remove(key);
    }

    pub fn download_phase(&self) -> DownloadPhase {
        self.get(DOWNLOAD_STATUS_KEY)
            .map(|v| DownloadPhase::from_str(&v))
            .unwrap_or(DownloadPhase::Idle)
    }

    pub fn set_download_phase(&self, phase: DownloadPhase) {
        self.set(DOWNLOAD_STATUS_KEY, phase.as_str());
    }
}
