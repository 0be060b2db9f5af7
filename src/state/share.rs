//! The share workflow state

use serde::{Deserialize, Serialize};

/// Logical step of the share workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SharePhase {
    #[default]
    Idle,
    Login,
    Zip,
    Upload,
    Process,
}

impl SharePhase {
    /// Get a human-readable description of the current phase
    pub fn description(&self) -> &'static str {
        match self {
            SharePhase::Idle => "Ready",
            SharePhase::Login => "Waiting for login...",
            SharePhase::Zip => "Packaging build...",
            SharePhase::Upload => "Uploading build...",
            SharePhase::Process => "Processing on server...",
        }
    }
}

/// Everything needed to render or resume a share session.
///
/// Serialized as a flat JSON object for session snapshots; missing fields
/// fall back to their defaults so `{}` restores a fresh state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShareState {
    pub phase: SharePhase,
    pub title: String,
    pub build_output_dir: String,
    #[serde(rename = "buildGUID")]
    pub build_guid: String,
    pub zip_path: String,
    pub key: String,
    pub url: String,
    pub error_msg: String,
}

/// How the state should be presented, with errors taking precedence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Failed(String),
    Published(String),
    LoginRequired,
    Packaging,
    Uploading,
    Processing,
    Ready,
}

impl ShareState {
    /// Fresh state that keeps only the detected build
    pub fn reset(&self) -> Self {
        Self {
            build_output_dir: self.build_output_dir.clone(),
            build_guid: self.build_guid.clone(),
            ..Default::default()
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error_msg.is_empty()
    }

    pub fn is_published(&self) -> bool {
        !self.url.is_empty()
    }

    /// True once the attempt has ended in success or failure
    pub fn is_finished(&self) -> bool {
        self.has_error() || (self.is_published() && self.phase == SharePhase::Idle)
    }

    pub fn outcome(&self) -> ShareOutcome {
        if self.has_error() {
            return ShareOutcome::Failed(self.error_msg.clone());
        }
        if self.is_published() && self.phase == SharePhase::Idle {
            return ShareOutcome::Published(self.url.clone());
        }
        match self.phase {
            SharePhase::Login => ShareOutcome::LoginRequired,
            SharePhase::Zip => ShareOutcome::Packaging,
            SharePhase::Upload => ShareOutcome::Uploading,
            SharePhase::Process => ShareOutcome::Processing,
            SharePhase::Idle => ShareOutcome::Ready,
        }
    }

    /// Serialize for a session snapshot
    pub fn to_snapshot(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restore from a session snapshot
    pub fn from_snapshot(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
