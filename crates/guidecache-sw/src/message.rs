//! Messages exchanged between the worker and sessions.
//!
//! The two ends share no memory, so every exchange is one of these tagged
//! unions. The JSON form uses a `type` field, matching what the page script
//! sends and expects.

use serde::{Deserialize, Serialize};

use guidecache_common::unix_millis;

/// Control message sent by a session to a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Promote a waiting generation now.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Ask for the generation's version label.
    #[serde(rename = "GET_VERSION")]
    GetVersion,
}

impl ClientCommand {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Reply sent on the reply channel of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerReply {
    #[serde(rename = "VERSION_INFO")]
    VersionInfo { version: String },
}

/// Version transition being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// A generation finished installing.
    NewVersionAvailable,
    /// A generation finished activating.
    UpdateReady,
}

/// Unsolicited message from the worker to sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "new-version-available")]
    NewVersionAvailable { version: String, timestamp: u64 },

    #[serde(rename = "update-ready")]
    UpdateReady { version: String, timestamp: u64 },

    /// The api partition was refreshed in the background.
    #[serde(rename = "CACHE_UPDATED")]
    CacheUpdated,
}

impl WorkerMessage {
    /// Announcement stamped with the current time.
    pub fn update(kind: UpdateKind, version: &str) -> Self {
        let version = version.to_string();
        let timestamp = unix_millis();
        match kind {
            UpdateKind::NewVersionAvailable => Self::NewVersionAvailable { version, timestamp },
            UpdateKind::UpdateReady => Self::UpdateReady { version, timestamp },
        }
    }

    pub fn kind(&self) -> Option<UpdateKind> {
        match self {
            Self::NewVersionAvailable { .. } => Some(UpdateKind::NewVersionAvailable),
            Self::UpdateReady { .. } => Some(UpdateKind::UpdateReady),
            Self::CacheUpdated => None,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            Self::NewVersionAvailable { version, .. } | Self::UpdateReady { version, .. } => {
                Some(version.as_str())
            }
            Self::CacheUpdated => None,
        }
    }
}
