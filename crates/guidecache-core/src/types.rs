//! Generation and partition naming

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation tag used instead of a version while developing locally.
pub const DEV_MARKER: &str = "dev";

/// The two logical partitions every generation owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    /// Immutable assets: markup, scripts, styles, fonts, images.
    Static,
    /// Mutable JSON documents.
    Api,
}

impl PartitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Api => "api",
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Naming for one versioned population of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Application name, the prefix of every partition.
    pub app_name: String,
    /// Partition tag, e.g. `v1` or `dev`.
    pub tag: String,
    /// Version label reported to sessions, e.g. `informatiktag-v1.0.1`.
    pub label: String,
}

impl Generation {
    /// Release generation.
    pub fn release(app_name: &str, tag: &str, version: &str) -> Self {
        let version = version.trim_start_matches('v');
        Self {
            app_name: app_name.to_string(),
            tag: tag.to_string(),
            label: format!("{app_name}-v{version}"),
        }
    }

    /// Development generation, shared by every local build.
    pub fn development(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            tag: DEV_MARKER.to_string(),
            label: format!("{app_name}-{DEV_MARKER}"),
        }
    }

    /// `<app>-<kind>-<tag>`
    pub fn partition_name(&self, kind: PartitionKind) -> String {
        format!("{}-{}-{}", self.app_name, kind, self.tag)
    }

    pub fn static_partition(&self) -> String {
        self.partition_name(PartitionKind::Static)
    }

    pub fn api_partition(&self) -> String {
        self.partition_name(PartitionKind::Api)
    }

    /// Whether `name` is one of this generation's two partitions.
    pub fn owns_partition(&self, name: &str) -> bool {
        name == self.static_partition() || name == self.api_partition()
    }

    pub fn is_development(&self) -> bool {
        self.tag == DEV_MARKER
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
