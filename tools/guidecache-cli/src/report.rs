//! JSON reports of worker runs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use guidecache_sw::{AssetOutcome, InstallOutcome, ServiceWorkerState};

/// Summary of an install against a live origin.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstallSummary {
    pub version: String,
    pub state: ServiceWorkerState,
    pub cached: usize,
    pub failed: Vec<AssetOutcome>,
    pub critical_missing: Vec<String>,
    /// Partition name to cached keys.
    pub partitions: BTreeMap<String, Vec<String>>,
}

impl InstallSummary {
    pub fn new(outcome: &InstallOutcome, partitions: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            version: outcome.version.clone(),
            state: outcome.state,
            cached: outcome.report.cached_count(),
            failed: outcome.report.failed().into_iter().cloned().collect(),
            critical_missing: outcome.report.critical_missing.clone(),
            partitions,
        }
    }

    /// Every critical asset made it into the cache.
    pub fn is_complete(&self) -> bool {
        self.critical_missing.is_empty()
    }

    pub fn print(&self) {
        println!("Install result:");
        println!("  Version:          {}", self.version);
        println!("  State:            {:?}", self.state);
        println!("  Cached:           {}", self.cached);
        println!("  Failed:           {}", self.failed.len());
        for outcome in &self.failed {
            println!("    {} ({:?})", outcome.key, outcome.status);
        }
        println!("  Critical missing: {}", self.critical_missing.len());
        for key in &self.critical_missing {
            println!("    {key}");
        }
        for (name, keys) in &self.partitions {
            println!("  {name}: {} entries", keys.len());
        }
    }
}

/// Write a report as pretty JSON.
pub fn write_report<T: Serialize>(report: &T, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidecache_sw::AssetStatus;

    fn summary() -> InstallSummary {
        InstallSummary {
            version: "informatiktag-v1.0.1".to_string(),
            state: ServiceWorkerState::Activated,
            cached: 26,
            failed: vec![AssetOutcome {
                key: "https://guide.example/data/legend.json".to_string(),
                status: AssetStatus::Rejected(404),
            }],
            critical_missing: Vec::new(),
            partitions: BTreeMap::from([(
                "informatiktag-api-v1".to_string(),
                vec!["https://guide.example/data/events.json".to_string()],
            )]),
        }
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("install.json");

        write_report(&summary(), &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], "informatiktag-v1.0.1");
        assert_eq!(json["state"], "activated");
        assert_eq!(json["failed"][0]["status"], "rejected");
        assert_eq!(json["failed"][0]["detail"], 404);
    }

    #[test]
    fn test_is_complete() {
        let mut summary = summary();
        assert!(summary.is_complete());
        summary
            .critical_missing
            .push("https://guide.example/assets/floorplan.png".to_string());
        assert!(!summary.is_complete());
    }
}
