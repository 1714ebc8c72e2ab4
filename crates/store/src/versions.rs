//! Bounded history of prior document versions.
//!
//! Before a document is overwritten its previous bytes are stored as
//! `<backup_dir>/<stem>_<yyyyMMdd_HHmmss_SSS>[-<n>]<ext>`. Once the new
//! version is persisted, [`VersionStore::prune`] deletes the oldest snapshots
//! beyond `max_versions`.

use crate::storage::{ArtifactInfo, Result, Storage};
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const TIMESTAMP_PATTERN: &str = r"\d{8}_\d{6}_\d{3}";

/// A stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// Artifact name relative to the storage root.
    pub name: String,
    pub document: String,
    pub size: u64,
    #[serde(skip)]
    pub modified: SystemTime,
}

pub struct VersionStore {
    storage: Arc<dyn Storage>,
    backup_dir: String,
    max_versions: usize,
}

impl VersionStore {
    pub fn new(storage: Arc<dyn Storage>, backup_dir: &str, max_versions: usize) -> Self {
        Self {
            storage,
            backup_dir: backup_dir.trim_end_matches('/').to_string(),
            max_versions,
        }
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Store `prior` as the newest snapshot of `document`. Nothing is pruned.
    pub fn snapshot(&self, document: &str, prior: &[u8]) -> Result<SnapshotInfo> {
        let (stem, ext) = split_extension(document);
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();

        let mut name = format!("{}/{stem}_{timestamp}{ext}", self.backup_dir);
        let mut sequence = 1;
        while self.storage.exists(&name)? {
            name = format!("{}/{stem}_{timestamp}-{sequence}{ext}", self.backup_dir);
            sequence += 1;
        }

        self.storage.write(&name, prior)?;
        tracing::debug!(document, snapshot = %name, "snapshot stored");

        Ok(SnapshotInfo {
            name,
            document: document.to_string(),
            size: prior.len() as u64,
            modified: SystemTime::now(),
        })
    }

    /// Snapshots of `document`, oldest first.
    pub fn list(&self, document: &str) -> Result<Vec<SnapshotInfo>> {
        let matcher = snapshot_matcher(document);
        let mut found: Vec<(ArtifactInfo, String, u64)> = self
            .storage
            .list(&self.backup_dir)?
            .into_iter()
            .filter_map(|artifact| {
                let file_name = artifact.name.rsplit('/').next()?.to_string();
                let caps = matcher.captures(&file_name)?;
                let timestamp = caps.get(1)?.as_str().to_string();
                let sequence = caps
                    .get(2)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
                Some((artifact, timestamp, sequence))
            })
            .collect();

        found.sort_by(|(a, a_ts, a_seq), (b, b_ts, b_seq)| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a_ts.cmp(b_ts))
                .then_with(|| a_seq.cmp(b_seq))
        });

        Ok(found
            .into_iter()
            .map(|(artifact, _, _)| SnapshotInfo {
                name: artifact.name,
                document: document.to_string(),
                size: artifact.size,
                modified: artifact.modified,
            })
            .collect())
    }

    /// Remove a snapshot, e.g. one recorded for a write that then failed.
    pub fn discard(&self, snapshot: &SnapshotInfo) -> Result<bool> {
        self.storage.delete(&snapshot.name)
    }

    /// Delete the oldest snapshots of `document` beyond `max_versions`.
    pub fn prune(&self, document: &str) -> Result<()> {
        let snapshots = self.list(document)?;
        let excess = snapshots.len().saturating_sub(self.max_versions);
        for old in snapshots.iter().take(excess) {
            if self.storage.delete(&old.name)? {
                tracing::debug!(document, snapshot = %old.name, "old snapshot removed");
            }
        }
        Ok(())
    }
}

/// `report.xlsx` splits into `("report", ".xlsx")`.
fn split_extension(document: &str) -> (&str, &str) {
    match document.rfind('.') {
        Some(dot) if dot > 0 => document.split_at(dot),
        _ => (document, ""),
    }
}

fn snapshot_matcher(document: &str) -> Regex {
    let (stem, ext) = split_extension(document);
    let pattern = format!(
        r"^{}_({TIMESTAMP_PATTERN})(?:-(\d+))?{}$",
        regex::escape(stem),
        regex::escape(ext)
    );
    // Escaped input always forms a valid pattern.
    Regex::new(&pattern).unwrap_or_else(|_| unreachable!("invalid snapshot pattern {pattern}"))
}
