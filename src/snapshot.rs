//! Offline hot snapshot (`hot.json`).
//!
//! A point-in-time digest of the whole record set, grouped into a few
//! fixed-size buckets. It is produced by the `capsule snapshot` command for
//! static hosting; the load pipeline never reads it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::Prediction;

pub const SNAPSHOT_VERSION: &str = "1.0";

const HOT_LIMIT: usize = 50;
const BUCKET_LIMIT: usize = 20;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const NEAR_EXPIRY_MS: i64 = 7 * DAY_MS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    pub generated: i64,
    pub version: String,
    pub count: usize,
    /// Most viewed first.
    pub hot: Vec<Prediction>,
    /// Created in the last 24 hours, in view order.
    pub trending: Vec<Prediction>,
    pub recent_revealed: Vec<Prediction>,
    /// Unrevealed, revealing within the next 7 days, soonest first.
    pub near_expiry: Vec<Prediction>,
}

pub fn build_snapshot(records: &[Prediction], now_ms: i64) -> SnapshotFile {
    let mut by_views: Vec<&Prediction> = records.iter().collect();
    by_views.sort_by(|a, b| b.metadata.views.cmp(&a.metadata.views));

    let hot = take_cloned(by_views.iter().copied(), HOT_LIMIT);

    let trending = take_cloned(
        by_views.iter().copied().filter(|p| now_ms.saturating_sub(p.created) < DAY_MS),
        BUCKET_LIMIT,
    );

    let mut revealed: Vec<&Prediction> = by_views.iter().copied().filter(|p| p.revealed).collect();
    revealed.sort_by(|a, b| {
        b.revealed_at
            .unwrap_or(0)
            .cmp(&a.revealed_at.unwrap_or(0))
    });
    let recent_revealed = take_cloned(revealed.into_iter(), BUCKET_LIMIT);

    let mut expiring: Vec<&Prediction> = by_views
        .iter()
        .copied()
        .filter(|p| !p.revealed && p.reveal_date > now_ms && p.reveal_date.saturating_sub(now_ms) < NEAR_EXPIRY_MS)
        .collect();
    expiring.sort_by_key(|p| p.reveal_date);
    let near_expiry = take_cloned(expiring.into_iter(), BUCKET_LIMIT);

    SnapshotFile {
        generated: now_ms,
        version: SNAPSHOT_VERSION.to_string(),
        count: records.len(),
        hot,
        trending,
        recent_revealed,
        near_expiry,
    }
}

fn take_cloned<'a>(iter: impl Iterator<Item = &'a Prediction>, limit: usize) -> Vec<Prediction> {
    iter.take(limit).cloned().collect()
}

/// Read every `*.json` record under `dir`. Files that cannot be read or
/// decoded are logged and skipped.
pub fn scan_directory(dir: &Path) -> Result<Vec<Prediction>> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        match serde_json::from_str::<Prediction>(&raw) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
        }
    }

    info!(count = records.len(), dir = %dir.display(), "scanned record directory");
    Ok(records)
}

pub fn write_snapshot(snapshot: &SnapshotFile, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
    info!(
        path = %out.display(),
        hot = snapshot.hot.len(),
        trending = snapshot.trending.len(),
        recent_revealed = snapshot.recent_revealed.len(),
        near_expiry = snapshot.near_expiry.len(),
        "snapshot written"
    );
    Ok(())
}
