//! Command implementations behind the `capsule` binary.
//!
//! Each `run_*` function opens what it needs from the config, performs one
//! operation, and prints its result as pretty JSON on stdout. Diagnostics go
//! to stderr through `tracing`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;

use crate::cache::{self, CacheKind};
use crate::cluster::{derive_cluster_path, derive_filename, ClusterKey};
use crate::config::Config;
use crate::context::StorageContext;
use crate::index;
use crate::loader;
use crate::models::{Category, Language};
use crate::query::{self, SearchCriteria};
use crate::save;
use crate::snapshot;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accepts epoch milliseconds or a `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp_arg(raw: &str) -> Result<i64> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD or epoch ms", raw))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("invalid time of day")?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
}

pub async fn run_init(config: Config) -> Result<()> {
    let path = config.store.path.clone();
    StorageContext::from_config(config).await?;
    println!("Store initialized at {}", path.display());
    Ok(())
}

/// Save a record read from a JSON file (`-` for stdin). A missing id gets a
/// fresh UUID and a missing `created` gets the current time.
pub async fn run_save(config: Config, file: &Path) -> Result<()> {
    let raw = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    let mut record = save::parse_prediction(&raw)?;
    let ctx = StorageContext::from_config(config).await?;
    if record.id.is_empty() {
        record.id = uuid::Uuid::new_v4().to_string();
    }
    if record.created == 0 {
        record.created = ctx.now_ms();
    }

    let outcome = save::save_prediction(&ctx, record).await?;
    print_json(&outcome)
}

pub async fn run_get(config: Config, id: &str) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    match save::load_prediction(&ctx, id).await {
        Some(record) => print_json(&record),
        None => bail!("prediction not found: {}", id),
    }
}

pub async fn run_list(config: Config, limit: Option<usize>) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    let (mut records, source) = loader::load_all_predictions_with_source(&ctx).await;
    let total = records.len();
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    print_json(&json!({
        "source": source,
        "total": total,
        "predictions": records,
    }))
}

pub async fn run_search(config: Config, criteria: &SearchCriteria) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    let records = query::search(&ctx, criteria).await;
    print_json(&json!({
        "count": records.len(),
        "predictions": records,
    }))
}

pub async fn run_global_index(config: Config) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    match index::get_global_index(&ctx).await {
        Some(index) => print_json(&index),
        None => bail!("global index unavailable; see log for details"),
    }
}

pub async fn run_cluster_index(config: Config, language: Language, category: Category) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    match index::get_cluster_index(&ctx, language, category).await {
        Some(index) => print_json(&index),
        None => bail!("cluster index {}/{} unavailable", language, category),
    }
}

pub async fn run_rebuild_indices(config: Config) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    match index::rebuild_all(&ctx).await {
        Some(global) => print_json(&global),
        None => bail!("index rebuild failed; see log for details"),
    }
}

pub async fn run_hot_cache(config: Config) -> Result<()> {
    let ctx = StorageContext::from_config(config).await?;
    print_json(&cache::read_cache(&ctx, CacheKind::Hot).await)
}

/// Print the cluster directory (and file path, when id and created are
/// given) a record would be stored under. Needs no store.
pub fn run_path(
    config: &Config,
    language: Language,
    category: Category,
    reveal_date: i64,
    id: Option<&str>,
    created: Option<i64>,
) -> Result<()> {
    let cluster = derive_cluster_path(&config.store.root, language, category, reveal_date)?;
    let key = ClusterKey::new(language, category, reveal_date)?;
    let file = match (id, created) {
        (Some(id), Some(created)) => Some(format!("{}{}", cluster, derive_filename(id, created))),
        _ => None,
    };
    print_json(&json!({
        "cluster": cluster,
        "year": key.year,
        "quarter": key.quarter,
        "file": file,
    }))
}

/// Write the offline snapshot, from a directory of record files when given,
/// otherwise from the store's full load.
pub async fn run_snapshot(config: Config, out: &Path, from_dir: Option<&Path>) -> Result<()> {
    let (records, now) = match from_dir {
        Some(dir) => (snapshot::scan_directory(dir)?, Utc::now().timestamp_millis()),
        None => {
            let ctx = StorageContext::from_config(config).await?;
            (loader::load_all_predictions(&ctx).await, ctx.now_ms())
        }
    };

    let snap = snapshot::build_snapshot(&records, now);
    snapshot::write_snapshot(&snap, out)?;
    print_json(&json!({
        "path": out.display().to_string(),
        "count": snap.count,
        "hot": snap.hot.len(),
        "trending": snap.trending.len(),
        "recentRevealed": snap.recent_revealed.len(),
        "nearExpiry": snap.near_expiry.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_arg() {
        assert_eq!(parse_timestamp_arg("1771113600000").unwrap(), 1_771_113_600_000);
        assert_eq!(parse_timestamp_arg("2026-02-15").unwrap(), 1_771_113_600_000);
        assert!(parse_timestamp_arg("15/02/2026").is_err());
    }
}
