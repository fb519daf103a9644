//! Derived aggregate indices.
//!
//! Two tiers are kept in the local store:
//!
//! | Key | Type | Scope |
//! |-----|------|-------|
//! | `index_<language>_<category>` | [`ClusterIndex`] | one (language, category) cluster, all years |
//! | `index_global` | [`GlobalIndex`] | every record |
//!
//! The consistency model is recompute: a rebuild derives the index from the
//! full record set of its scope and overwrites the stored value. Rebuilds of
//! the same key are serialized through a per-key lock and stamp a revision
//! one above the stored one.
//!
//! [`apply_write`] is the incremental alternative used when
//! `index.mode = "incremental"`: it patches the stored counters with the
//! difference between a record's previous and current version and falls
//! back to a rebuild whenever it cannot (missing index, record moved
//! between clusters).

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::blob::record_path;
use crate::cluster::{quarter_of, Quarter};
use crate::context::StorageContext;
use crate::error::StoreError;
use crate::loader;
use crate::local::{cluster_index_key, GLOBAL_INDEX_KEY};
use crate::models::{Category, Language, Prediction};
use crate::query;

pub const GLOBAL_INDEX_VERSION: &str = "1.0.0";
/// Storage ceiling the usage percentage is measured against (100 MiB).
pub const CAPACITY_BYTES: u64 = 100 * 1024 * 1024;
const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterCounts {
    #[serde(rename = "Q1")]
    pub q1: u64,
    #[serde(rename = "Q2")]
    pub q2: u64,
    #[serde(rename = "Q3")]
    pub q3: u64,
    #[serde(rename = "Q4")]
    pub q4: u64,
}

impl QuarterCounts {
    fn slot(&mut self, quarter: Quarter) -> &mut u64 {
        match quarter {
            Quarter::Q1 => &mut self.q1,
            Quarter::Q2 => &mut self.q2,
            Quarter::Q3 => &mut self.q3,
            Quarter::Q4 => &mut self.q4,
        }
    }

    pub fn get(&self, quarter: Quarter) -> u64 {
        match quarter {
            Quarter::Q1 => self.q1,
            Quarter::Q2 => self.q2,
            Quarter::Q3 => self.q3,
            Quarter::Q4 => self.q4,
        }
    }

    pub fn total(&self) -> u64 {
        self.q1 + self.q2 + self.q3 + self.q4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub created: i64,
    pub reveal_date: i64,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIndex {
    pub language: Language,
    pub category: Category,
    pub total_predictions: u64,
    pub last_updated: i64,
    #[serde(default)]
    pub revision: u64,
    pub by_year: BTreeMap<i32, QuarterCounts>,
    pub recent_predictions: Vec<RecentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub total_size_bytes: u64,
    /// Human-readable, e.g. `"12.34KB"`.
    pub total_size: String,
    pub max_size: String,
    pub usage_percent: u64,
}

impl StorageUsage {
    pub fn from_bytes(total: u64) -> Self {
        Self {
            total_size_bytes: total,
            total_size: format!("{:.2}KB", total as f64 / 1024.0),
            max_size: "100MB".to_string(),
            usage_percent: usage_percent(total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalIndex {
    pub version: String,
    pub last_updated: i64,
    #[serde(default)]
    pub revision: u64,
    pub total_predictions: u64,
    pub by_language: BTreeMap<Language, u64>,
    pub by_category: BTreeMap<Category, u64>,
    pub by_year: BTreeMap<i32, u64>,
    pub metadata: StorageUsage,
}

/// round(100 x total / 100 MiB).
pub fn usage_percent(total_bytes: u64) -> u64 {
    (100.0 * total_bytes as f64 / CAPACITY_BYTES as f64).round() as u64
}

fn recent_entry(ctx: &StorageContext, p: &Prediction) -> RecentEntry {
    RecentEntry {
        id: p.id.clone(),
        title: p.title.clone(),
        author: p.author.clone(),
        created: p.created,
        reveal_date: p.reveal_date,
        path: record_path(ctx, p).unwrap_or_default(),
    }
}

pub fn build_cluster_index(
    ctx: &StorageContext,
    language: Language,
    category: Category,
    records: &[Prediction],
    revision: u64,
) -> ClusterIndex {
    let mut by_year: BTreeMap<i32, QuarterCounts> = BTreeMap::new();
    for p in records {
        match quarter_of(p.reveal_date) {
            Ok((year, quarter)) => *by_year.entry(year).or_default().slot(quarter) += 1,
            Err(e) => warn!(id = %p.id, error = %e, "record not counted by quarter"),
        }
    }

    let mut newest: Vec<&Prediction> = records.iter().collect();
    newest.sort_by_key(|p| Reverse(p.created));
    let recent_predictions = newest
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|p| recent_entry(ctx, p))
        .collect();

    ClusterIndex {
        language,
        category,
        total_predictions: records.len() as u64,
        last_updated: ctx.now_ms(),
        revision,
        by_year,
        recent_predictions,
    }
}

pub fn build_global_index(now_ms: i64, records: &[Prediction], revision: u64) -> GlobalIndex {
    let mut by_language: BTreeMap<Language, u64> = Language::ALL.iter().map(|l| (*l, 0)).collect();
    let mut by_category: BTreeMap<Category, u64> = Category::ALL.iter().map(|c| (*c, 0)).collect();
    let mut by_year: BTreeMap<i32, u64> = BTreeMap::new();
    let mut total_size = 0u64;

    for p in records {
        *by_language.entry(p.language).or_default() += 1;
        *by_category.entry(p.category).or_default() += 1;
        if let Ok((year, _)) = quarter_of(p.reveal_date) {
            *by_year.entry(year).or_default() += 1;
        }
        total_size += p.serialized_len() as u64;
    }

    GlobalIndex {
        version: GLOBAL_INDEX_VERSION.to_string(),
        last_updated: now_ms,
        revision,
        total_predictions: records.len() as u64,
        by_language,
        by_category,
        by_year,
        metadata: StorageUsage::from_bytes(total_size),
    }
}

async fn read_json<T: DeserializeOwned>(ctx: &StorageContext, key: &str) -> Option<T> {
    let raw = match ctx.local.get(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(%key, error = %e, "index read failed");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            let err = StoreError::parse(key, e);
            warn!(error = %err, "ignoring unreadable index");
            None
        }
    }
}

async fn write_json<T: Serialize>(ctx: &StorageContext, key: &str, value: &T) -> bool {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!(%key, error = %e, "failed to encode index");
            return false;
        }
    };
    match ctx.local.set(key, &json).await {
        Ok(()) => true,
        Err(e) => {
            warn!(%key, error = %e, "failed to store index");
            false
        }
    }
}

pub async fn rebuild_cluster_index(
    ctx: &StorageContext,
    language: Language,
    category: Category,
) -> Option<ClusterIndex> {
    let key = cluster_index_key(language, category);
    let lock = ctx.index_locks.lock_for(&key);
    let _guard = lock.lock().await;

    let records = query::load_cluster(ctx, language, category, None, None).await;
    let revision = read_json::<ClusterIndex>(ctx, &key)
        .await
        .map_or(1, |prev| prev.revision + 1);
    let index = build_cluster_index(ctx, language, category, &records, revision);

    if !write_json(ctx, &key, &index).await {
        return None;
    }
    info!(%language, %category, total = index.total_predictions, revision, "cluster index rebuilt");
    Some(index)
}

pub async fn rebuild_global_index(ctx: &StorageContext) -> Option<GlobalIndex> {
    let lock = ctx.index_locks.lock_for(GLOBAL_INDEX_KEY);
    let _guard = lock.lock().await;

    let records = loader::load_all_predictions(ctx).await;
    let revision = read_json::<GlobalIndex>(ctx, GLOBAL_INDEX_KEY)
        .await
        .map_or(1, |prev| prev.revision + 1);
    let index = build_global_index(ctx.now_ms(), &records, revision);

    if !write_json(ctx, GLOBAL_INDEX_KEY, &index).await {
        return None;
    }
    info!(
        total = index.total_predictions,
        usage_percent = index.metadata.usage_percent,
        revision,
        "global index rebuilt"
    );
    Some(index)
}

/// Stored global index, built on first access.
pub async fn get_global_index(ctx: &StorageContext) -> Option<GlobalIndex> {
    match read_json(ctx, GLOBAL_INDEX_KEY).await {
        Some(index) => Some(index),
        None => rebuild_global_index(ctx).await,
    }
}

/// Stored cluster index, built on first access.
pub async fn get_cluster_index(
    ctx: &StorageContext,
    language: Language,
    category: Category,
) -> Option<ClusterIndex> {
    match read_json(ctx, &cluster_index_key(language, category)).await {
        Some(index) => Some(index),
        None => rebuild_cluster_index(ctx, language, category).await,
    }
}

/// Rebuild every cluster index and the global index.
pub async fn rebuild_all(ctx: &StorageContext) -> Option<GlobalIndex> {
    for language in Language::ALL {
        for category in Category::ALL {
            rebuild_cluster_index(ctx, language, category).await;
        }
    }
    rebuild_global_index(ctx).await
}

// ============ Incremental maintenance ============

/// Patch both index tiers for one record write.
pub async fn apply_write(
    ctx: &StorageContext,
    previous: Option<&Prediction>,
    current: &Prediction,
) -> (Option<ClusterIndex>, Option<GlobalIndex>) {
    let moved = previous
        .filter(|p| p.language != current.language || p.category != current.category);

    let cluster = match moved {
        Some(prev) => {
            rebuild_cluster_index(ctx, prev.language, prev.category).await;
            rebuild_cluster_index(ctx, current.language, current.category).await
        }
        None => match patch_cluster_index(ctx, previous, current).await {
            Some(index) => Some(index),
            None => rebuild_cluster_index(ctx, current.language, current.category).await,
        },
    };

    let global = match patch_global_index(ctx, previous, current).await {
        Some(index) => Some(index),
        None => rebuild_global_index(ctx).await,
    };

    (cluster, global)
}

/// `None` when there is no stored index to patch.
async fn patch_cluster_index(
    ctx: &StorageContext,
    previous: Option<&Prediction>,
    current: &Prediction,
) -> Option<ClusterIndex> {
    let key = cluster_index_key(current.language, current.category);
    let lock = ctx.index_locks.lock_for(&key);
    let _guard = lock.lock().await;

    let mut index: ClusterIndex = read_json(ctx, &key).await?;

    if let Some(prev) = previous {
        index.total_predictions = index.total_predictions.saturating_sub(1);
        if let Ok((year, quarter)) = quarter_of(prev.reveal_date) {
            if let Some(counts) = index.by_year.get_mut(&year) {
                let slot = counts.slot(quarter);
                *slot = slot.saturating_sub(1);
            }
        }
        index.recent_predictions.retain(|e| e.id != prev.id);
    }

    index.total_predictions += 1;
    if let Ok((year, quarter)) = quarter_of(current.reveal_date) {
        *index.by_year.entry(year).or_default().slot(quarter) += 1;
    }
    index.by_year.retain(|_, counts| counts.total() > 0);

    index.recent_predictions.push(recent_entry(ctx, current));
    index.recent_predictions.sort_by_key(|e| Reverse(e.created));
    index.recent_predictions.truncate(RECENT_LIMIT);

    index.revision += 1;
    index.last_updated = ctx.now_ms();

    if !write_json(ctx, &key, &index).await {
        return None;
    }
    Some(index)
}

async fn patch_global_index(
    ctx: &StorageContext,
    previous: Option<&Prediction>,
    current: &Prediction,
) -> Option<GlobalIndex> {
    let lock = ctx.index_locks.lock_for(GLOBAL_INDEX_KEY);
    let _guard = lock.lock().await;

    let mut index: GlobalIndex = read_json(ctx, GLOBAL_INDEX_KEY).await?;
    let mut total_size = index.metadata.total_size_bytes;

    if let Some(prev) = previous {
        index.total_predictions = index.total_predictions.saturating_sub(1);
        decrement(&mut index.by_language, prev.language);
        decrement(&mut index.by_category, prev.category);
        if let Ok((year, _)) = quarter_of(prev.reveal_date) {
            decrement(&mut index.by_year, year);
            if index.by_year.get(&year) == Some(&0) {
                index.by_year.remove(&year);
            }
        }
        total_size = total_size.saturating_sub(prev.serialized_len() as u64);
    }

    index.total_predictions += 1;
    *index.by_language.entry(current.language).or_default() += 1;
    *index.by_category.entry(current.category).or_default() += 1;
    if let Ok((year, _)) = quarter_of(current.reveal_date) {
        *index.by_year.entry(year).or_default() += 1;
    }
    total_size += current.serialized_len() as u64;

    index.metadata = StorageUsage::from_bytes(total_size);
    index.revision += 1;
    index.last_updated = ctx.now_ms();

    if !write_json(ctx, GLOBAL_INDEX_KEY, &index).await {
        return None;
    }
    Some(index)
}

fn decrement<K: Ord>(map: &mut BTreeMap<K, u64>, key: K) {
    if let Some(count) = map.get_mut(&key) {
        *count = count.saturating_sub(1);
    }
}
