//! Time-bounded cache entries kept in the local store.
//!
//! The hot cache holds the top-N records by trending score. Scoped kinds
//! (per language, per category) share the format and TTL rules but no writer
//! in this crate populates them yet.
//!
//! Expiry is enforced on read: an entry older than its TTL is removed and
//! reported as absent. There is no background sweep.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::StorageContext;
use crate::error::StoreError;
use crate::local::HOT_CACHE_KEY;
use crate::models::{Category, Language, Prediction};

const RECENT_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;
const RECENT_BONUS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Hot,
    Language(Language),
    Category(Category),
}

impl CacheKind {
    pub fn key(&self) -> String {
        match self {
            CacheKind::Hot => HOT_CACHE_KEY.to_string(),
            CacheKind::Language(l) => format!("cache_language_{}", l),
            CacheKind::Category(c) => format!("cache_category_{}", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
    /// Seconds.
    pub ttl: u64,
    pub predictions: Vec<Prediction>,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl).unwrap_or(i64::MAX).saturating_mul(1000);
        now_ms.saturating_sub(self.last_updated) > ttl_ms
    }
}

/// views + 2 x upvotes, plus 100 for records created in the last 7 days.
pub fn trending_score(record: &Prediction, now_ms: i64) -> u64 {
    let base = record
        .metadata
        .views
        .saturating_add(record.metadata.upvotes.saturating_mul(2));
    // Created timestamps come from untrusted JSON.
    if now_ms.saturating_sub(record.created) < RECENT_WINDOW_MS {
        base.saturating_add(RECENT_BONUS)
    } else {
        base
    }
}

/// Top `limit` records by trending score. Ties keep their input order.
pub fn rank_trending(records: &[Prediction], now_ms: i64, limit: usize) -> Vec<Prediction> {
    let mut scored: Vec<(u64, &Prediction)> = records
        .iter()
        .map(|r| (trending_score(r, now_ms), r))
        .collect();
    scored.sort_by_key(|(score, _)| Reverse(*score));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, r)| r.clone())
        .collect()
}

pub async fn read_cache(ctx: &StorageContext, kind: CacheKind) -> Option<CacheEntry> {
    let key = kind.key();
    let raw = match ctx.local.get(&key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(%key, error = %e, "cache read failed");
            return None;
        }
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
        Ok(entry) => entry,
        Err(e) => {
            let err = StoreError::parse(key.as_str(), e);
            warn!(error = %err, "ignoring unreadable cache entry");
            return None;
        }
    };

    if entry.is_expired(ctx.now_ms()) {
        debug!(%key, "cache entry expired; evicting");
        if let Err(e) = ctx.local.remove(&key).await {
            warn!(%key, error = %e, "failed to evict expired cache entry");
        }
        return None;
    }

    Some(entry)
}

/// Recompute and store the hot cache from `records`.
pub async fn write_hot_cache(ctx: &StorageContext, records: &[Prediction]) -> Option<CacheEntry> {
    let now = ctx.now_ms();
    let entry = CacheEntry {
        last_updated: now,
        ttl: ctx.config.cache.ttl_secs,
        predictions: rank_trending(records, now, ctx.config.cache.hot_size),
    };

    let json = match serde_json::to_string(&entry) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to encode hot cache");
            return None;
        }
    };
    if let Err(e) = ctx.local.set(HOT_CACHE_KEY, &json).await {
        warn!(error = %e, "failed to store hot cache");
        return None;
    }

    info!(count = entry.predictions.len(), "hot cache updated");
    Some(entry)
}
