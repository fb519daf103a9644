//! Load orchestration: "give me every record".
//!
//! Sources are tried in priority order:
//!
//! 1. the remote repository, when configured and non-empty (sorted newest
//!    first; refreshes the hot cache and mirrors records locally),
//! 2. the hot cache, when present and non-empty (returned in trending order,
//!    not re-sorted),
//! 3. a full scan of the local store (sorted newest first).
//!
//! Failures at any tier are logged and fall through to the next one.

use std::cmp::Reverse;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::blob;
use crate::cache::{self, CacheKind};
use crate::context::StorageContext;
use crate::models::Prediction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Remote,
    HotCache,
    Local,
}

pub async fn load_all_predictions(ctx: &StorageContext) -> Vec<Prediction> {
    load_all_predictions_with_source(ctx).await.0
}

pub async fn load_all_predictions_with_source(
    ctx: &StorageContext,
) -> (Vec<Prediction>, LoadSource) {
    if ctx.remote.is_some() {
        match blob::list_all_remote(ctx).await {
            Ok(mut records) if !records.is_empty() => {
                sort_newest_first(&mut records);
                cache::write_hot_cache(ctx, &records).await;
                return (records, LoadSource::Remote);
            }
            Ok(_) => info!("remote repository holds no predictions; trying cache"),
            Err(e) => warn!(error = %e, "remote load failed; trying cache"),
        }
    }

    match cache::read_cache(ctx, CacheKind::Hot).await {
        Some(entry) if !entry.predictions.is_empty() => {
            info!(count = entry.predictions.len(), "loaded predictions from hot cache");
            return (entry.predictions, LoadSource::HotCache);
        }
        Some(_) => info!("hot cache is empty; scanning local store"),
        None => {}
    }

    let mut records = match blob::scan_local(ctx).await {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, "local scan failed");
            Vec::new()
        }
    };
    sort_newest_first(&mut records);
    info!(count = records.len(), "loaded predictions from local store");
    (records, LoadSource::Local)
}

pub(crate) fn sort_newest_first(records: &mut [Prediction]) {
    records.sort_by_key(|r| Reverse(r.created));
}
