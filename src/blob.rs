//! Blob store adapter: individual records against the local fast cache and
//! the remote repository.
//!
//! Writes go to the local store first and unconditionally. The remote write
//! that follows is best-effort: it is a conditional update keyed on the
//! object's current revision, retried on conflict a bounded number of times,
//! and its failure never undoes the local write.
//!
//! Reads by id are local only. Bulk remote reads fan out one request per
//! record file and drop (and log) whatever cannot be fetched or decoded.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cluster::{derive_filename, derive_prediction_path, is_prediction_file};
use crate::context::StorageContext;
use crate::error::{Result, StoreError};
use crate::local::{prediction_key, PREDICTION_PREFIX};
use crate::models::Prediction;
use crate::remote::{PutRequest, RemoteError, RemoteRepository};

/// Outcome of the remote half of a [`put`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteWrite {
    /// No remote configured.
    Skipped,
    Written { attempts: u32 },
    ConflictUnresolved { attempts: u32 },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct PutReport {
    pub path: String,
    /// The locally stored version this write replaced, if any.
    pub previous: Option<Prediction>,
    pub remote: RemoteWrite,
}

/// Repository path for a record, honouring an already-assigned cluster.
pub fn record_path(ctx: &StorageContext, record: &Prediction) -> Result<String> {
    match record.metadata.cluster_path.as_deref() {
        Some(dir) if !dir.is_empty() => {
            let dir = crate::cluster::normalize_root(dir);
            Ok(dir + &derive_filename(&record.id, record.created))
        }
        _ => derive_prediction_path(ctx.root(), record),
    }
}

pub async fn put(ctx: &StorageContext, record: &Prediction) -> Result<PutReport> {
    let path = record_path(ctx, record)?;
    let key = prediction_key(&record.id);
    let previous = read_local_record(ctx, &key).await;

    let pretty = serde_json::to_string_pretty(record)?;
    ctx.local.set(&key, &pretty).await?;
    debug!(%path, "record written to local store");

    let remote = match &ctx.remote {
        None => RemoteWrite::Skipped,
        Some(remote) => push_remote(ctx, remote.as_ref(), &path, record, &pretty).await,
    };

    Ok(PutReport {
        path,
        previous,
        remote,
    })
}

async fn push_remote(
    ctx: &StorageContext,
    remote: &dyn RemoteRepository,
    path: &str,
    record: &Prediction,
    content: &str,
) -> RemoteWrite {
    let max_attempts = ctx.max_conflict_retries() + 1;

    for attempt in 1..=max_attempts {
        let sha = match remote.get_content(path).await {
            Ok(existing) => existing.map(|b| b.sha),
            Err(e) => {
                warn!(%path, error = %e, "remote write skipped: cannot read current revision");
                return RemoteWrite::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let request = PutRequest {
            message: format!("Add prediction: {}", record.title),
            content: content.to_string(),
            sha,
        };

        match remote.put_content(path, &request).await {
            Ok(()) => {
                info!(%path, attempt, "record pushed to remote");
                return RemoteWrite::Written { attempts: attempt };
            }
            Err(RemoteError::Conflict(_)) => {
                warn!(%path, attempt, "remote revision changed during write; retrying");
            }
            Err(e) => {
                warn!(%path, error = %e, "remote write failed");
                return RemoteWrite::Failed {
                    reason: e.to_string(),
                };
            }
        }
    }

    let err = StoreError::ConflictUnresolved {
        path: path.to_string(),
        attempts: max_attempts,
    };
    error!(error = %err, "giving up on remote write");
    RemoteWrite::ConflictUnresolved {
        attempts: max_attempts,
    }
}

/// Local lookup by id. No remote fallback.
pub async fn get(ctx: &StorageContext, id: &str) -> Option<Prediction> {
    let record = read_local_record(ctx, &prediction_key(id)).await;
    if record.is_none() {
        debug!(%id, "prediction not found in local store");
    }
    record
}

async fn read_local_record(ctx: &StorageContext, key: &str) -> Option<Prediction> {
    let raw = match ctx.local.get(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(%key, error = %e, "local store read failed");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            let err = StoreError::parse(key, e);
            warn!(error = %err, "dropping unreadable local record");
            None
        }
    }
}

/// Every record file in the remote tree, decoded, in tree order.
///
/// Successfully fetched records are mirrored into the local store.
pub async fn list_all_remote(ctx: &StorageContext) -> Result<Vec<Prediction>> {
    let remote = ctx
        .remote
        .as_ref()
        .ok_or_else(|| StoreError::RemoteUnavailable("remote not configured".to_string()))?;
    let remote: &dyn RemoteRepository = remote.as_ref();

    let tree = remote
        .tree(ctx.git_ref())
        .await
        .map_err(|e| StoreError::RemoteUnavailable(e.to_string()))?;

    let root = ctx.root();
    let files: Vec<String> = tree
        .into_iter()
        .filter(|e| e.is_blob() && is_prediction_file(root, &e.path))
        .map(|e| e.path)
        .collect();
    info!(count = files.len(), "found prediction files on remote");

    let fetched: Vec<Option<Prediction>> = stream::iter(files.iter())
        .map(|path| async move { fetch_record(remote, path).await })
        .buffered(ctx.fetch_concurrency())
        .collect()
        .await;

    let total = fetched.len();
    let records: Vec<Prediction> = fetched.into_iter().flatten().collect();
    if records.len() < total {
        let err = StoreError::PartialFetchFailure {
            failed: total - records.len(),
            total,
        };
        warn!(error = %err, "continuing with partial remote result");
    }

    for record in &records {
        match serde_json::to_string_pretty(record) {
            Ok(json) => {
                if let Err(e) = ctx.local.set(&prediction_key(&record.id), &json).await {
                    warn!(id = %record.id, error = %e, "failed to mirror record locally");
                }
            }
            Err(e) => warn!(id = %record.id, error = %e, "failed to encode record"),
        }
    }

    info!(count = records.len(), "loaded predictions from remote");
    Ok(records)
}

async fn fetch_record(remote: &dyn RemoteRepository, path: &str) -> Option<Prediction> {
    let blob = match remote.get_content(path).await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            warn!(%path, "record listed in tree but missing");
            return None;
        }
        Err(e) => {
            warn!(%path, error = %e, "failed to fetch record");
            return None;
        }
    };
    match serde_json::from_str(&blob.content) {
        Ok(record) => Some(record),
        Err(e) => {
            let err = StoreError::parse(path, e);
            warn!(error = %err, "dropping unreadable remote record");
            None
        }
    }
}

/// Every `prediction_*` entry of the local store that decodes.
pub async fn scan_local(ctx: &StorageContext) -> Result<Vec<Prediction>> {
    let entries = ctx.local.scan_prefix(PREDICTION_PREFIX).await?;
    let mut records = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match serde_json::from_str::<Prediction>(&value) {
            Ok(record) => records.push(record),
            Err(e) => {
                let err = StoreError::parse(key, e);
                warn!(error = %err, "skipping unreadable local record");
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RemoteConfig};
    use crate::local::InMemoryLocalStore;
    use crate::remote::InMemoryRepository;
    use std::sync::Arc;

    fn record(id: &str, created: i64) -> Prediction {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "created": created,
            "author": "ada",
            "language": "en",
            "category": "tech",
            "revealDate": 1771113600000i64,
            "title": format!("title {}", id),
            "tags": ["t"]
        }))
        .unwrap()
    }

    fn ctx_with(remote: Option<Arc<InMemoryRepository>>) -> StorageContext {
        let mut config = Config::local("unused.sqlite");
        if remote.is_some() {
            config.remote = Some(RemoteConfig::default());
        }
        StorageContext::new(
            config,
            Arc::new(InMemoryLocalStore::new()),
            remote.map(|r| r as Arc<dyn RemoteRepository>),
        )
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let ctx = ctx_with(None);
        let rec = record("a1", 1_700_000_000_000);
        let report = put(&ctx, &rec).await.unwrap();
        assert_eq!(report.remote, RemoteWrite::Skipped);
        assert!(report.previous.is_none());
        assert_eq!(
            report.path,
            "data/predictions/en/tech/2026/Q1/pred_a1_1700000000000.json"
        );
        assert_eq!(get(&ctx, "a1").await, Some(rec));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let ctx = ctx_with(None);
        assert!(get(&ctx, "nope").await.is_none());
    }

    #[tokio::test]
    async fn test_get_does_not_fall_back_to_remote() {
        let repo = Arc::new(InMemoryRepository::new());
        let rec = record("r1", 5);
        repo.insert(
            "data/predictions/en/tech/2026/Q1/pred_r1_5.json",
            &serde_json::to_string(&rec).unwrap(),
        );
        let ctx = ctx_with(Some(repo));
        assert!(get(&ctx, "r1").await.is_none());
    }

    #[tokio::test]
    async fn test_put_reports_previous_version() {
        let ctx = ctx_with(None);
        let mut rec = record("a1", 1);
        put(&ctx, &rec).await.unwrap();
        rec.metadata.views = 9;
        let report = put(&ctx, &rec).await.unwrap();
        assert_eq!(report.previous.unwrap().metadata.views, 0);
    }

    #[tokio::test]
    async fn test_put_creates_then_updates_remote() {
        let repo = Arc::new(InMemoryRepository::new());
        let ctx = ctx_with(Some(repo.clone()));
        let mut rec = record("a1", 1);

        let first = put(&ctx, &rec).await.unwrap();
        assert_eq!(first.remote, RemoteWrite::Written { attempts: 1 });

        rec.metadata.upvotes = 3;
        let second = put(&ctx, &rec).await.unwrap();
        assert_eq!(second.remote, RemoteWrite::Written { attempts: 1 });

        let stored: Prediction =
            serde_json::from_str(&repo.content(&second.path).unwrap()).unwrap();
        assert_eq!(stored.metadata.upvotes, 3);
    }

    #[tokio::test]
    async fn test_put_retries_after_conflict() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.force_conflicts(1);
        let ctx = ctx_with(Some(repo.clone()));
        let report = put(&ctx, &record("a1", 1)).await.unwrap();
        assert_eq!(report.remote, RemoteWrite::Written { attempts: 2 });
        assert_eq!(repo.put_attempts(), 2);
    }

    #[tokio::test]
    async fn test_put_conflict_exhausted_keeps_local_write() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.force_conflicts(10);
        let ctx = ctx_with(Some(repo.clone()));
        let rec = record("a1", 1);
        let report = put(&ctx, &rec).await.unwrap();
        assert_eq!(report.remote, RemoteWrite::ConflictUnresolved { attempts: 4 });
        assert_eq!(repo.put_attempts(), 4);
        assert_eq!(get(&ctx, "a1").await, Some(rec));
    }

    #[tokio::test]
    async fn test_put_remote_down_is_not_fatal() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.set_unavailable(true);
        let ctx = ctx_with(Some(repo));
        let report = put(&ctx, &record("a1", 1)).await.unwrap();
        assert!(matches!(report.remote, RemoteWrite::Failed { .. }));
        assert!(get(&ctx, "a1").await.is_some());
    }

    #[tokio::test]
    async fn test_list_all_remote_drops_bad_entries_and_mirrors() {
        let repo = Arc::new(InMemoryRepository::new());
        let good = record("g1", 10);
        repo.insert(
            "data/predictions/en/tech/2026/Q1/pred_g1_10.json",
            &serde_json::to_string(&good).unwrap(),
        );
        repo.insert("data/predictions/en/tech/2026/Q1/pred_bad_11.json", "{not json");
        repo.insert("data/predictions/en/tech/2026/Q1/pred_gone_12.json", "{}");
        repo.break_path("data/predictions/en/tech/2026/Q1/pred_gone_12.json");
        repo.insert("data/cache/hot.json", "{}");
        repo.insert("docs/pred_x_1.json", "{}");

        let ctx = ctx_with(Some(repo));
        let records = list_all_remote(&ctx).await.unwrap();
        assert_eq!(records, vec![good.clone()]);
        assert_eq!(get(&ctx, "g1").await, Some(good));
    }

    #[tokio::test]
    async fn test_list_all_remote_unconfigured() {
        let ctx = ctx_with(None);
        assert!(matches!(
            list_all_remote(&ctx).await,
            Err(StoreError::RemoteUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_local_skips_malformed() {
        let ctx = ctx_with(None);
        put(&ctx, &record("a", 1)).await.unwrap();
        ctx.local.set("prediction_broken", "{").await.unwrap();
        ctx.local.set("cache_hot", "{}").await.unwrap();
        let records = scan_local(&ctx).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
    }
}
