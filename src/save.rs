//! Record write path.
//!
//! [`save_prediction`] assigns the record's cluster (once), writes it through
//! the blob store, and brings both index tiers up to date before returning.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::blob::{self, RemoteWrite};
use crate::cluster::ClusterKey;
use crate::config::IndexMode;
use crate::context::StorageContext;
use crate::error::Result;
use crate::index::{self, ClusterIndex, GlobalIndex};
use crate::models::{Category, Language, Prediction};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub path: String,
    pub cluster_path: String,
    pub remote: RemoteWrite,
    pub cluster_index: Option<ClusterIndex>,
    pub global_index: Option<GlobalIndex>,
}

/// Decode a record from untrusted JSON, reporting a bad language or
/// category as [`StoreError::InvalidClassification`].
pub fn parse_prediction(json: &str) -> Result<Prediction> {
    let value: Value = serde_json::from_str(json)?;
    if let Some(language) = value.get("language").and_then(Value::as_str) {
        language.parse::<Language>()?;
    }
    if let Some(category) = value.get("category").and_then(Value::as_str) {
        category.parse::<Category>()?;
    }
    Ok(serde_json::from_value(value)?)
}

pub async fn save_prediction(ctx: &StorageContext, mut record: Prediction) -> Result<SaveOutcome> {
    let key = ClusterKey::of(&record)?;

    record.metadata.cluster_path = record
        .metadata
        .cluster_path
        .take()
        .filter(|p| !p.is_empty());
    if record.metadata.cluster_path.is_none() {
        let assigned = blob::get(ctx, &record.id)
            .await
            .and_then(|prev| prev.metadata.cluster_path)
            .filter(|p| !p.is_empty());
        record.metadata.cluster_path = Some(assigned.unwrap_or_else(|| key.path(ctx.root())));
    }
    let cluster_path = record.metadata.cluster_path.clone().unwrap_or_default();

    let report = blob::put(ctx, &record).await?;
    info!(path = %report.path, "prediction saved");

    let (cluster_index, global_index) = match ctx.config.index.mode {
        IndexMode::Rebuild => (
            index::rebuild_cluster_index(ctx, record.language, record.category).await,
            index::rebuild_global_index(ctx).await,
        ),
        IndexMode::Incremental => index::apply_write(ctx, report.previous.as_ref(), &record).await,
    };

    Ok(SaveOutcome {
        path: report.path,
        cluster_path,
        remote: report.remote,
        cluster_index,
        global_index,
    })
}

/// Local lookup by id.
pub async fn load_prediction(ctx: &StorageContext, id: &str) -> Option<Prediction> {
    blob::get(ctx, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{Config, RemoteConfig};
    use crate::error::StoreError;
    use crate::local::InMemoryLocalStore;
    use crate::remote::{InMemoryRepository, RemoteRepository};
    use std::sync::Arc;

    const NOW: i64 = 1_780_000_000_000;
    // 2026-02-15T00:00:00Z
    const FEB_15_2026: i64 = 1_771_113_600_000;

    fn sample(id: &str) -> Prediction {
        parse_prediction(&format!(
            r#"{{"id":"{}","created":{},"author":"ada","language":"it","category":"crypto",
               "revealDate":{},"title":"t","tags":["btc"]}}"#,
            id, NOW, FEB_15_2026
        ))
        .unwrap()
    }

    fn ctx(config: Config, remote: Option<Arc<InMemoryRepository>>) -> StorageContext {
        StorageContext::new(
            config,
            Arc::new(InMemoryLocalStore::new()),
            remote.map(|r| r as Arc<dyn RemoteRepository>),
        )
        .with_clock(Arc::new(ManualClock::new(NOW)))
    }

    #[test]
    fn test_parse_rejects_unknown_classification() {
        let err = parse_prediction(r#"{"language":"xx","category":"ai","revealDate":0}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidClassification { kind: "language", .. }
        ));
        let err = parse_prediction(r#"{"language":"en","category":"gossip","revealDate":0}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidClassification { kind: "category", .. }
        ));
    }

    #[tokio::test]
    async fn test_save_assigns_cluster_and_rebuilds_indices() {
        let ctx = ctx(Config::local("unused.sqlite"), None);
        let outcome = save_prediction(&ctx, sample("p1")).await.unwrap();
        assert_eq!(outcome.cluster_path, "data/predictions/it/crypto/2026/Q1/");
        assert_eq!(
            outcome.path,
            format!("data/predictions/it/crypto/2026/Q1/pred_p1_{}.json", NOW)
        );
        assert_eq!(outcome.remote, RemoteWrite::Skipped);
        assert_eq!(outcome.cluster_index.unwrap().total_predictions, 1);
        let global = outcome.global_index.unwrap();
        assert_eq!(global.by_language[&Language::It], 1);

        let stored = load_prediction(&ctx, "p1").await.unwrap();
        assert_eq!(
            stored.metadata.cluster_path.as_deref(),
            Some("data/predictions/it/crypto/2026/Q1/")
        );
    }

    #[tokio::test]
    async fn test_reveal_date_edit_keeps_cluster() {
        let ctx = ctx(Config::local("unused.sqlite"), None);
        save_prediction(&ctx, sample("p1")).await.unwrap();

        let mut edited = sample("p1");
        edited.reveal_date = FEB_15_2026 + 200 * 86_400_000;
        let outcome = save_prediction(&ctx, edited).await.unwrap();
        assert_eq!(outcome.cluster_path, "data/predictions/it/crypto/2026/Q1/");
    }

    #[tokio::test]
    async fn test_empty_cluster_path_is_assigned() {
        let ctx = ctx(Config::local("unused.sqlite"), None);
        let mut record = sample("p1");
        record.metadata.cluster_path = Some(String::new());
        let outcome = save_prediction(&ctx, record).await.unwrap();
        assert_eq!(outcome.cluster_path, "data/predictions/it/crypto/2026/Q1/");
        let stored = load_prediction(&ctx, "p1").await.unwrap();
        assert_eq!(
            stored.metadata.cluster_path.as_deref(),
            Some("data/predictions/it/crypto/2026/Q1/")
        );
    }

    #[tokio::test]
    async fn test_save_pushes_to_remote() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut config = Config::local("unused.sqlite");
        config.remote = Some(RemoteConfig::default());
        let ctx = ctx(config, Some(repo.clone()));

        let outcome = save_prediction(&ctx, sample("p1")).await.unwrap();
        assert_eq!(outcome.remote, RemoteWrite::Written { attempts: 1 });
        assert!(repo.content(&outcome.path).is_some());
    }

    #[tokio::test]
    async fn test_incremental_mode_counts() {
        let mut config = Config::local("unused.sqlite");
        config.index.mode = IndexMode::Incremental;
        let ctx = ctx(config, None);

        save_prediction(&ctx, sample("p1")).await.unwrap();
        let outcome = save_prediction(&ctx, sample("p2")).await.unwrap();
        assert_eq!(outcome.cluster_index.unwrap().total_predictions, 2);
        let mut updated = sample("p2");
        updated.metadata.views = 7;
        let outcome = save_prediction(&ctx, updated).await.unwrap();
        assert_eq!(outcome.global_index.unwrap().total_predictions, 2);
    }

    #[tokio::test]
    async fn test_invalid_timestamp_is_rejected() {
        let ctx = ctx(Config::local("unused.sqlite"), None);
        let mut bad = sample("p1");
        bad.reveal_date = i64::MAX;
        assert!(matches!(
            save_prediction(&ctx, bad).await,
            Err(StoreError::InvalidTimestamp(_))
        ));
        assert!(load_prediction(&ctx, "p1").await.is_none());
    }
}
