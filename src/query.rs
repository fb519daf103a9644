//! Criteria-based retrieval.
//!
//! When both language and category are given the search is scoped to that
//! cluster, which is the cheap path and the only one that honours `year`
//! and `quarter`. Otherwise the full record set is loaded through the
//! [`loader`](crate::loader) and filtered.

use serde::Deserialize;
use tracing::error;

use crate::blob;
use crate::cluster::{quarter_of, Quarter};
use crate::context::StorageContext;
use crate::loader;
use crate::models::{Category, Language, Prediction};

/// Search filters. Every field is optional; present fields are ANDed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub quarter: Option<Quarter>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub revealed: Option<bool>,
    /// Matches records sharing at least one tag.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Records of one (language, category) cluster, optionally narrowed to a
/// reveal year and/or quarter. Scans the local store.
pub async fn load_cluster(
    ctx: &StorageContext,
    language: Language,
    category: Category,
    year: Option<i32>,
    quarter: Option<Quarter>,
) -> Vec<Prediction> {
    let records = match blob::scan_local(ctx).await {
        Ok(records) => records,
        Err(e) => {
            error!(%language, %category, error = %e, "cluster load failed");
            return Vec::new();
        }
    };

    records
        .into_iter()
        .filter(|p| p.language == language && p.category == category)
        .filter(|p| {
            if year.is_none() && quarter.is_none() {
                return true;
            }
            match quarter_of(p.reveal_date) {
                Ok((y, q)) => {
                    year.map_or(true, |want| want == y) && quarter.map_or(true, |want| want == q)
                }
                Err(_) => false,
            }
        })
        .collect()
}

pub async fn search(ctx: &StorageContext, criteria: &SearchCriteria) -> Vec<Prediction> {
    let mut records = match (criteria.language, criteria.category) {
        (Some(language), Some(category)) => {
            load_cluster(ctx, language, category, criteria.year, criteria.quarter).await
        }
        _ => loader::load_all_predictions(ctx).await,
    };

    if let (Some(language), None) = (criteria.language, criteria.category) {
        records.retain(|p| p.language == language);
    }
    if let (None, Some(category)) = (criteria.language, criteria.category) {
        records.retain(|p| p.category == category);
    }
    if let Some(author) = &criteria.author {
        records.retain(|p| &p.author == author);
    }
    if let Some(revealed) = criteria.revealed {
        records.retain(|p| p.revealed == revealed);
    }
    if let Some(tags) = &criteria.tags {
        records.retain(|p| p.has_any_tag(tags));
    }

    records
}
