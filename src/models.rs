//! Core data models: predictions and their classification.
//!
//! Records are stored as camelCase JSON so that files already present in the
//! content repository decode unchanged. Timestamps are milliseconds since the
//! Unix epoch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Languages a prediction may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    It,
    En,
    Es,
    Fr,
    De,
    Pt,
    Zh,
    Ja,
    Ko,
}

impl Language {
    pub const ALL: [Language; 9] = [
        Language::It,
        Language::En,
        Language::Es,
        Language::Fr,
        Language::De,
        Language::Pt,
        Language::Zh,
        Language::Ja,
        Language::Ko,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::It => "it",
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::Pt => "pt",
            Language::Zh => "zh",
            Language::Ja => "ja",
            Language::Ko => "ko",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| StoreError::InvalidClassification {
                kind: "language",
                value: s.to_string(),
            })
    }
}

/// Topic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Crypto,
    Ai,
    Politics,
    Tech,
    Sports,
    Economy,
    Science,
    Health,
    Climate,
    Space,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Crypto,
        Category::Ai,
        Category::Politics,
        Category::Tech,
        Category::Sports,
        Category::Economy,
        Category::Science,
        Category::Health,
        Category::Climate,
        Category::Space,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Crypto => "crypto",
            Category::Ai => "ai",
            Category::Politics => "politics",
            Category::Tech => "tech",
            Category::Sports => "sports",
            Category::Economy => "economy",
            Category::Science => "science",
            Category::Health => "health",
            Category::Climate => "climate",
            Category::Space => "space",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| StoreError::InvalidClassification {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Mutable counters and bookkeeping attached to a prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMetadata {
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub upvotes: u64,
    /// Cluster directory assigned at first write. Never recomputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single prediction, the unit of storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub author: String,
    pub language: Language,
    pub category: Category,
    pub reveal_date: i64,
    #[serde(default)]
    pub revealed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<i64>,
    #[serde(default)]
    pub metadata: PredictionMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Prediction {
    /// Size of the compact JSON encoding, used for storage accounting.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    pub fn has_any_tag(&self, wanted: &[String]) -> bool {
        wanted.iter().any(|t| self.tags.contains(t))
    }
}
