//! Cluster path derivation.
//!
//! A prediction's storage location is a pure function of its language,
//! category and reveal date:
//!
//! ```text
//! <root><language>/<category>/<year>/<quarter>/pred_<id>_<created>.json
//! ```
//!
//! The reveal date is read in the UTC calendar. Once a record is written
//! its directory is fixed; editing the reveal date later does not move it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::models::{Category, Language, Prediction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

    /// Map a calendar month (1-12) to its quarter.
    pub fn from_month(month: u32) -> Quarter {
        match month {
            1..=3 => Quarter::Q1,
            4..=6 => Quarter::Q2,
            7..=9 => Quarter::Q3,
            _ => Quarter::Q4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quarter::Q1 => "Q1",
            Quarter::Q2 => "Q2",
            Quarter::Q3 => "Q3",
            Quarter::Q4 => "Q4",
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quarter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Quarter::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("invalid quarter '{}', expected Q1..Q4", s))
    }
}

/// Partition a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub language: Language,
    pub category: Category,
    pub year: i32,
    pub quarter: Quarter,
}

impl ClusterKey {
    pub fn new(language: Language, category: Category, reveal_date: i64) -> Result<Self> {
        let (year, quarter) = quarter_of(reveal_date)?;
        Ok(Self {
            language,
            category,
            year,
            quarter,
        })
    }

    pub fn of(prediction: &Prediction) -> Result<Self> {
        Self::new(
            prediction.language,
            prediction.category,
            prediction.reveal_date,
        )
    }

    /// Directory for this key under `root`, always ending in `/`.
    pub fn path(&self, root: &str) -> String {
        format!(
            "{}{}/{}/{}/{}/",
            normalize_root(root),
            self.language,
            self.category,
            self.year,
            self.quarter
        )
    }
}

/// Calendar year and quarter of a millisecond timestamp, in UTC.
pub fn quarter_of(ts_ms: i64) -> Result<(i32, Quarter)> {
    let dt: DateTime<Utc> =
        DateTime::from_timestamp_millis(ts_ms).ok_or(StoreError::InvalidTimestamp(ts_ms))?;
    Ok((dt.year(), Quarter::from_month(dt.month())))
}

pub fn derive_cluster_path(
    root: &str,
    language: Language,
    category: Category,
    reveal_date: i64,
) -> Result<String> {
    Ok(ClusterKey::new(language, category, reveal_date)?.path(root))
}

/// String-typed variant for callers holding unvalidated input.
pub fn derive_cluster_path_str(
    root: &str,
    language: &str,
    category: &str,
    reveal_date: i64,
) -> Result<String> {
    derive_cluster_path(root, language.parse()?, category.parse()?, reveal_date)
}

/// File name for a record. Unique only if `(id, created)` pairs are.
pub fn derive_filename(id: &str, created: i64) -> String {
    format!("pred_{}_{}.json", id, created)
}

pub fn derive_prediction_path(root: &str, prediction: &Prediction) -> Result<String> {
    let dir = derive_cluster_path(
        root,
        prediction.language,
        prediction.category,
        prediction.reveal_date,
    )?;
    Ok(dir + &derive_filename(&prediction.id, prediction.created))
}

/// Whether a repository path names a record file under `root`.
pub fn is_prediction_file(root: &str, path: &str) -> bool {
    path.starts_with(&normalize_root(root)) && path.contains("/pred_") && path.ends_with(".json")
}

pub(crate) fn normalize_root(root: &str) -> String {
    if root.ends_with('/') {
        root.to_string()
    } else {
        format!("{}/", root)
    }
}
