//! # Capsule Store
//!
//! Clustered storage for prediction records, backed by a local fast cache
//! and an optional git content repository.
//!
//! Records are grouped into clusters by language, category, and the UTC
//! year and quarter of their reveal date. Every record lives at
//! `{root}{language}/{category}/{year}/Q{n}/pred_{id}_{created}.json`.
//! A hot cache of trending records and two tiers of derived indices sit on
//! top of the record store.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!   save ────▶ │ blob adapter │ ──▶ local store (SQLite kv)
//!              └──────┬───────┘ ──▶ remote repository (contents API)
//!                     │
//!        ┌────────────┼──────────────┐
//!        ▼            ▼              ▼
//!   ┌─────────┐  ┌──────────┐  ┌───────────┐
//!   │ indices │  │ hot cache│  │  loader   │ remote → cache → local
//!   └─────────┘  └──────────┘  └─────┬─────┘
//!                                    ▼
//!                                 query
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cluster`] | Cluster and file path derivation |
//! | [`blob`] | Record reads and writes against local and remote storage |
//! | [`local`] | Local key-value store trait with SQLite and in-memory backends |
//! | [`remote`] | Remote repository trait and GitHub contents client |
//! | [`cache`] | Hot cache with TTL |
//! | [`index`] | Cluster and global indices |
//! | [`query`] | Criteria search |
//! | [`loader`] | Tiered "load everything" |
//! | [`save`] | Write path tying the above together |
//! | [`snapshot`] | Offline `hot.json` digest |
//! | [`context`] | Explicit storage context |
//! | [`config`] | TOML configuration |

pub mod blob;
pub mod cache;
pub mod clock;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod index;
pub mod loader;
pub mod local;
pub mod migrate;
pub mod models;
pub mod query;
pub mod remote;
pub mod save;
pub mod snapshot;

pub use context::StorageContext;
pub use error::{Result, StoreError};
pub use models::{Category, Language, Prediction};
