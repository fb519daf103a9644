//! Remote content repository.
//!
//! The repository is consumed as a path-addressed blob store with three
//! calls: a recursive tree listing, a content read returning the blob's
//! revision (`sha`), and a conditional content write. [`GitHubContentsClient`]
//! speaks the GitHub REST contents API; [`InMemoryRepository`] is a fake with
//! the same revision semantics.
//!
//! # Wire format
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | tree | `GET /repos/{repo}/git/trees/{ref}?recursive=1` | `{ tree: [{ path, type }] }` |
//! | read | `GET /repos/{repo}/contents/{path}?ref={ref}` | `{ content: base64, sha }` |
//! | write | `PUT /repos/{repo}/contents/{path}` `{ message, content: base64, sha?, branch }` | 2xx, or 409/422 on a stale `sha` |
//!
//! Content is UTF-8 JSON, base64-encoded for transport.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RemoteConfig;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("revision conflict on {0}")]
    Conflict(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("remote not configured")]
    NotConfigured,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// Decoded blob content and its revision identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBlob {
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub message: String,
    /// Plain UTF-8 content; encoding for transport is the client's concern.
    pub content: String,
    /// Revision being replaced, `None` when creating.
    pub sha: Option<String>,
}

#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn tree(&self, git_ref: &str) -> Result<Vec<TreeEntry>, RemoteError>;

    /// Returns `Ok(None)` when no object exists at `path`.
    async fn get_content(&self, path: &str) -> Result<Option<RemoteBlob>, RemoteError>;

    /// Conditional upsert. A stale or missing `sha` yields
    /// [`RemoteError::Conflict`].
    async fn put_content(&self, path: &str, request: &PutRequest) -> Result<(), RemoteError>;
}

pub fn encode_content(content: &str) -> String {
    BASE64.encode(content.as_bytes())
}

/// Decode transport base64. GitHub wraps the payload at 60 columns.
pub fn decode_content(encoded: &str) -> Result<String, RemoteError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| RemoteError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

// ============ GitHub contents API ============

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    sha: String,
}

#[derive(Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    branch: &'a str,
}

/// [`RemoteRepository`] over the GitHub REST contents API.
pub struct GitHubContentsClient {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
    branch: String,
}

impl GitHubContentsClient {
    pub fn new(
        api_base: &str,
        repo: &str,
        token: &str,
        branch: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("capsule-store/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            branch: branch.to_string(),
        })
    }

    /// Build a client when both repository and token are configured.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let repo = config
            .repo
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or(RemoteError::NotConfigured)?;
        let token = config.resolved_token().ok_or(RemoteError::NotConfigured)?;
        Self::new(
            &config.api_base,
            repo,
            &token,
            &config.branch,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn contents_url(&self, path: &str) -> String {
        let encoded = path.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("{}/repos/{}/contents/{}", self.api_base, self.repo, encoded)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
    }
}

async fn http_error(resp: reqwest::Response) -> RemoteError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    RemoteError::Http {
        status,
        body: body.chars().take(500).collect(),
    }
}

#[async_trait]
impl RemoteRepository for GitHubContentsClient {
    async fn tree(&self, git_ref: &str) -> Result<Vec<TreeEntry>, RemoteError> {
        let url = format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_base,
            self.repo,
            uri_encode(git_ref)
        );
        let resp = self.authorized(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        let body: TreeResponse = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        if body.truncated {
            tracing::warn!(repo = %self.repo, "tree listing truncated by the remote; some records will be missing");
        }
        Ok(body.tree)
    }

    async fn get_content(&self, path: &str) -> Result<Option<RemoteBlob>, RemoteError> {
        let resp = self
            .authorized(self.client.get(self.contents_url(path)))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }
        let body: ContentResponse = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(Some(RemoteBlob {
            content: decode_content(&body.content)?,
            sha: body.sha,
        }))
    }

    async fn put_content(&self, path: &str, request: &PutRequest) -> Result<(), RemoteError> {
        let body = PutBody {
            message: &request.message,
            content: encode_content(&request.content),
            sha: request.sha.as_deref(),
            branch: &self.branch,
        };
        let resp = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(&body)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(RemoteError::Conflict(path.to_string()))
            }
            _ => Err(http_error(resp).await),
        }
    }
}

/// URI-encode a path segment per RFC 3986.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ In-memory fake ============

/// In-memory [`RemoteRepository`] with revision checks and fault injection.
#[derive(Default)]
pub struct InMemoryRepository {
    blobs: RwLock<BTreeMap<String, RemoteBlob>>,
    next_rev: AtomicU64,
    unavailable: AtomicBool,
    forced_conflicts: AtomicU32,
    broken_paths: RwLock<HashSet<String>>,
    puts: AtomicU32,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store content directly, bypassing revision checks.
    pub fn insert(&self, path: &str, content: &str) {
        let sha = self.next_sha();
        self.blobs.write().unwrap().insert(
            path.to_string(),
            RemoteBlob {
                content: content.to_string(),
                sha,
            },
        );
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.blobs
            .read()
            .unwrap()
            .get(path)
            .map(|b| b.content.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.blobs.read().unwrap().keys().cloned().collect()
    }

    /// Make every call fail as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject the next `n` writes with a conflict.
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make reads of `path` fail.
    pub fn break_path(&self, path: &str) {
        self.broken_paths.write().unwrap().insert(path.to_string());
    }

    /// Number of write attempts received.
    pub fn put_attempts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    fn next_sha(&self) -> String {
        format!("rev{}", self.next_rev.fetch_add(1, Ordering::SeqCst))
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for InMemoryRepository {
    async fn tree(&self, _git_ref: &str) -> Result<Vec<TreeEntry>, RemoteError> {
        self.check_available()?;
        let blobs = self.blobs.read().unwrap();
        let mut dirs: BTreeMap<String, ()> = BTreeMap::new();
        for path in blobs.keys() {
            let mut prefix = String::new();
            let parts: Vec<&str> = path.split('/').collect();
            for part in &parts[..parts.len().saturating_sub(1)] {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                dirs.insert(prefix.clone(), ());
            }
        }
        let mut entries: Vec<TreeEntry> = dirs
            .into_keys()
            .map(|path| TreeEntry {
                path,
                kind: "tree".to_string(),
            })
            .chain(blobs.keys().map(|path| TreeEntry {
                path: path.clone(),
                kind: "blob".to_string(),
            }))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get_content(&self, path: &str) -> Result<Option<RemoteBlob>, RemoteError> {
        self.check_available()?;
        if self.broken_paths.read().unwrap().contains(path) {
            return Err(RemoteError::Http {
                status: 500,
                body: format!("cannot read {}", path),
            });
        }
        Ok(self.blobs.read().unwrap().get(path).cloned())
    }

    async fn put_content(&self, path: &str, request: &PutRequest) -> Result<(), RemoteError> {
        self.check_available()?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(RemoteError::Conflict(path.to_string()));
        }

        let mut blobs = self.blobs.write().unwrap();
        let current = blobs.get(path).map(|b| b.sha.as_str());
        if current != request.sha.as_deref() {
            return Err(RemoteError::Conflict(path.to_string()));
        }
        let sha = self.next_sha();
        blobs.insert(
            path.to_string(),
            RemoteBlob {
                content: request.content.clone(),
                sha,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip_utf8() {
        let text = "{\"title\":\"Previsione sull'economia – €\"}";
        let encoded = encode_content(text);
        assert_eq!(decode_content(&encoded).unwrap(), text);
    }

    #[test]
    fn test_decode_wrapped_base64() {
        let encoded = encode_content(&"x".repeat(100));
        let wrapped = format!("{}\n{}\n", &encoded[..60], &encoded[60..]);
        assert_eq!(decode_content(&wrapped).unwrap(), "x".repeat(100));
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("pred_a b.json"), "pred_a%20b.json");
        assert_eq!(uri_encode("Q1"), "Q1");
    }

    #[tokio::test]
    async fn test_in_memory_revision_checks() {
        let repo = InMemoryRepository::new();
        let create = PutRequest {
            message: "add".into(),
            content: "v1".into(),
            sha: None,
        };
        repo.put_content("a/b.json", &create).await.unwrap();

        // Blind create over an existing object conflicts.
        let err = repo.put_content("a/b.json", &create).await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict(_)));

        let current = repo.get_content("a/b.json").await.unwrap().unwrap();
        let update = PutRequest {
            message: "update".into(),
            content: "v2".into(),
            sha: Some(current.sha),
        };
        repo.put_content("a/b.json", &update).await.unwrap();
        assert_eq!(repo.content("a/b.json").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_in_memory_tree_lists_dirs_and_blobs() {
        let repo = InMemoryRepository::new();
        repo.insert("data/predictions/en/ai/2026/Q1/pred_1_1.json", "{}");
        let tree = repo.tree("main").await.unwrap();
        let blobs: Vec<_> = tree.iter().filter(|e| e.is_blob()).collect();
        assert_eq!(blobs.len(), 1);
        assert!(tree
            .iter()
            .any(|e| e.path == "data/predictions/en" && e.kind == "tree"));
    }

    #[tokio::test]
    async fn test_in_memory_fault_injection() {
        let repo = InMemoryRepository::new();
        repo.insert("x.json", "{}");
        repo.break_path("x.json");
        assert!(repo.get_content("x.json").await.is_err());

        repo.set_unavailable(true);
        assert!(repo.tree("main").await.is_err());
    }
}
