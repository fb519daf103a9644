//! GitHub contents client against a local HTTP fake of the contents API.
//!
//! The fake implements the three calls the store uses (recursive tree,
//! content read, conditional content write) with real revision checks, and
//! can be told to reject the next few writes with 409.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

use capsule_store::blob::RemoteWrite;
use capsule_store::config::parse_config;
use capsule_store::loader::{self, LoadSource};
use capsule_store::remote::{
    decode_content, encode_content, GitHubContentsClient, PutRequest, RemoteError,
    RemoteRepository,
};
use capsule_store::save::{self, parse_prediction};
use capsule_store::StorageContext;

const TOKEN: &str = "test-token";
const REPO: &str = "acme/capsules";

// ─── Fake contents API ──────────────────────────────────────────────

#[derive(Default)]
struct FakeApi {
    files: Mutex<BTreeMap<String, (String, String)>>,
    next_sha: AtomicU64,
    reject_puts: AtomicU32,
}

impl FakeApi {
    fn insert(&self, path: &str, content: &str) {
        let sha = format!("sha{}", self.next_sha.fetch_add(1, Ordering::SeqCst));
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (content.to_string(), sha));
    }

    fn content(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).map(|(c, _)| c.clone())
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("token {}", TOKEN))
}

async fn handle_tree(
    State(api): State<Arc<FakeApi>>,
    headers: HeaderMap,
    Path((_owner, _name, _git_ref)): Path<(String, String, String)>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Bad credentials").into_response();
    }
    let files = api.files.lock().unwrap();
    let mut tree = vec![json!({ "path": "data", "type": "tree" })];
    for path in files.keys() {
        tree.push(json!({ "path": path, "type": "blob" }));
    }
    Json(json!({ "sha": "root", "tree": tree, "truncated": false })).into_response()
}

async fn handle_get(
    State(api): State<Arc<FakeApi>>,
    headers: HeaderMap,
    Path((_owner, _name, path)): Path<(String, String, String)>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Bad credentials").into_response();
    }
    let files = api.files.lock().unwrap();
    match files.get(&path) {
        Some((content, sha)) => {
            // Wrapped at 60 columns like the real API.
            let encoded = encode_content(content);
            let wrapped = encoded
                .as_bytes()
                .chunks(60)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect::<Vec<_>>()
                .join("\n");
            Json(json!({ "content": wrapped, "sha": sha, "encoding": "base64" })).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

#[derive(Deserialize)]
struct PutBody {
    #[allow(dead_code)]
    message: String,
    content: String,
    sha: Option<String>,
    branch: String,
}

async fn handle_put(
    State(api): State<Arc<FakeApi>>,
    headers: HeaderMap,
    Path((_owner, _name, path)): Path<(String, String, String)>,
    Json(body): Json<PutBody>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Bad credentials").into_response();
    }
    assert_eq!(body.branch, "main");

    if api
        .reject_puts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::CONFLICT, "is at a different sha").into_response();
    }

    let current = api
        .files
        .lock()
        .unwrap()
        .get(&path)
        .map(|(_, sha)| sha.clone());
    match (current, body.sha) {
        (Some(current), Some(given)) if current != given => {
            return (StatusCode::CONFLICT, "is at a different sha").into_response();
        }
        (Some(_), None) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, "\"sha\" wasn't supplied").into_response();
        }
        _ => {}
    }

    let content = match decode_content(&body.content) {
        Ok(content) => content,
        Err(_) => return (StatusCode::BAD_REQUEST, "bad base64").into_response(),
    };
    api.insert(&path, &content);
    (StatusCode::CREATED, Json(json!({ "content": { "path": path } }))).into_response()
}

async fn spawn_fake(api: Arc<FakeApi>) -> String {
    let app = Router::new()
        .route("/repos/{owner}/{name}/git/trees/{git_ref}", get(handle_tree))
        .route(
            "/repos/{owner}/{name}/contents/{*path}",
            get(handle_get).put(handle_put),
        )
        .with_state(api);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base: &str, token: &str) -> GitHubContentsClient {
    GitHubContentsClient::new(base, REPO, token, "main", Duration::from_secs(5)).unwrap()
}

fn record_json(id: &str) -> String {
    format!(
        r#"{{"id":"{}","created":1771000000000,"author":"ada","language":"it",
            "category":"crypto","revealDate":1771113600000,"title":"Rally","tags":["btc"]}}"#,
        id
    )
}

async fn context_against(base: &str, tmp: &TempDir) -> StorageContext {
    let config = parse_config(&format!(
        r#"
[store]
path = "{}/capsule.sqlite"

[remote]
repo = "{}"
token = "{}"
api_base = "{}"
max_conflict_retries = 2
"#,
        tmp.path().display(),
        REPO,
        TOKEN,
        base
    ))
    .unwrap();
    StorageContext::from_config(config).await.unwrap()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tree_and_content_reads() {
    let api = Arc::new(FakeApi::default());
    api.insert("data/predictions/it/crypto/2026/Q1/pred_a_1.json", &record_json("a"));
    let base = spawn_fake(api.clone()).await;
    let remote = client(&base, TOKEN);

    let tree = remote.tree("main").await.unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.iter().filter(|e| e.is_blob()).count(), 1);

    let blob = remote
        .get_content("data/predictions/it/crypto/2026/Q1/pred_a_1.json")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob.content, record_json("a"));
    assert_eq!(blob.sha, "sha0");

    assert!(remote.get_content("data/missing.json").await.unwrap().is_none());
}

#[tokio::test]
async fn test_conditional_write() {
    let api = Arc::new(FakeApi::default());
    let base = spawn_fake(api.clone()).await;
    let remote = client(&base, TOKEN);
    let path = "data/predictions/en/ai/2026/Q2/pred_b_2.json";

    let create = PutRequest {
        message: "Add prediction: b".into(),
        content: "{\"v\":1}".into(),
        sha: None,
    };
    remote.put_content(path, &create).await.unwrap();
    let first = remote.get_content(path).await.unwrap().unwrap();

    let stale = PutRequest {
        content: "{\"v\":2}".into(),
        sha: Some("not-the-sha".into()),
        ..create.clone()
    };
    assert!(matches!(
        remote.put_content(path, &stale).await,
        Err(RemoteError::Conflict(_))
    ));

    let fresh = PutRequest {
        sha: Some(first.sha),
        ..stale
    };
    remote.put_content(path, &fresh).await.unwrap();
    assert_eq!(api.content(path).unwrap(), "{\"v\":2}");
}

#[tokio::test]
async fn test_bad_token_is_an_http_error() {
    let api = Arc::new(FakeApi::default());
    let base = spawn_fake(api).await;
    let remote = client(&base, "wrong");

    match remote.tree("main").await {
        Err(RemoteError::Http { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected HTTP 401, got {:?}", other.map(|t| t.len())),
    }
}

#[tokio::test]
async fn test_save_retries_conflict_then_loads_from_remote() {
    let api = Arc::new(FakeApi::default());
    let base = spawn_fake(api.clone()).await;
    api.reject_puts.store(1, Ordering::SeqCst);

    let tmp = TempDir::new().unwrap();
    let ctx = context_against(&base, &tmp).await;
    let outcome = save::save_prediction(&ctx, parse_prediction(&record_json("p1")).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.remote, RemoteWrite::Written { attempts: 2 });
    assert_eq!(
        outcome.path,
        "data/predictions/it/crypto/2026/Q1/pred_p1_1771000000000.json"
    );
    assert!(api.content(&outcome.path).is_some());

    // A fresh local store sees the record through the remote tier.
    let other = TempDir::new().unwrap();
    let ctx = context_against(&base, &other).await;
    let (records, source) = loader::load_all_predictions_with_source(&ctx).await;
    assert_eq!(source, LoadSource::Remote);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "p1");
    assert!(save::load_prediction(&ctx, "p1").await.is_some());
}

#[tokio::test]
async fn test_exhausted_retries_keep_local_write() {
    let api = Arc::new(FakeApi::default());
    let base = spawn_fake(api.clone()).await;
    api.reject_puts.store(10, Ordering::SeqCst);

    let tmp = TempDir::new().unwrap();
    let ctx = context_against(&base, &tmp).await;
    let outcome = save::save_prediction(&ctx, parse_prediction(&record_json("p2")).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.remote, RemoteWrite::ConflictUnresolved { attempts: 3 });
    assert!(api.content(&outcome.path).is_none());
    assert!(save::load_prediction(&ctx, "p2").await.is_some());
}
