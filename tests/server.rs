use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use rag_harness::config::Config;
use rag_harness::gateway::index::IndexRecord;
use rag_harness::gateway::{
    DisabledGenerator, EchoGenerator, EmbeddingGateway, GenerationGateway, HashEmbedder,
    IndexGateway, MemoryIndex,
};
use rag_harness::models::Neighbor;
use rag_harness::server::{router, AppState};

const DIMS: usize = 32;

/// Index that never answers within the configured timeout.
struct StalledIndex;

#[async_trait]
impl IndexGateway for StalledIndex {
    fn name(&self) -> &str {
        "stalled"
    }
    async fn find_neighbors(&self, _vector: &[f32], _k: usize) -> anyhow::Result<Vec<Neighbor>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

/// Index that fails immediately with a permanent error.
struct BrokenIndex;

#[async_trait]
impl IndexGateway for BrokenIndex {
    fn name(&self) -> &str {
        "broken"
    }
    async fn find_neighbors(&self, _vector: &[f32], _k: usize) -> anyhow::Result<Vec<Neighbor>> {
        anyhow::bail!("index endpoint not found")
    }
}

fn demo_index(embedder: &HashEmbedder) -> MemoryIndex {
    let records = [
        ("ai", "what is ai"),
        ("ml", "machine learning"),
        ("rag", "retrieval augmented generation"),
    ]
    .iter()
    .map(|(id, text)| IndexRecord {
        id: id.to_string(),
        vector: embedder.embed_sync(text),
    })
    .collect();
    MemoryIndex::new(records)
}

async fn spawn_app_with(
    index: Arc<dyn IndexGateway>,
    generator: Arc<dyn GenerationGateway>,
) -> String {
    let mut config = Config::minimal();
    config.index.timeout_secs = 1;
    let state = AppState::with_gateways(
        &config,
        Arc::new(HashEmbedder::new(DIMS)) as Arc<dyn EmbeddingGateway>,
        index,
        generator,
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn spawn_app() -> String {
    let embedder = HashEmbedder::new(DIMS);
    spawn_app_with(
        Arc::new(demo_index(&embedder)),
        Arc::new(EchoGenerator::default()),
    )
    .await
}

fn client() -> Client {
    Client::new()
}

/// Parse the `data:` payloads of an SSE body, skipping comments.
fn sse_payloads(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn health_returns_healthy() {
    let base_url = spawn_app().await;

    let resp = client()
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn search_miss_then_hit() {
    let base_url = spawn_app().await;
    let url = format!("{}/search", base_url);

    let first: serde_json::Value = client()
        .get(&url)
        .query(&[("q", "What is AI?"), ("top_k", "2")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["cache_hit"], false);
    assert_eq!(first["results"].as_array().unwrap().len(), 2);
    assert_eq!(first["results"][0]["chunk_id"], "ai");
    assert!(first["latency_ms"].as_f64().unwrap() >= 0.0);

    let resp = client()
        .get(&url)
        .query(&[("q", "what  is ai?"), ("top_k", "2")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let second: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["results"], first["results"]);
}

#[tokio::test]
async fn search_missing_query_is_422() {
    let base_url = spawn_app().await;

    for query in ["", "?q=", "?q=%20%20", "?top_k=3"] {
        let resp = client()
            .get(format!("{}/search{}", base_url, query))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422, "query string {:?}", query);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["type"], "ValidationError");
        assert_eq!(body["error"]["code"], "validation_error");
    }
}

#[tokio::test]
async fn search_bad_top_k_is_422() {
    let base_url = spawn_app().await;

    for top_k in ["0", "-3", "abc", "1000"] {
        let resp = client()
            .get(format!("{}/search", base_url))
            .query(&[("q", "ai"), ("top_k", top_k)])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422, "top_k {:?}", top_k);
    }
}

#[tokio::test]
async fn search_index_failure_is_502() {
    let base_url = spawn_app_with(Arc::new(BrokenIndex), Arc::new(EchoGenerator::default())).await;

    let resp = client()
        .get(format!("{}/search", base_url))
        .query(&[("q", "ai")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "IndexQueryError");
    assert_eq!(body["error"]["retryable"], false);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("index endpoint not found"));
}

#[tokio::test]
async fn search_index_timeout_is_504() {
    let base_url = spawn_app_with(Arc::new(StalledIndex), Arc::new(EchoGenerator::default())).await;

    let resp = client()
        .get(format!("{}/search", base_url))
        .query(&[("q", "ai")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "IndexQueryError");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn summarize_streams_fragments_then_done() {
    let base_url = spawn_app().await;

    let resp = client()
        .post(format!("{}/summarize", base_url))
        .json(&serde_json::json!({ "content": "alpha beta gamma", "cache_hit": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 4);
    assert_eq!(payloads[0]["text"], "alpha");
    assert_eq!(payloads[1]["text"], " beta");
    assert_eq!(payloads[2]["text"], " gamma");

    let done = &payloads[3];
    assert_eq!(done["done"], true);
    assert_eq!(done["cache_hit"], true);
    let ttlt = done["time_to_last_token_ms"].as_f64().unwrap();
    let total = done["total_time_ms"].as_f64().unwrap();
    assert!(ttlt <= total);
}

#[tokio::test]
async fn summarize_max_tokens_limits_fragments() {
    let base_url = spawn_app().await;

    let resp = client()
        .post(format!("{}/summarize", base_url))
        .json(&serde_json::json!({ "content": "a b c d e", "max_tokens": 2 }))
        .send()
        .await
        .unwrap();
    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[2]["cache_hit"], false);
}

#[tokio::test]
async fn summarize_invalid_body_is_422() {
    let base_url = spawn_app().await;

    let bodies = [
        serde_json::json!({}),
        serde_json::json!({ "content": "  " }),
        serde_json::json!({ "content": "x", "max_tokens": 0 }),
        serde_json::json!({ "content": "x", "max_tokens": -5 }),
    ];
    for body in bodies {
        let resp = client()
            .post(format!("{}/summarize", base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422, "body {}", body);
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["error"]["type"], "ValidationError");
    }

    let resp = client()
        .post(format!("{}/summarize", base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
}

#[tokio::test]
async fn summarize_generation_failure_ends_with_error_frame() {
    let embedder = HashEmbedder::new(DIMS);
    let base_url = spawn_app_with(Arc::new(demo_index(&embedder)), Arc::new(DisabledGenerator)).await;

    let resp = client()
        .post(format!("{}/summarize", base_url))
        .json(&serde_json::json!({ "content": "anything" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["error"]["type"], "GenerationError");
    assert_eq!(payloads[0]["error"]["code"], "generation_error");
    assert!(payloads.iter().all(|p| p.get("done").is_none()));
}

#[tokio::test]
async fn cache_clear_and_stats() {
    let base_url = spawn_app().await;

    for _ in 0..3 {
        client()
            .get(format!("{}/search", base_url))
            .query(&[("q", "machine learning")])
            .send()
            .await
            .unwrap();
    }

    let stats: serde_json::Value = client()
        .get(format!("{}/stats", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["count"], 3);
    assert_eq!(stats["cache_misses"], 1);
    assert_eq!(stats["cache_hits"], 2);
    assert_eq!(stats["slo_p95_ms"], 120.0);

    let cleared: serde_json::Value = client()
        .post(format!("{}/cache/clear", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["cleared"], 1);

    let resp: serde_json::Value = client()
        .get(format!("{}/search", base_url))
        .query(&[("q", "machine learning")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["cache_hit"], false);
}
