// tests/postgrest_store.rs
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feed_scheduler::error::StoreError;
use feed_scheduler::store::{Collection, Filter, PostgrestStore, TableStore, FEED_ITEM_KEY};

fn store(server: &MockServer) -> PostgrestStore {
    PostgrestStore::new(&server.uri(), "service-key", Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn select_sends_auth_and_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/feeds"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .and(query_param("active", "eq.true"))
        .and(query_param("select", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "f1", "url": "https://a.test/rss", "name": "A", "active": true }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = store(&server)
        .select(Collection::Feeds, &Filter::eq("active", true), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!("f1"));
}

#[tokio::test]
async fn upsert_merges_on_conflict_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/feed_items"))
        .and(query_param("on_conflict", "feed_id,link"))
        .and(body_json(json!([{ "feed_id": "f1", "link": "https://a.test/1" }])))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let row = json!({ "feed_id": "f1", "link": "https://a.test/1" })
        .as_object()
        .cloned()
        .unwrap();
    let n = store(&server)
        .upsert(Collection::FeedItems, vec![row], FEED_ITEM_KEY)
        .await
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn delete_reports_content_range_count() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/feed_processing_logs"))
        .and(query_param("created_at", "lt.2025-01-01T00:00:00+00:00"))
        .respond_with(ResponseTemplate::new(204).insert_header("content-range", "*/17"))
        .mount(&server)
        .await;

    let n = store(&server)
        .delete(
            Collection::ProcessingLogs,
            &Filter::lt("created_at", "2025-01-01T00:00:00+00:00"),
        )
        .await
        .unwrap();
    assert_eq!(n, 17);
}

#[tokio::test]
async fn error_status_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/batch_processing_logs"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = store(&server)
        .insert(Collection::BatchLogs, serde_json::Map::new())
        .await
        .unwrap_err();
    match err {
        StoreError::Status { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected error: {other}"),
    }
}
