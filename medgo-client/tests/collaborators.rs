//! Path replay, upload listing and next-action suggestions against a mock
//! backend.

use medgo_client::{BackendClient, NextActionSource, ReplayQuery, TransportError};
use medgo_core::config::{BackendConfig, PollerConfig};
use medgo_core::models::{Role, UploadStatus, UpstreamMessage};
use medgo_core::path::build_dag;
use medgo_core::poller::{ResourcePoller, StopReason, UploadQuery, UploadSource};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> BackendClient {
    BackendClient::with_base_url(BackendConfig::default(), server.uri()).unwrap()
}

// ===========================================================================
// Path replay
// ===========================================================================
#[tokio::test]
async fn test_path_replay_sends_query_and_normalizes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/langgraph/path"))
        .and(query_param("turn_id", "t-9"))
        .and(query_param("session_id", "s-1"))
        .and(query_param("max_lines", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "turn_id": "t-9",
            "count": 4,
            "events": [
                {"node": "router", "edge": "on_chain_start", "timestamp": "2024-05-01T10:00:01Z"},
                {"node": "context_build", "edge": "on_chain_start", "ts": "2024-05-01T10:00:02Z"},
                {"node": "router", "edge": "on_chain_start", "ts": "2024-05-01T10:00:03Z"},
                42
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = ReplayQuery {
        session_id: Some("s-1".to_string()),
        max_lines: Some(200),
        ..ReplayQuery::new("t-9")
    };
    let replay = client(&server).path_replay(&query).await.unwrap();

    assert_eq!(replay.turn_id.as_deref(), Some("t-9"));
    assert_eq!(replay.count, 4);
    assert_eq!(replay.events.len(), 3);

    let dag = build_dag(&replay.events);
    assert_eq!(dag.chain(), vec!["router", "context_build"]);
    assert_eq!(dag.edges.len(), 2);
}

#[tokio::test]
async fn test_path_replay_rejects_non_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&server)
        .await;

    let err = client(&server)
        .path_replay(&ReplayQuery::new("t"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));
}

// ===========================================================================
// Uploads
// ===========================================================================
#[tokio::test]
async fn test_uploads_accepts_both_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/knowledge/documents"))
        .and(query_param("user_id", "u-1"))
        .and(query_param("limit", "50"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "status": "indexing"}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/knowledge/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"upload_id": "a", "status": "indexed", "original_filename": "labs.pdf"}],
            "total": 1
        })))
        .mount(&server)
        .await;

    let backend = client(&server);
    let query = UploadQuery::new("u-1", 50);
    let first = backend.fetch_uploads(&query).await.unwrap();
    assert_eq!(first.items[0].status, UploadStatus::Indexing);

    let second = backend.fetch_uploads(&query).await.unwrap();
    assert_eq!(second.items[0].original_filename.as_deref(), Some("labs.pdf"));
    assert_eq!(second.total, Some(1));
}

#[tokio::test]
async fn test_upload_errors_keep_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_uploads(&UploadQuery::new("ghost", 50))
        .await
        .unwrap_err();
    assert_eq!(err.status, Some(404));
    assert!(err.message.contains("no such user"));
}

#[tokio::test]
async fn test_poller_over_http_stops_when_indexed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "status": "indexing"}
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "status": "indexed"}
        ])))
        .mount(&server)
        .await;

    let config = PollerConfig {
        fast_interval_ms: 20,
        ..PollerConfig::default()
    };
    let poller = ResourcePoller::new(
        Arc::new(client(&server)),
        UploadQuery::new("u-1", 50),
        config,
        "u-1",
    );
    assert_eq!(poller.run().await, StopReason::AllTerminal);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

// ===========================================================================
// Next actions
// ===========================================================================
#[tokio::test]
async fn test_next_actions_posts_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/next_actions"))
        .and(body_partial_json(json!({
            "messages": [{"role": "user", "content": "Headache for 3 days"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "actions": ["Ask about fever", "Check blood pressure"]
        })))
        .mount(&server)
        .await;

    let history = vec![UpstreamMessage {
        role: Role::User,
        content: "Headache for 3 days".to_string(),
    }];
    let actions = client(&server).next_actions(&history).await.unwrap();
    assert_eq!(actions, vec!["Ask about fever", "Check blood pressure"]);
}
