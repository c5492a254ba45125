// tests/http_backend.rs
use std::collections::HashMap;

use feed_curator::config::{EndpointSettings, Secret};
use feed_curator::error::CuratorError;
use feed_curator::ingest::normalize_item;
use feed_curator::ingest::types::{Article, RawItem};
use feed_curator::profile::injector::ScoringContext;
use feed_curator::scoring::http::HttpScoringBackend;
use feed_curator::scoring::{BackendError, BackendKind, ScoringBackend};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn articles(n: usize) -> Vec<Article> {
    (0..n)
        .map(|i| {
            normalize_item(RawItem {
                title: format!("Headline {i}"),
                url: format!("https://desk.test/{i}"),
                source: "Desk".into(),
                summary: Some("x".repeat(900)),
                published_at: None,
            })
            .unwrap()
        })
        .collect()
}

fn endpoint(server: &MockServer) -> EndpointSettings {
    EndpointSettings {
        url: format!("{}/score", server.uri()),
        model: "m1".into(),
        api_key_env: "CURATOR_API_KEY".into(),
    }
}

fn backend(server: &MockServer, kind: BackendKind, batch_size: usize) -> HttpScoringBackend {
    HttpScoringBackend::new(kind, &endpoint(server), Secret::new("sk-test"), batch_size, 2)
}

#[tokio::test]
async fn scores_are_parsed_and_clamped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "m1", "tier": "primary" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scores": [
                { "index": 0, "score": 7.5, "category": " Fiscal ", "rationale": "deficit math" },
                { "index": 1, "score": 14.0 },
                { "index": 2, "quality": 8.0, "challenge": 6.0, "contrarian": 5.0 },
                { "index": 9, "score": 3.0 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let b = backend(&server, BackendKind::PrimaryAi, 50);
    assert_eq!(b.name(), "primary_ai:m1");
    let mut scores = b.score(&articles(3), &ScoringContext::default()).await.unwrap();
    scores.sort_by_key(|s| s.index);

    assert_eq!(scores.len(), 3);
    assert_eq!(scores[0].score, 7.5);
    assert_eq!(scores[0].category.as_deref(), Some("fiscal"));
    assert_eq!(scores[0].rationale.as_deref(), Some("deficit math"));
    assert_eq!(scores[1].score, 10.0);
    // 8·0.5 + 6·0.3 + 5·0.2
    assert!((scores[2].score - 6.8).abs() < 1e-9);
    assert!(scores[2].dimensions.is_some());
}

#[tokio::test]
async fn large_batches_are_chunked_with_offsets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scores": [ { "index": 0, "score": 5.0 }, { "index": 1, "score": 6.0 } ]
        })))
        .expect(3)
        .mount(&server)
        .await;

    let b = backend(&server, BackendKind::PrimaryAi, 2);
    let scores = b.score(&articles(5), &ScoringContext::default()).await.unwrap();
    let mut idx: Vec<usize> = scores.iter().map(|s| s.index).collect();
    idx.sort_unstable();
    assert_eq!(idx, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn status_codes_map_to_backend_errors() {
    for (status, check) in [
        (401u16, (|e: &BackendError| matches!(e, BackendError::Auth(_))) as fn(&BackendError) -> bool),
        (403, |e| matches!(e, BackendError::Auth(_))),
        (429, |e| matches!(e, BackendError::RateLimited)),
        (503, |e| matches!(e, BackendError::Unavailable(_))),
        (400, |e| matches!(e, BackendError::Malformed(_))),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        let err = backend(&server, BackendKind::PrimaryAi, 50)
            .score(&articles(1), &ScoringContext::default())
            .await
            .unwrap_err();
        assert!(check(&err), "status {status} mapped to {err:?}");
    }
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;
    let err = backend(&server, BackendKind::SecondaryAi, 50)
        .score(&articles(2), &ScoringContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Malformed(_)));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn secondary_tier_is_announced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "tier": "secondary" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "scores": [] })))
        .expect(1)
        .mount(&server)
        .await;
    let scores = backend(&server, BackendKind::SecondaryAi, 50)
        .score(&articles(1), &ScoringContext::default())
        .await
        .unwrap();
    assert!(scores.is_empty());
}

#[tokio::test]
async fn secondary_dimensions_override_the_raw_score() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scores": [
                { "index": 0, "score": 9.5, "quality": 4.0, "challenge": 2.0, "contrarian": 1.0 },
                { "index": 1, "score": 3.0 }
            ]
        })))
        .mount(&server)
        .await;
    let mut scores = backend(&server, BackendKind::SecondaryAi, 50)
        .score(&articles(2), &ScoringContext::default())
        .await
        .unwrap();
    scores.sort_by_key(|s| s.index);

    // 4·0.5 + 2·0.3 + 1·0.2
    assert!((scores[0].score - 2.8).abs() < 1e-9);
    assert_eq!(scores[1].score, 3.0);
}

#[test]
fn missing_credential_is_a_config_error() {
    let ep = EndpointSettings {
        url: "http://localhost:9/score".into(),
        model: "m1".into(),
        api_key_env: "NOPE_KEY".into(),
    };
    let creds: HashMap<String, String> = HashMap::new();
    let err = HttpScoringBackend::from_settings(BackendKind::PrimaryAi, &ep, &creds, 10, 1)
        .err()
        .unwrap();
    assert!(matches!(err, CuratorError::Config(_)));
}
