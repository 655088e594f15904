use std::sync::Arc;
use std::time::Duration;

use headlines_resilience::{BreakerState, CircuitBreaker};
use headlines_server::profanity::VerdictSource;
use headlines_server::{FallbackPolicy, ProfanityClient, ProfanityConfig, ProfanityError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(base_url: &str, fallback: FallbackPolicy) -> ProfanityConfig {
    ProfanityConfig {
        base_url: base_url.to_string(),
        timeout_ms: 500,
        max_retries: 3,
        backoff_base_ms: 1,
        failure_threshold: 3,
        cool_down_secs: 60,
        half_open_probes: 1,
        fallback,
        fallback_words: "bad,ugly".into(),
    }
}

fn client(cfg: &ProfanityConfig) -> ProfanityClient {
    let breaker = Arc::new(CircuitBreaker::new("profanity", cfg.breaker_config()));
    ProfanityClient::new(cfg, breaker).expect("client")
}

async fn failing_service(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profanity/check"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

async fn received(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

#[tokio::test]
async fn service_verdict_is_used_and_words_are_learned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profanity/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contains": true,
            "words": ["Heck"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server.uri(), FallbackPolicy::LocalList);
    let client = client(&cfg);

    let verdict = client.check("what the heck").await.unwrap();
    assert!(verdict.contains);
    assert_eq!(verdict.source, VerdictSource::Service);
    assert_eq!(verdict.words, vec!["Heck"]);

    // Seed words are kept; service hits are added lowercased.
    assert_eq!(client.known_words(), vec!["bad", "heck", "ugly"]);
}

#[tokio::test]
async fn unavailable_service_opens_breaker_and_uses_local_list() {
    let server = failing_service(503).await;
    let cfg = config(&server.uri(), FallbackPolicy::LocalList);
    let client = client(&cfg);

    // Third consecutive failure opens the circuit before the last retry.
    let verdict = client.check("this is BAD news").await.unwrap();
    assert_eq!(verdict.source, VerdictSource::LocalList);
    assert!(verdict.contains);
    assert_eq!(verdict.words, vec!["BAD"]);
    assert_eq!(received(&server).await, 3);
    assert_eq!(client.breaker().state(), BreakerState::Open);

    // Open circuit: no request leaves the process.
    let verdict = client.check("lovely day").await.unwrap();
    assert_eq!(verdict.source, VerdictSource::LocalList);
    assert!(!verdict.contains);
    assert_eq!(received(&server).await, 3);
}

#[tokio::test]
async fn reject_policy_fails_when_unavailable() {
    let server = failing_service(500).await;
    let cfg = config(&server.uri(), FallbackPolicy::Reject);
    let client = client(&cfg);

    let err = client.check("hello").await.unwrap_err();
    assert!(matches!(err, ProfanityError::Unavailable(_)));
}

#[tokio::test]
async fn allow_policy_passes_text_when_unavailable() {
    let server = failing_service(502).await;
    let cfg = config(&server.uri(), FallbackPolicy::Allow);
    let client = client(&cfg);

    let verdict = client.check("this is bad").await.unwrap();
    assert!(!verdict.contains);
    assert_eq!(verdict.source, VerdictSource::Allowed);
}

#[tokio::test]
async fn client_error_is_not_retried_and_keeps_breaker_closed() {
    let server = failing_service(400).await;
    let cfg = config(&server.uri(), FallbackPolicy::LocalList);
    let client = client(&cfg);

    for _ in 0..5 {
        let err = client.check("hello").await.unwrap_err();
        assert!(matches!(err, ProfanityError::Status(400)));
    }
    assert_eq!(received(&server).await, 5);
    assert_eq!(client.breaker().state(), BreakerState::Closed);
}

#[tokio::test]
async fn slow_service_times_out_per_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profanity/check"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "contains": false, "words": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut cfg = config(&server.uri(), FallbackPolicy::Allow);
    cfg.timeout_ms = 100;
    cfg.max_retries = 1;
    let client = client(&cfg);

    let started = std::time::Instant::now();
    let verdict = client.check("hello").await.unwrap();
    assert_eq!(verdict.source, VerdictSource::Allowed);
    assert!(started.elapsed() < Duration::from_secs(2));
}
