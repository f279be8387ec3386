//! End-to-end reliability behavior over a mock HTTP backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use llmc_backend::{
    BackendError, CapacityLimiter, CircuitBreaker, CostTracker, GenerateBackend, GenerateParams,
    LocalHttpBackend, ReliableBackend, RetryPolicy, TokenPricing,
};

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: Duration::ZERO,
    }
}

fn wrap(
    server: &MockServer,
    attempts: u32,
    breaker: CircuitBreaker,
    cost: CostTracker,
) -> ReliableBackend {
    let inner = LocalHttpBackend::new(
        "local_small",
        server.uri(),
        "test-model",
        Duration::from_secs(5),
    )
    .unwrap();
    ReliableBackend::new(
        Arc::new(inner),
        CapacityLimiter::new(10_000, 10_000_000),
        breaker,
        cost,
        TokenPricing::default(),
        fast_retry(attempts),
        CancellationToken::new(),
    )
}

/// Responds 500 a fixed number of times, then succeeds.
struct FlakyResponder {
    failures: AtomicUsize,
    fail_first: usize,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.failures.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            ResponseTemplate::new(500).set_body_string("transient")
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "{\"ok\": true}",
                "prompt_eval_count": 10,
                "eval_count": 5
            }))
        }
    }
}

#[tokio::test]
async fn test_retries_recover_from_transient_5xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(FlakyResponder {
            failures: AtomicUsize::new(0),
            fail_first: 2,
        })
        .mount(&server)
        .await;

    let backend = wrap(
        &server,
        5,
        CircuitBreaker::new("local_small"),
        CostTracker::new("local_small", 0.0, 0.0),
    );
    let output = backend
        .generate("prompt", &GenerateParams::default())
        .await
        .unwrap();
    assert!(output.text.contains("ok"));
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures_and_probes() {
    let server = MockServer::start().await;
    let responder = FlakyResponder {
        failures: AtomicUsize::new(0),
        fail_first: 5,
    };
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(responder)
        .mount(&server)
        .await;

    // Short open window so the probe phase is testable.
    let breaker = CircuitBreaker::with_policy("local_small", 5, Duration::from_millis(50));
    let backend = wrap(&server, 1, breaker, CostTracker::new("local_small", 0.0, 0.0));

    // Five consecutive failures open the circuit.
    for _ in 0..5 {
        let err = backend
            .generate("prompt", &GenerateParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "http_5xx");
    }
    assert!(backend.breaker().is_open());

    // The sixth call is rejected without reaching the server.
    let requests_before = server.received_requests().await.unwrap().len();
    let err = backend
        .generate("prompt", &GenerateParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::CircuitOpen { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), requests_before);

    // After the open window, a single probe goes through and succeeds,
    // closing the circuit for subsequent calls.
    tokio::time::sleep(Duration::from_millis(60)).await;
    backend
        .generate("prompt", &GenerateParams::default())
        .await
        .unwrap();
    assert!(!backend.breaker().is_open());
    backend
        .generate("prompt", &GenerateParams::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_budget_rejects_before_issuing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "text",
            "prompt_eval_count": 10,
            "eval_count": 5
        })))
        .mount(&server)
        .await;

    let inner = LocalHttpBackend::new(
        "remote_premium",
        server.uri(),
        "expensive-model",
        Duration::from_secs(5),
    )
    .unwrap();
    let cost = CostTracker::new("remote_premium", 0.001, 0.0);
    let backend = ReliableBackend::new(
        Arc::new(inner),
        CapacityLimiter::new(10_000, 10_000_000),
        CircuitBreaker::new("remote_premium"),
        cost,
        TokenPricing {
            milli_per_1k_in: 1_000_000, // absurd price: any call busts the cap
            milli_per_1k_out: 1_000_000,
        },
        fast_retry(1),
        CancellationToken::new(),
    );

    let err = backend
        .generate("prompt", &GenerateParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::BudgetExceeded { .. }));
    // Checked BEFORE issuing: the server saw nothing.
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fatal_4xx_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
        .mount(&server)
        .await;

    let backend = wrap(
        &server,
        5,
        CircuitBreaker::new("local_small"),
        CostTracker::new("local_small", 0.0, 0.0),
    );
    let err = backend
        .generate("prompt", &GenerateParams::default())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancellation_aborts_cleanly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(serde_json::json!({"response": "late"})),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let inner = LocalHttpBackend::new(
        "local_small",
        server.uri(),
        "test-model",
        Duration::from_secs(60),
    )
    .unwrap();
    let backend = ReliableBackend::new(
        Arc::new(inner),
        CapacityLimiter::new(10_000, 10_000_000),
        CircuitBreaker::new("local_small"),
        CostTracker::new("local_small", 0.0, 0.0),
        TokenPricing::default(),
        fast_retry(5),
        cancel.clone(),
    );

    let handle = tokio::spawn(async move {
        backend
            .generate("prompt", &GenerateParams::default())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, BackendError::Cancelled));
}
