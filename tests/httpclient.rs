use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use httpmock::prelude::*;
use tokio_util::sync::CancellationToken;

use hyperfleet_adapter::httpclient::{
    find_api_error, retryable_status, BackoffStrategy, ClientConfig, Method, RequestOptions,
    RetryingClient,
};

fn quick_client(base_url: String) -> RetryingClient {
    let mut config = ClientConfig::new(base_url);
    config.retry_attempts = 3;
    config.base_delay = Duration::from_millis(10);
    config.max_delay = Duration::from_millis(100);
    RetryingClient::new(config).unwrap()
}

// Spins an axum server that fails `failures` times with 503, then 200.
async fn flaky_server(failures: u32) -> (SocketAddr, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let state = Arc::clone(&hits);
    let app = Router::new().route(
        "/flaky",
        get(
            move |State(hits): State<Arc<AtomicU32>>| async move {
                let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    (StatusCode::SERVICE_UNAVAILABLE, "not yet")
                } else {
                    (StatusCode::OK, "ok")
                }
            },
        ),
    )
    .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

#[tokio::test]
async fn retries_on_503_then_succeeds() {
    let (addr, hits) = flaky_server(2).await;
    let client = quick_client(format!("http://{addr}"));

    let started = Instant::now();
    let response = client.get("/flaky", RequestOptions::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status, 200);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // Exponential 10ms base: ~10ms + ~20ms of sleep (±10% jitter), plus
    // scheduling slack.
    assert!(elapsed >= Duration::from_millis(25), "slept {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn exhausts_attempts_on_persistent_server_error() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/down");
            then.status(503).body("nope");
        })
        .await;

    let client = quick_client(server.base_url());
    let err = client.get("/down", RequestOptions::new()).await.unwrap_err();

    assert_eq!(mock.hits_async().await, 3);
    assert_eq!(err.attempts, 3);
    assert!(err.is_server_error());
    assert!(err.is_retryable());
    assert_eq!(err.status_code, Some(503));
    assert_eq!(err.body.as_deref(), Some("nope"));
}

#[tokio::test]
async fn client_errors_do_not_retry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/bad");
            then.status(400).body("bad request");
        })
        .await;

    let client = quick_client(server.base_url());
    let err = client.get("/bad", RequestOptions::new()).await.unwrap_err();

    assert_eq!(mock.hits_async().await, 1);
    assert_eq!(err.attempts, 1);
    assert!(err.is_bad_request());
    assert!(err.is_client_error());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn status_predicates_classify() {
    let server = MockServer::start_async().await;
    for (path, status) in [
        ("/missing", 404),
        ("/denied", 401),
        ("/forbidden", 403),
        ("/conflict", 409),
    ] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(status);
            })
            .await;
    }

    let client = quick_client(server.base_url());
    let err = client
        .get("/missing", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let err = client
        .get("/denied", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    let err = client
        .get("/forbidden", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    let err = client
        .get("/conflict", RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn default_headers_are_applied() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/payload")
                .header("content-type", "application/json")
                .header_exists("user-agent")
                .header_exists("traceparent");
            then.status(200);
        })
        .await;

    let client = quick_client(server.base_url());
    client
        .post(
            "/payload",
            RequestOptions::new().with_json(serde_json::json!({"k": "v"})),
        )
        .await
        .unwrap();
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn caller_can_override_user_agent() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/agent")
                .header("user-agent", "custom-agent/9");
            then.status(200);
        })
        .await;

    let mut config = ClientConfig::new(server.base_url());
    config.user_agent = Some("custom-agent/9".to_string());
    let client = RetryingClient::new(config).unwrap();
    client.get("/agent", RequestOptions::new()).await.unwrap();
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn cancellation_preempts_attempts() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/never");
            then.status(200);
        })
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let client = quick_client(server.base_url());
    let err = client
        .get("/never", RequestOptions::new().with_cancellation(cancel))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.attempts, 0);
    assert_eq!(mock.hits_async().await, 0);
}

#[tokio::test]
async fn cancellation_during_backoff_sleep() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slowfail");
            then.status(503);
        })
        .await;

    let mut config = ClientConfig::new(server.base_url());
    config.retry_attempts = 5;
    config.base_delay = Duration::from_secs(5);
    config.max_delay = Duration::from_secs(5);
    let client = RetryingClient::new(config).unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = client
        .get("/slowfail", RequestOptions::new().with_cancellation(cancel))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(err.attempts, 1);
}

#[tokio::test]
async fn zero_attempts_normalizes_to_one() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/once");
            then.status(503);
        })
        .await;

    let client = quick_client(server.base_url());
    let err = client
        .get("/once", RequestOptions::new().with_retry_attempts(0))
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn per_request_overrides_win() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/twice");
            then.status(500);
        })
        .await;

    let client = quick_client(server.base_url());
    let err = client
        .get("/twice", RequestOptions::new().with_retry_attempts(2))
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 2);
    assert_eq!(mock.hits_async().await, 2);
}

#[test]
fn retry_policy_covers_exactly_the_spec_codes() {
    assert!(retryable_status(408));
    assert!(retryable_status(429));
    assert!(retryable_status(500));
    assert!(retryable_status(503));
    assert!(retryable_status(599));
    for code in [200, 201, 301, 304, 400, 401, 403, 404, 409, 410] {
        assert!(!retryable_status(code), "{code} must not retry");
    }
}

#[test]
fn api_errors_unwrap_through_chains() {
    #[derive(Debug, thiserror::Error)]
    #[error("outer: {0}")]
    struct Outer(#[source] hyperfleet_adapter::httpclient::ApiError);

    let api = make_api_error();
    let outer = Outer(api);
    let found = find_api_error(&outer).expect("chained ApiError found");
    assert_eq!(found.status_code, Some(503));
}

fn make_api_error() -> hyperfleet_adapter::httpclient::ApiError {
    // Round-trip through a real client against a mock to obtain a fully
    // populated ApiError without constructing private fields.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/err");
                then.status(503);
            })
            .await;
        let mut config = ClientConfig::new(server.base_url());
        config.retry_attempts = 1;
        config.base_delay = Duration::from_millis(1);
        RetryingClient::new(config)
            .unwrap()
            .request(Method::GET, "/err", RequestOptions::new())
            .await
            .unwrap_err()
    })
}

#[test]
fn backoff_strategies_grow_as_specified() {
    let base = Duration::from_millis(10);
    assert_eq!(
        BackoffStrategy::Exponential.delay(base, 1),
        Duration::from_millis(10)
    );
    assert_eq!(
        BackoffStrategy::Exponential.delay(base, 4),
        Duration::from_millis(80)
    );
    assert_eq!(
        BackoffStrategy::Linear.delay(base, 4),
        Duration::from_millis(40)
    );
    assert_eq!(
        BackoffStrategy::Constant.delay(base, 4),
        Duration::from_millis(10)
    );
}
