use http::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokengate::store::{BucketParams, BucketStore, ConsumeOutcome};
use tokengate::{
    AuthenticatedUser, InMemoryStore, ManualClock, RateLimitConfig, RateLimitLayer, RateLimiter,
    RemoteAddr, StoreError,
};
use tower::{Layer, ServiceBuilder, ServiceExt};

const T0: u64 = 1_700_000_000_000;

fn limiter(config: RateLimitConfig) -> (RateLimiter<InMemoryStore>, InMemoryStore) {
    let store = InMemoryStore::new();
    let limiter = RateLimiter::new(config, store.clone()).unwrap().with_clock(ManualClock::new(T0));
    (limiter, store)
}

fn request_from(peer: &str) -> Request<String> {
    let mut req = Request::new(String::new());
    req.extensions_mut().insert(RemoteAddr(peer.parse::<SocketAddr>().unwrap()));
    req
}

#[tokio::test]
async fn admitted_responses_carry_rate_limit_headers() {
    let cfg = RateLimitConfig::builder().capacity(5).refill_rate(1.0).build().unwrap();
    let (limiter, _) = limiter(cfg);
    let svc = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter))
        .service_fn(|_req: Request<String>| async {
            Ok::<_, Infallible>(Response::new(String::from("hello")))
        });

    let resp = svc.oneshot(request_from("10.1.1.1:5000")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body(), "hello");

    let h = resp.headers();
    assert_eq!(h["x-ratelimit-limit"], "5");
    assert_eq!(h["x-ratelimit-remaining"], "4");
    assert_eq!(h["x-ratelimit-reset"], "1700000001");
    assert_eq!(h["x-ratelimit-refillrate"], "1.00");
    assert!(h.get("retry-after").is_none());
}

#[tokio::test]
async fn denial_short_circuits_with_json_429() {
    let cfg = RateLimitConfig::builder().capacity(1).refill_rate(1.67).build().unwrap();
    let (limiter, _) = limiter(cfg);
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let svc = RateLimitLayer::new(limiter).layer(tower::service_fn(move |_req: Request<String>| {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Infallible>(Response::new(String::from("hello"))) }
    }));

    let first = svc.clone().oneshot(request_from("10.1.1.1:5000")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let denied = svc.clone().oneshot(request_from("10.1.1.1:5001")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let h = denied.headers();
    assert_eq!(h["content-type"], "application/json");
    assert_eq!(h["x-ratelimit-remaining"], "0");
    assert_eq!(h["x-ratelimit-refillrate"], "1.67");
    assert_eq!(h["retry-after"], "1");

    let body: serde_json::Value = serde_json::from_str(denied.body()).unwrap();
    assert_eq!(body["error"], "RATE_LIMIT_ERROR");
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["details"]["remaining_tokens"], 0);
    assert_eq!(body["details"]["capacity"], 1);
    assert_eq!(body["details"]["refill_rate"], 1.67);
    // 1000 / 1.67 rounds up to 599ms
    assert_eq!(body["details"]["next_refill"], "2023-11-14T22:13:20.599Z");

    // a different peer has its own bucket
    let other = svc.oneshot(request_from("10.1.1.2:5000")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn authenticated_user_shares_bucket_across_addresses() {
    let cfg = RateLimitConfig::builder().capacity(2).refill_rate(1.0).build().unwrap();
    let (limiter, store) = limiter(cfg);
    let svc = RateLimitLayer::new(limiter).layer(tower::service_fn(|_req: Request<String>| async {
        Ok::<_, Infallible>(Response::new(String::new()))
    }));

    for peer in ["10.0.0.1:1", "10.0.0.2:1", "10.0.0.3:1"] {
        let mut req = request_from(peer);
        req.extensions_mut().insert(AuthenticatedUser("42".into()));
        svc.clone().oneshot(req).await.unwrap();
    }
    assert_eq!(store.get("token_bucket:user:42").unwrap().tokens, 0);
    assert!(store.get("token_bucket:ip:10.0.0.1").is_none());
}

#[tokio::test]
async fn forwarded_for_is_honored_only_when_trusted() {
    let build = |trust: bool| {
        let cfg = RateLimitConfig::builder()
            .capacity(5)
            .refill_rate(1.0)
            .trust_forwarded_headers(trust)
            .build()
            .unwrap();
        limiter(cfg)
    };
    let req = || {
        let mut req = request_from("10.9.9.9:443");
        req.headers_mut().insert("x-forwarded-for", "203.0.113.9, 10.9.9.9".parse().unwrap());
        req
    };
    let ok = |_req: Request<String>| async { Ok::<_, Infallible>(Response::new(String::new())) };

    let (limiter, store) = build(false);
    RateLimitLayer::new(limiter).layer(tower::service_fn(ok)).oneshot(req()).await.unwrap();
    assert!(store.get("token_bucket:ip:10.9.9.9").is_some());

    let (limiter, store) = build(true);
    RateLimitLayer::new(limiter).layer(tower::service_fn(ok)).oneshot(req()).await.unwrap();
    assert!(store.get("token_bucket:ip:203.0.113.9").is_some());
    assert!(store.get("token_bucket:ip:10.9.9.9").is_none());
}

#[derive(Debug)]
struct Unreachable;

#[async_trait::async_trait]
impl BucketStore for Unreachable {
    async fn atomic_consume(
        &self,
        _key: &str,
        _params: &BucketParams,
        _now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        Err(StoreError::unavailable("no route to host"))
    }
}

#[tokio::test]
async fn fail_open_still_sets_headers() {
    let cfg = RateLimitConfig::builder().capacity(9).refill_rate(2.0).build().unwrap();
    let limiter = RateLimiter::new(cfg, Unreachable).unwrap().with_clock(ManualClock::new(T0));
    let svc = RateLimitLayer::new(limiter).layer(tower::service_fn(|_req: Request<String>| async {
        Ok::<_, Infallible>(Response::new(String::from("through")))
    }));

    let resp = svc.oneshot(Request::new(String::new())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-ratelimit-limit"], "9");
    assert_eq!(resp.headers()["x-ratelimit-remaining"], "9");
    // default refill interval is 60s
    assert_eq!(resp.headers()["x-ratelimit-reset"], "1700000060");
}
