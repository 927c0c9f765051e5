use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::future::Ready;
use http::{Request, Response};
use std::convert::Infallible;
use tokengate::refill::refill;
use tokengate::{
    ClientKey, InMemoryStore, ManualClock, NoopStore, RateLimitConfig, RateLimitLayer, RateLimiter,
};
use tower::{Service, ServiceBuilder};

// Answers every request immediately so the numbers are the limiter's.
#[derive(Clone)]
struct Ok200;

impl Service<Request<String>> for Ok200 {
    type Response = Response<String>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<String>) -> Self::Future {
        futures::future::ready(Ok(Response::new(String::new())))
    }
}

fn refill_math(c: &mut Criterion) {
    c.bench_function("refill_partial", |b| {
        b.iter(|| refill(black_box(3), black_box(1_000), black_box(3_750), black_box(100), black_box(1.67)))
    });
}

fn in_memory_admission(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cfg = RateLimitConfig::builder().capacity(1_000_000).refill_rate(1_000.0).build().unwrap();
    let limiter = RateLimiter::new(cfg, InMemoryStore::new()).unwrap().with_clock(ManualClock::new(0));
    let key = ClientKey::user("bench");

    c.bench_function("admit_in_memory_single_key", |b| {
        b.to_async(&rt).iter(|| async { black_box(limiter.admit(black_box(&key)).await) });
    });
}

fn middleware_overhead(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cfg = RateLimitConfig::default();
    let limiter = RateLimiter::new(cfg, NoopStore::new()).unwrap();
    let svc = ServiceBuilder::new().layer(RateLimitLayer::new(limiter)).service(Ok200);

    c.bench_function("middleware_noop_store", |b| {
        b.to_async(&rt).iter(|| async {
            let mut local_svc = svc.clone();
            let _ = black_box(local_svc.call(Request::new(String::new()))).await;
        });
    });
}

criterion_group!(benches, refill_math, in_memory_admission, middleware_overhead);
criterion_main!(benches);
