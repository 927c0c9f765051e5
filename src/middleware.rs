//! Tower middleware for HTTP services.
//!
//! [`RateLimitLayer`] runs an admission check before every request. Admitted requests reach
//! the inner service and get `X-RateLimit-*` headers on the way out; denied requests are
//! answered directly with `429 Too Many Requests` and a JSON body. Fail-open decisions are
//! admitted like any other and still carry headers.
//!
//! The layer works with any body type that can be built from a `String`, so it composes with
//! hyper/axum bodies as well as plain strings in tests.

use crate::decision::Decision;
use crate::limiter::RateLimiter;
use crate::store::BucketStore;
use crate::telemetry::{NullSink, TelemetrySink};
use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Applies a [`RateLimiter`] to every request of the wrapped service.
pub struct RateLimitLayer<S: ?Sized, K = NullSink> {
    limiter: RateLimiter<S, K>,
}

impl<S: ?Sized, K> RateLimitLayer<S, K> {
    pub fn new(limiter: RateLimiter<S, K>) -> Self {
        Self { limiter }
    }
}

impl<S: ?Sized, K: Clone> Clone for RateLimitLayer<S, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone() }
    }
}

impl<Inner, S: ?Sized, K: Clone> Layer<Inner> for RateLimitLayer<S, K> {
    type Service = RateLimitService<Inner, S, K>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService { inner, limiter: self.limiter.clone() }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
pub struct RateLimitService<Inner, S: ?Sized, K = NullSink> {
    inner: Inner,
    limiter: RateLimiter<S, K>,
}

impl<Inner: Clone, S: ?Sized, K: Clone> Clone for RateLimitService<Inner, S, K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: self.limiter.clone() }
    }
}

impl<Inner, S, K, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<Inner, S, K>
where
    Inner: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    S: BucketStore + ?Sized + 'static,
    K: TelemetrySink,
    K::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = Inner::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let key = self.limiter.identify(&req);
        let limiter = self.limiter.clone();
        // the readied instance handles this request; a fresh clone takes its place
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let decision = limiter.admit(&key).await;
            if decision.is_denied() {
                return Ok(too_many_requests(&decision, &limiter));
            }
            let mut resp = inner.call(req).await?;
            decision.apply_headers(resp.headers_mut());
            Ok(resp)
        })
    }
}

fn too_many_requests<S, K, B>(decision: &Decision, limiter: &RateLimiter<S, K>) -> Response<B>
where
    S: BucketStore + ?Sized,
    K: TelemetrySink,
    K::Future: Send + 'static,
    B: From<String>,
{
    let mut resp = Response::new(B::from(decision.rejection_json()));
    *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    decision.apply_rejection_headers(headers, limiter.now());
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitConfig;
    use crate::store::InMemoryStore;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[tokio::test]
    async fn second_request_is_rejected() {
        let cfg = RateLimitConfig::builder().capacity(1).refill_rate(0.5).build().unwrap();
        let limiter = RateLimiter::new(cfg, InMemoryStore::new())
            .unwrap()
            .with_clock(ManualClock::new(1_000));
        let svc = RateLimitLayer::new(limiter).layer(tower::service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(String::from("ok")))
        }));

        let ok = svc.clone().oneshot(Request::new(())).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["x-ratelimit-remaining"], "0");

        let denied = svc.oneshot(Request::new(())).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.headers()["retry-after"], "2");
        assert_eq!(denied.headers()["content-type"], "application/json");
    }
}
