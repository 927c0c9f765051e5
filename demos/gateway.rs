//! Gateway admission example.
//!
//! Puts the rate limiter in front of a toy handler and fires a burst of requests from two
//! clients. Bucket size and rate come from `TOKEN_BUCKET_*` environment variables, falling
//! back to a small demo bucket. Run with `RUST_LOG=tokengate=debug` to see the LogSink output.

use http::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokengate::{
    AuthenticatedUser, InMemoryStore, LogSink, RateLimitConfig, RateLimitLayer, RateLimiter,
    RemoteAddr,
};
use tower::{Service, ServiceBuilder, ServiceExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tokengate=debug")))
        .init();

    let config = if std::env::var_os("TOKEN_BUCKET_CAPACITY").is_some() {
        RateLimitConfig::from_env()?
    } else {
        RateLimitConfig::builder().capacity(3).refill_rate(1.0).build()?
    };
    println!("=== Gateway admission ({} tokens, {:.2}/s) ===\n", config.capacity, config.refill_rate);

    let limiter = RateLimiter::new(config, InMemoryStore::new())?.with_sink(LogSink);
    let mut svc = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter.clone()))
        .service_fn(|req: Request<String>| async move {
            Ok::<_, Infallible>(Response::new(format!("hello {}", req.uri().path())))
        });

    for (label, user) in [("anonymous 10.0.0.5", None), ("user 42", Some("42"))] {
        println!("{}:", label);
        for i in 0..5 {
            let mut req = Request::builder().uri(format!("/orders/{}", i)).body(String::new())?;
            req.extensions_mut().insert(RemoteAddr("10.0.0.5:51000".parse::<SocketAddr>()?));
            if let Some(id) = user {
                req.extensions_mut().insert(AuthenticatedUser(id.to_string()));
            }

            let resp = svc.ready().await?.call(req).await?;
            let remaining = resp.headers().get("x-ratelimit-remaining").and_then(|v| v.to_str().ok());
            println!("  #{} -> {} remaining={}", i, resp.status(), remaining.unwrap_or("-"));
            if resp.status().is_client_error() {
                println!("     {}", resp.body());
            }
        }
    }

    println!("\nRetuning to 10 tokens at 5/s");
    limiter.update_params(10, 5.0)?;
    let mut req = Request::new(String::new());
    req.extensions_mut().insert(AuthenticatedUser("42".into()));
    let resp = svc.ready().await?.call(req).await?;
    println!("  user 42 -> {} limit={:?}", resp.status(), resp.headers().get("x-ratelimit-limit"));

    Ok(())
}
