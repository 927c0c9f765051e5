//! Client identification.
//!
//! Every bucket belongs to a client key: `user:<id>` for authenticated callers, otherwise
//! `ip:<address>`, or `ip:unknown` when no address is available. Identity is resolved by an
//! upstream authentication layer and handed in explicitly, either as an argument or as an
//! [`AuthenticatedUser`] request extension.

use http::header::HeaderName;
use http::Request;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Stable bucket key for one rate-limited principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Key for an authenticated identity.
    pub fn user(id: &str) -> Self {
        Self(format!("user:{}", id))
    }

    /// Key for a network address.
    pub fn ip(addr: IpAddr) -> Self {
        Self(format!("ip:{}", addr))
    }

    /// Key shared by every caller whose address could not be determined.
    pub fn unknown() -> Self {
        Self("ip:unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Authenticated principal attached to a request by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Peer address of the connection, attached to a request by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Derives a [`ClientKey`] from request metadata. No I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIdentifier {
    trust_forwarded_headers: bool,
}

impl ClientIdentifier {
    /// Identifier that only trusts the socket address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult `X-Forwarded-For` (first hop) and `X-Real-IP` before the socket address.
    /// Only enable behind a proxy that overwrites these headers.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// Authenticated identity first, network address second, `ip:unknown` last.
    /// Blank identities are treated as anonymous.
    pub fn identify(&self, user: Option<&str>, remote: Option<IpAddr>) -> ClientKey {
        match (user.map(str::trim).filter(|u| !u.is_empty()), remote) {
            (Some(user), _) => ClientKey::user(user),
            (None, Some(addr)) => ClientKey::ip(addr),
            (None, None) => ClientKey::unknown(),
        }
    }

    /// Identify an HTTP request from its [`AuthenticatedUser`] / [`RemoteAddr`] extensions
    /// and, when trusted, its forwarding headers.
    pub fn identify_request<B>(&self, req: &Request<B>) -> ClientKey {
        let user = req.extensions().get::<AuthenticatedUser>().map(|u| u.0.as_str());
        let remote = self
            .forwarded_addr(req)
            .or_else(|| req.extensions().get::<RemoteAddr>().map(|r| r.0.ip()));
        self.identify(user, remote)
    }

    fn forwarded_addr<B>(&self, req: &Request<B>) -> Option<IpAddr> {
        if !self.trust_forwarded_headers {
            return None;
        }
        let headers = req.headers();
        let first_hop = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse().ok());
        first_hop.or_else(|| {
            headers.get(X_REAL_IP).and_then(|v| v.to_str().ok()).and_then(|s| s.trim().parse().ok())
        })
    }
}
