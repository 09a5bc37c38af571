//! Client address extraction

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Whether `X-Forwarded-For` may name the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrustForwardedFor(pub bool);

/// Address of the submitting client.
///
/// The socket peer, or the first hop of `X-Forwarded-For` when the gateway
/// is configured to trust it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
    TrustForwardedFor: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TrustForwardedFor(trusted) = TrustForwardedFor::from_ref(state);
        if trusted {
            if let Some(forwarded) = forwarded_for(&parts.headers) {
                return Ok(ClientIp(forwarded));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientIp(peer))
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
}
