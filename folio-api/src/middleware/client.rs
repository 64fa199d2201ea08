use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, Extensions, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::state::AppState;

/// Caller address and agent, recorded on orders and download logs.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The socket peer, or the first `X-Forwarded-For` hop when the proxy in front is trusted
/// to set it. Clients can write that header freely, so it is ignored otherwise.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ClientMeta {
            ip_address: client_ip(&parts.headers, &parts.extensions, state.trust_forwarded_for),
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn behind_proxy() -> (HeaderMap, Extensions) {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 4000))));
        (headers, extensions)
    }

    #[test]
    fn forwarded_header_is_ignored_unless_trusted() {
        let (headers, extensions) = behind_proxy();
        assert_eq!(client_ip(&headers, &extensions, false).as_deref(), Some("10.0.0.2"));

        // a fresh spoofed value per request must not yield a fresh address
        let mut spoofed = HeaderMap::new();
        spoofed.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.77"));
        assert_eq!(client_ip(&spoofed, &extensions, false).as_deref(), Some("10.0.0.2"));
        assert_eq!(client_ip(&spoofed, &Extensions::new(), false), None);
    }

    #[test]
    fn trusted_proxy_supplies_the_first_hop() {
        let (headers, extensions) = behind_proxy();
        assert_eq!(client_ip(&headers, &extensions, true).as_deref(), Some("203.0.113.9"));
        assert_eq!(client_ip(&HeaderMap::new(), &extensions, true).as_deref(), Some("10.0.0.2"));
        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new(), true), None);
    }
}
