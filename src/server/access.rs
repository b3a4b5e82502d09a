//! Client allow-list middleware.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Renderer addresses allowed to fetch media. Empty allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addrs: Arc<Vec<IpAddr>>,
}

impl AllowList {
    pub fn new(addrs: Vec<IpAddr>) -> Self {
        Self {
            addrs: Arc::new(addrs.into_iter().map(|ip| ip.to_canonical()).collect()),
        }
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.addrs.is_empty() || self.addrs.contains(&ip.to_canonical())
    }
}

/// Reject clients outside the allow-list with 403.
pub async fn allow_list_middleware(
    State(allow): State<AllowList>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if allow.allows(client.ip()) {
        return next.run(request).await;
    }
    tracing::warn!(client = %client, path = %request.uri().path(), "Rejected client");
    StatusCode::FORBIDDEN.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(allow: AllowList, client: &str) -> Router {
        Router::new()
            .route("/media.ts", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(allow, allow_list_middleware))
            .layer(MockConnectInfo(client.parse::<SocketAddr>().unwrap()))
    }

    async fn status(allow: AllowList, client: &str) -> StatusCode {
        app(allow, client)
            .oneshot(Request::get("/media.ts").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_middleware_rejects_unknown_client() {
        let allow = AllowList::new(vec!["192.0.2.7".parse().unwrap()]);
        assert_eq!(status(allow.clone(), "192.0.2.7:5000").await, StatusCode::OK);
        assert_eq!(status(allow, "192.0.2.8:5000").await, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_empty_list_allows_everyone() {
        let allow = AllowList::default();
        assert!(allow.allows("192.0.2.7".parse().unwrap()));
    }

    #[test]
    fn test_list_filters_addresses() {
        let allow = AllowList::new(vec!["192.0.2.7".parse().unwrap()]);
        assert!(allow.allows("192.0.2.7".parse().unwrap()));
        assert!(!allow.allows("192.0.2.8".parse().unwrap()));
    }

    #[test]
    fn test_mapped_ipv4_matches() {
        let allow = AllowList::new(vec!["192.0.2.7".parse().unwrap()]);
        assert!(allow.allows("::ffff:192.0.2.7".parse().unwrap()));
    }
}
