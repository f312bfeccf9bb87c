//! Admin API.
//!
//! Bearer-authenticated JSON endpoints for inspecting and driving the
//! connection registry, proxy listeners and response cache.
//!
//! | Route | Action |
//! |-------|--------|
//! | `GET /admin/status` | counts, admission, rotation, cache stats |
//! | `GET /admin/connections` | snapshot of registered connections |
//! | `POST /admin/connections` | open (explicit target or load-balanced) |
//! | `DELETE /admin/connections/{name}` | close |
//! | `POST /admin/connections/{name}/send` | write a payload |
//! | `POST /admin/connections/{name}/receive` | wait for the next payload |
//! | `GET /admin/listeners` | bound proxy listeners |
//! | `GET`, `DELETE /admin/cache` | cache stats, flush |

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::crypto::CipherKey;
use crate::proxy::ProxyServer;
use crate::registry::ConnectionRegistry;
use crate::resilience::RetryPolicy;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: ConnectionRegistry,
    pub proxy: ProxyServer,
    pub retry: RetryPolicy,
    pub api_key: Arc<str>,
    /// Key for `encrypt: true` sends and receives, from `cipher.key_hex`.
    pub cipher_key: Option<Arc<CipherKey>>,
}

/// Build the admin router. `request_timeout` bounds every handler,
/// including opens that wait for admission.
#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/connections", get(list_connections).post(open_connection))
        .route("/admin/connections/{name}", delete(close_connection))
        .route("/admin/connections/{name}/send", post(send_payload))
        .route("/admin/connections/{name}/receive", post(receive_payload))
        .route("/admin/listeners", get(list_listeners))
        .route("/admin/cache", get(get_cache).delete(flush_cache))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
    use tower::ServiceExt;

    use crate::cache::ResponseCache;
    use crate::load_balancer::LoadBalancer;
    use crate::net::Dialer;
    use crate::proxy::ProxyOptions;
    use crate::registry::RegistryOptions;

    fn router() -> Router {
        let dialer = Dialer::with_default_roots(None).unwrap();
        let balancer = LoadBalancer::new();
        let registry = ConnectionRegistry::new(RegistryOptions::default(), dialer.clone(), balancer.clone());
        let cache = Arc::new(ResponseCache::new(10, Duration::from_secs(60)));
        let proxy = ProxyServer::new(ProxyOptions::default(), cache, balancer, dialer);
        let state = AdminState {
            registry,
            proxy,
            retry: RetryPolicy::once(),
            api_key: Arc::from("secret"),
            cipher_key: None,
        };
        setup_admin_router(state, Duration::from_secs(5))
    }

    fn request(method: Method, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, "Bearer secret")
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        let res = router()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = router()
            .oneshot(
                Request::get("/admin/status")
                    .header(AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_reports_an_empty_daemon() {
        let res = router()
            .oneshot(request(Method::GET, "/admin/status", Body::empty()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["connections"], 0);
        assert_eq!(json["admission_max"], 10);
        assert_eq!(json["cache"]["entries"], 0);
    }

    #[tokio::test]
    async fn registry_errors_map_to_statuses() {
        let res = router()
            .oneshot(request(Method::DELETE, "/admin/connections/missing", Body::empty()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = router()
            .oneshot(request(
                Method::POST,
                "/admin/connections",
                Body::from(r#"{"name":"lb"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn encrypted_send_needs_a_configured_key() {
        let res = router()
            .oneshot(request(
                Method::POST,
                "/admin/connections/any/send",
                Body::from(r#"{"data":"hi","encrypt":true}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = router()
            .oneshot(request(
                Method::POST,
                "/admin/connections/any/send",
                Body::from(r#"{"data":"zz","encoding":"hex"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = router()
            .oneshot(request(
                Method::POST,
                "/admin/connections/any/send",
                Body::from(r#"{"data":"hi"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn flush_reports_dropped_entries() {
        let res = router()
            .oneshot(request(Method::DELETE, "/admin/cache", Body::empty()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"flushed":0}"#);
    }
}
