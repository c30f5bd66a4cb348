//! API Routes
//!
//! The admin surface of the hosted cache. Entry routes read and write
//! single keys of the shared `MemoryCache<String>`; maintenance routes act
//! on the whole cache. Both halves share one `AppState`, so a value written
//! through `/set` is what `/get` and `/stats` observe.

use axum::{
    http::{header, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    add_handler, delete_handler, get_handler, health_handler, set_handler, stats_handler,
    trim_handler, AppState,
};

/// `PUT /set` overwrites, `POST /add` keeps a live value and reports it,
/// `GET /get/:key` and `DELETE /del/:key` answer 404 for a missing key.
fn entry_routes() -> Router<AppState> {
    Router::new()
        .route("/set", put(set_handler))
        .route("/add", post(add_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
}

/// `POST /trim`, `GET /stats` and the liveness check.
fn maintenance_routes() -> Router<AppState> {
    Router::new()
        .route("/trim", post(trim_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
}

/// Builds the admin router over `state`.
///
/// Browsers on any origin may call the surface with the four methods it
/// routes; every request is traced.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    entry_routes()
        .merge(maintenance_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn admin_app() -> Router {
        let options = CacheOptions::default().shard_count(2);
        create_router(AppState::with_options("routes", options).unwrap())
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<&str>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_entry_and_maintenance_routes_share_one_cache() {
        let app = admin_app();

        let response = call(&app, Method::PUT, "/set", Some(r#"{"key":"a","value":"1"}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(&app, Method::GET, "/get/a", None).await;
        assert_eq!(json(response).await["value"], "1");

        let stats = json(call(&app, Method::GET, "/stats", None).await).await;
        assert_eq!(stats["cache"], "routes");
        assert_eq!(stats["hits"], 1);

        let trimmed = json(call(&app, Method::POST, "/trim", Some(r#"{"percent":100}"#)).await).await;
        assert_eq!(trimmed["trimmed"], 1);

        let response = call(&app, Method::GET, "/get/a", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_add_route_keeps_live_value() {
        let app = admin_app();
        let first = json(call(&app, Method::POST, "/add", Some(r#"{"key":"k","value":"old"}"#)).await).await;
        assert_eq!(first["added"], true);

        let second = json(call(&app, Method::POST, "/add", Some(r#"{"key":"k","value":"new"}"#)).await).await;
        assert_eq!(second["added"], false);
        assert_eq!(second["existing"], "old");
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_found() {
        let app = admin_app();
        let response = call(&app, Method::DELETE, "/del/ghost", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("ghost"));
    }

    #[tokio::test]
    async fn test_wrong_method_and_unknown_path() {
        let app = admin_app();
        assert_eq!(
            call(&app, Method::GET, "/set", None).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            call(&app, Method::PUT, "/trim", Some(r#"{"percent":10}"#)).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            call(&app, Method::GET, "/keys", None).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_routed_methods() {
        let app = admin_app();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/set")
            .header(header::ORIGIN, "http://admin.local")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("PUT"));
        assert!(methods.contains("DELETE"));
    }
}
