pub mod dispatch;
pub mod local;
pub mod routes;
pub mod state;
pub mod transport;

use axum::Router;
use relay_core::config::AppConfig;
use relay_core::tool_registry::ToolRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use dispatch::DispatchServer;
pub use local::LocalGateway;
pub use state::AppState;
pub use transport::{ServerPush, SessionStream, SessionTransport};

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.server.cors;

    let mut app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::stream_routes())
        .merge(routes::message_routes())
        .merge(routes::session_routes())
        .with_state(state);

    app = app.layer(TraceLayer::new_for_http());

    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}

/// Serve on an already-bound listener until the process is stopped.
pub async fn serve_on(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Start the tool server on the configured address.
pub async fn serve(config: AppConfig, tool_registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "Serving {} tools on http://{}/sse",
        tool_registry.len(),
        addr
    );

    let state = AppState::new(config, tool_registry);
    serve_on(listener, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use relay_core::types::{ParameterSchema, ToolDescriptor, ToolResult};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDescriptor::new("noop", "Does nothing", ParameterSchema::object()),
                |_args| async { Ok::<_, anyhow::Error>(ToolResult::text("ok")) },
            )
            .unwrap();
        AppState::new(AppConfig::default(), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state());

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_without_session_is_rejected() {
        let state = test_state();
        let app = build_router(state.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/messages?sessionId=does-not-exist")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#,
            ))
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.dispatch.transport().is_empty());
    }

    #[tokio::test]
    async fn test_stream_announces_endpoint_and_closes_on_drop() {
        let state = test_state();
        let app = build_router(state.clone());

        let req = Request::builder().uri("/sse").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(state.dispatch.transport().len(), 1);

        let mut body = resp.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.contains("event: endpoint"));
        assert!(text.contains("/messages?sessionId="));

        drop(body);
        assert!(state.dispatch.transport().is_empty());
    }

    #[tokio::test]
    async fn test_post_to_open_session_is_accepted() {
        let state = test_state();
        let (session_id, _stream) = state.dispatch.connect();
        let app = build_router(state.clone());

        let req = Request::builder()
            .method("POST")
            .uri(format!("/messages?sessionId={}", session_id))
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#,
            ))
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }
}
