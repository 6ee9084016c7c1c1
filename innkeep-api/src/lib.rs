use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use innkeep_core::rate_limit::HTTP;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod owner;
pub mod reservations;
pub mod state;
#[cfg(feature = "kafka")]
pub mod worker;

pub use middleware::ClientId;
pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::USER_AGENT]);

    let owner_routes = owner::routes().route_layer(from_fn_with_state(
        state.clone(),
        middleware::owner_auth_middleware,
    ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .merge(reservations::routes())
        .merge(owner_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => {
            tracing::error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    ClientId(client): ClientId,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    match state.rate_limiter.hit(HTTP, &client).await {
        Ok(true) => next.run(req).await,
        Ok(false) => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response(),
        Err(e) => {
            tracing::warn!("HTTP rate limiter unavailable, letting request through: {}", e);
            next.run(req).await // Fail open
        }
    }
}
