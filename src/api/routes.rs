use crate::AppState;
use crate::api::{auth, handlers};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/research", post(handlers::research::deep_research))
        .route("/sessions", get(handlers::research::list_sessions))
        .route(
            "/sessions/{id}",
            get(handlers::research::get_session).delete(handlers::research::cancel_session),
        )
        .route("/reports", get(handlers::reports::list_reports))
        .route("/reports/{id}", get(handlers::reports::get_report))
        .route("/openapi.json", get(handlers::openapi))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
