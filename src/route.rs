use std::sync::Arc;

use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handler::*, AppState};

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_checker_handler))
        .route("/api/users", get(get_users).post(create_user))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/lists", get(get_lists).post(create_list))
        .route(
            "/api/lists/:id",
            get(get_list).put(update_list).delete(delete_list),
        )
        .route("/api/todos", get(get_todos).post(create_todo))
        .route(
            "/api/todos/:id",
            get(get_todo).put(update_todo).delete(delete_todo),
        )
        .route("/api/todos/:id/complete", put(toggle_todo_complete))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Cross-origin policy for the browser client served from `origin`.
pub fn cors_layer(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE])
}
