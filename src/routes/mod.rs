use axum::{
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{make_span_with_request_id, request_id_middleware};
use crate::services::RecommendationEngine;

pub mod movies;
pub mod ratings;
pub mod recommendations;

/// Largest page size accepted from `?limit=`
pub const MAX_LIMIT: usize = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
}

impl AppState {
    pub fn new(engine: RecommendationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// `?limit=` query shared by list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    pub fn resolve(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).min(MAX_LIMIT)
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:user_id/recommendations",
            get(recommendations::hybrid),
        )
        .route(
            "/users/:user_id/recommendations/content",
            get(recommendations::content),
        )
        .route(
            "/users/:user_id/recommendations/collaborative",
            get(recommendations::collaborative),
        )
        .route(
            "/users/:user_id/recommendations/vector",
            get(recommendations::vector),
        )
        .route(
            "/users/:user_id/recommendations/status",
            get(recommendations::status),
        )
        .route(
            "/users/:user_id/preference-vector",
            post(recommendations::recompute_preference_vector),
        )
        .route("/users/:user_id/ratings", get(ratings::user_ratings))
        .route(
            "/users/:user_id/ratings/:movie_id",
            put(ratings::rate_movie).delete(ratings::delete_rating),
        )
        .route("/movies/search/semantic", get(movies::semantic_search))
        .route("/movies/:movie_id/similar", get(movies::similar))
        .route("/movies/:movie_id/bayesian-rating", get(movies::bayesian_rating))
        .route("/movies/:movie_id/ratings", get(ratings::movie_ratings))
        .route("/movies/:movie_id/embedding", post(movies::generate_embedding))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_caps() {
        assert_eq!(LimitQuery::default().resolve(12), 12);
        assert_eq!(LimitQuery { limit: Some(3) }.resolve(12), 3);
        assert_eq!(LimitQuery { limit: Some(5000) }.resolve(12), MAX_LIMIT);
    }
}
