use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{AppState, LimitQuery, MAX_LIMIT};
use crate::error::AppResult;
use crate::models::{MovieId, SimilarMovie};

const DEFAULT_LIMIT: usize = 10;

pub async fn similar(
    State(state): State<AppState>,
    Path(movie_id): Path<MovieId>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<SimilarMovie>>> {
    let movies = state
        .engine
        .find_similar_movies(movie_id, params.resolve(DEFAULT_LIMIT))
        .await?;
    Ok(Json(movies))
}

#[derive(Debug, Serialize)]
pub struct BayesianRatingResponse {
    pub movie_id: MovieId,
    pub bayesian_rating: f64,
}

pub async fn bayesian_rating(
    State(state): State<AppState>,
    Path(movie_id): Path<MovieId>,
) -> AppResult<Json<BayesianRatingResponse>> {
    let bayesian_rating = state.engine.bayesian_rating(movie_id).await?;
    Ok(Json(BayesianRatingResponse {
        movie_id,
        bayesian_rating,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SemanticSearchQuery {
    q: String,
    limit: Option<usize>,
}

/// Handler for free-text semantic search
pub async fn semantic_search(
    State(state): State<AppState>,
    Query(params): Query<SemanticSearchQuery>,
) -> AppResult<Json<Vec<SimilarMovie>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let movies = state.engine.semantic_search(&params.q, limit).await?;
    Ok(Json(movies))
}

#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingQuery {
    force: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub movie_id: MovieId,
    pub generated: bool,
}

/// Embeds the movie's text and stores the vector; `generated` is false when
/// the stored vector is still fresh or the provider could not produce one
pub async fn generate_embedding(
    State(state): State<AppState>,
    Path(movie_id): Path<MovieId>,
    Query(params): Query<EmbeddingQuery>,
) -> AppResult<Json<EmbeddingResponse>> {
    let force = params.force.unwrap_or(false);
    let generated = state.engine.generate_movie_embedding(movie_id, force).await?;
    Ok(Json(EmbeddingResponse {
        movie_id,
        generated,
    }))
}
