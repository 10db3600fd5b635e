use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use super::{AppState, LimitQuery};
use crate::error::AppResult;
use crate::models::{MovieSummary, RecommendationStatus, SimilarMovie, UserId};

const DEFAULT_LIMIT: usize = 12;

/// Hybrid recommendations, the policy is picked from the user's rating count
pub async fn hybrid(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<MovieSummary>>> {
    let movies = state
        .engine
        .get_recommendations(user_id, params.resolve(DEFAULT_LIMIT))
        .await?;
    Ok(Json(movies))
}

pub async fn content(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<MovieSummary>>> {
    let movies = state
        .engine
        .get_content_based(user_id, params.resolve(DEFAULT_LIMIT))
        .await?;
    Ok(Json(movies))
}

pub async fn collaborative(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<MovieSummary>>> {
    let movies = state
        .engine
        .get_collaborative(user_id, params.resolve(DEFAULT_LIMIT))
        .await?;
    Ok(Json(movies))
}

pub async fn vector(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<SimilarMovie>>> {
    let movies = state
        .engine
        .vector_recommendations(user_id, params.resolve(DEFAULT_LIMIT))
        .await?;
    Ok(Json(movies))
}

pub async fn status(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<RecommendationStatus>> {
    let status = state.engine.recommendation_status(user_id).await?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
pub struct PreferenceVectorResponse {
    pub user_id: UserId,
    pub computed: bool,
    pub dimension: Option<usize>,
}

/// Rebuilds the user's preference vector from their current ratings
pub async fn recompute_preference_vector(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<PreferenceVectorResponse>> {
    let vector = state.engine.recompute_preference_vector(user_id).await?;
    Ok(Json(PreferenceVectorResponse {
        user_id,
        computed: vector.is_some(),
        dimension: vector.map(|v| v.len()),
    }))
}
