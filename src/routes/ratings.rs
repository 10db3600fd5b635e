use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::AppState;
use crate::error::AppResult;
use crate::models::{MovieId, Rating, RatingRequest, UserId};

/// Creates or replaces the user's rating. Aggregate and preference refreshes
/// keep running after the response is sent.
pub async fn rate_movie(
    State(state): State<AppState>,
    Path((user_id, movie_id)): Path<(UserId, MovieId)>,
    Json(request): Json<RatingRequest>,
) -> AppResult<Json<Rating>> {
    let (rating, _tasks) = state
        .engine
        .rate_movie(user_id, movie_id, request.rating, request.review)
        .await?;
    Ok(Json(rating))
}

pub async fn delete_rating(
    State(state): State<AppState>,
    Path((user_id, movie_id)): Path<(UserId, MovieId)>,
) -> AppResult<StatusCode> {
    let _tasks = state.engine.delete_rating(user_id, movie_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<Vec<Rating>>> {
    Ok(Json(state.engine.user_ratings(user_id).await?))
}

pub async fn movie_ratings(
    State(state): State<AppState>,
    Path(movie_id): Path<MovieId>,
) -> AppResult<Json<Vec<Rating>>> {
    Ok(Json(state.engine.movie_ratings(movie_id).await?))
}
