use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RatingWeights;
use crate::db::{MovieCatalog, RatingStore, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{User, UserId};
use crate::services::vector::WeightedMean;

/// Maintains each user's preference vector in embedding space
///
/// The vector is always rebuilt from the complete current rating set, so
/// concurrent recomputes for the same user converge on the same value.
#[derive(Clone)]
pub struct PreferenceVectorManager {
    users: Arc<dyn UserStore>,
    ratings: Arc<dyn RatingStore>,
    catalog: Arc<dyn MovieCatalog>,
    weights: RatingWeights,
    dimension: usize,
    stale_after: Duration,
}

impl PreferenceVectorManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        ratings: Arc<dyn RatingStore>,
        catalog: Arc<dyn MovieCatalog>,
        weights: RatingWeights,
        dimension: usize,
        stale_after: Duration,
    ) -> Self {
        Self {
            users,
            ratings,
            catalog,
            weights,
            dimension,
            stale_after,
        }
    }

    /// Weighted mean of the embeddings of every rated movie
    ///
    /// Returns `None` without touching the stored vector when none of the
    /// rated movies has an embedding.
    pub async fn recompute(&self, user_id: UserId) -> AppResult<Option<Vec<f32>>> {
        if self.users.find_user(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }

        let vector = self.compute(user_id).await?;

        match vector {
            Some(embedding) => {
                self.users
                    .save_preference_vector(user_id, embedding.clone(), Utc::now())
                    .await?;
                tracing::info!(user_id, "Preference vector updated");
                Ok(Some(embedding))
            }
            None => {
                tracing::info!(
                    user_id,
                    "No rated movie has an embedding, preference vector not computed"
                );
                Ok(None)
            }
        }
    }

    async fn compute(&self, user_id: UserId) -> AppResult<Option<Vec<f32>>> {
        let mut ratings = self.ratings.find_by_user(user_id).await?;
        if ratings.is_empty() {
            return Ok(None);
        }

        // Fixed accumulation order keeps the result stable across runs
        ratings.sort_by_key(|r| r.movie_id);

        let movie_ids = ratings.iter().map(|r| r.movie_id).collect();
        let embeddings: HashMap<_, _> = self
            .catalog
            .find_by_ids(movie_ids)
            .await?
            .into_iter()
            .filter_map(|movie| movie.embedding.map(|e| (movie.id, e)))
            .collect();

        let mut mean = WeightedMean::new(self.dimension);
        for rating in &ratings {
            if let Some(embedding) = embeddings.get(&rating.movie_id) {
                mean.add(embedding, self.weights.weight(rating.rating))?;
            }
        }

        tracing::debug!(
            user_id,
            rated = ratings.len(),
            with_embedding = mean.count(),
            "Accumulated rated movie embeddings"
        );

        Ok(mean.finish())
    }

    /// Absent or older than the staleness window
    pub fn needs_recompute(&self, user: &User, now: DateTime<Utc>) -> bool {
        match &user.preference {
            Some(preference) => preference.is_stale(now, self.stale_after),
            None => true,
        }
    }

    /// The user's vector, recomputed first when stale
    ///
    /// Falls back to the stored vector when a stale one cannot be recomputed.
    pub async fn ensure_fresh(&self, user_id: UserId) -> AppResult<Option<Vec<f32>>> {
        let user = self
            .users
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        if !self.needs_recompute(&user, Utc::now()) {
            return Ok(user.preference.map(|p| p.embedding));
        }

        match self.recompute(user_id).await? {
            Some(embedding) => Ok(Some(embedding)),
            None => Ok(user.preference.map(|p| p.embedding)),
        }
    }
}
