use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cached;
use crate::config::EngineConfig;
use crate::db::{CacheKey, RatingStore, ResultCache, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{Movie, MovieSummary, UserId};
use crate::services::bayesian::BayesianRatingAggregator;
use crate::services::collaborative::CollaborativeRecommender;
use crate::services::content::ContentBasedRecommender;
use crate::services::popular::PopularMovies;

/// Strategy chosen per request from the user's rating count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPolicy {
    Popular,
    ContentOnly,
    Hybrid,
}

impl RecommendationPolicy {
    pub fn select(rating_count: usize, min_ratings_for_hybrid: usize) -> Self {
        if rating_count == 0 {
            RecommendationPolicy::Popular
        } else if rating_count < min_ratings_for_hybrid {
            RecommendationPolicy::ContentOnly
        } else {
            RecommendationPolicy::Hybrid
        }
    }
}

/// Oversampled (content, collaborative) sub-request sizes
pub fn hybrid_limits(limit: usize, config: &EngineConfig) -> (usize, usize) {
    let size = |weight: f64| (limit as f64 * weight * config.hybrid_oversample).round() as usize;
    (
        size(config.content_weight),
        size(config.collaborative_weight),
    )
}

/// Collaborative picks first, then unseen content picks, capped at `limit`
pub fn merge_candidates(
    collaborative: Vec<Movie>,
    content: Vec<Movie>,
    limit: usize,
) -> Vec<Movie> {
    let mut seen = HashSet::new();
    collaborative
        .into_iter()
        .chain(content)
        .filter(|movie| seen.insert(movie.id))
        .take(limit)
        .collect()
}

/// Picks a policy per user and merges the recommenders' candidate lists
#[derive(Clone)]
pub struct HybridOrchestrator {
    users: Arc<dyn UserStore>,
    ratings: Arc<dyn RatingStore>,
    content: ContentBasedRecommender,
    collaborative: CollaborativeRecommender,
    popular: PopularMovies,
    aggregator: BayesianRatingAggregator,
    cache: Arc<dyn ResultCache>,
    config: EngineConfig,
}

impl HybridOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        ratings: Arc<dyn RatingStore>,
        content: ContentBasedRecommender,
        collaborative: CollaborativeRecommender,
        popular: PopularMovies,
        aggregator: BayesianRatingAggregator,
        cache: Arc<dyn ResultCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            users,
            ratings,
            content,
            collaborative,
            popular,
            aggregator,
            cache,
            config,
        }
    }

    fn cache_ttl(&self) -> Duration {
        self.config.cache_ttl
    }

    pub async fn policy_for(&self, user_id: UserId) -> AppResult<RecommendationPolicy> {
        let count = self.ratings.count_by_user(user_id).await?;
        Ok(RecommendationPolicy::select(
            count,
            self.config.min_ratings_for_hybrid,
        ))
    }

    /// Ranked recommendations for the user, at most `limit` and never duplicated
    pub async fn recommend(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<MovieSummary>> {
        let key = CacheKey::UserRecommendations { user_id, limit };
        cached!(self.cache, key, self.cache_ttl(), async {
            if self.users.find_user(user_id).await?.is_none() {
                return Err(AppError::NotFound(format!("User {} not found", user_id)));
            }

            let movies = self.compute(user_id, limit).await?;
            Ok(movies
                .into_iter()
                .map(|m| self.aggregator.summarize(m))
                .collect::<Vec<_>>())
        })
    }

    async fn compute(&self, user_id: UserId, limit: usize) -> AppResult<Vec<Movie>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let policy = self.policy_for(user_id).await?;
        tracing::info!(user_id, limit, policy = ?policy, "Generating recommendations");

        match policy {
            RecommendationPolicy::Popular => self.popular.recommend(user_id, limit).await,
            RecommendationPolicy::ContentOnly => self.content.recommend(user_id, limit).await,
            RecommendationPolicy::Hybrid => self.hybrid(user_id, limit).await,
        }
    }

    async fn hybrid(&self, user_id: UserId, limit: usize) -> AppResult<Vec<Movie>> {
        let (content_limit, collaborative_limit) = hybrid_limits(limit, &self.config);

        let (content, collaborative) = tokio::try_join!(
            self.content.recommend(user_id, content_limit),
            self.collaborative.recommend(user_id, collaborative_limit),
        )?;

        tracing::debug!(
            user_id,
            content = content.len(),
            collaborative = collaborative.len(),
            "Merging hybrid candidates"
        );

        Ok(merge_candidates(collaborative, content, limit))
    }
}
