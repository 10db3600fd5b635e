use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cached;
use crate::db::{CacheKey, MovieCatalog, RatingStore, ResultCache};
use crate::error::{AppError, AppResult};
use crate::models::{Movie, MovieId, SimilarMovie, SimilarityResult, UserId};
use crate::services::bayesian::BayesianRatingAggregator;
use crate::services::preference_vector::PreferenceVectorManager;
use crate::services::providers::EmbeddingProvider;
use crate::services::vector;

/// Exclusion id that matches no movie, used instead of an empty filter
pub const EXCLUDE_NOTHING: MovieId = -1;

/// Loads movies for `ids`, keeping the order of `ids` and skipping unknown ones
pub(crate) async fn load_in_order(
    catalog: &dyn MovieCatalog,
    ids: &[MovieId],
) -> AppResult<Vec<Movie>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut by_id: HashMap<MovieId, Movie> = catalog
        .find_by_ids(ids.to_vec())
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Nearest-neighbour search over movie embeddings
#[derive(Clone)]
pub struct VectorSimilarityIndex {
    catalog: Arc<dyn MovieCatalog>,
    ratings: Arc<dyn RatingStore>,
    preferences: PreferenceVectorManager,
    provider: Arc<dyn EmbeddingProvider>,
    aggregator: BayesianRatingAggregator,
    cache: Arc<dyn ResultCache>,
    cache_ttl: Duration,
    dimension: usize,
}

impl VectorSimilarityIndex {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn MovieCatalog>,
        ratings: Arc<dyn RatingStore>,
        preferences: PreferenceVectorManager,
        provider: Arc<dyn EmbeddingProvider>,
        aggregator: BayesianRatingAggregator,
        cache: Arc<dyn ResultCache>,
        cache_ttl: Duration,
        dimension: usize,
    ) -> Self {
        Self {
            catalog,
            ratings,
            preferences,
            provider,
            aggregator,
            cache,
            cache_ttl,
            dimension,
        }
    }

    /// Movies closest to `query`, most similar first, ties by ascending id
    ///
    /// Movies without an embedding are never candidates.
    pub async fn nearest_to(
        &self,
        query: &[f32],
        exclude_ids: &[MovieId],
        limit: usize,
    ) -> AppResult<Vec<SimilarityResult>> {
        vector::ensure_dimension(query, self.dimension)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let exclude_ids = if exclude_ids.is_empty() {
            vec![EXCLUDE_NOTHING]
        } else {
            exclude_ids.to_vec()
        };

        let mut results: Vec<SimilarityResult> = self
            .catalog
            .find_by_embedding_knn(query.to_vec(), exclude_ids, limit)
            .await?
            .into_iter()
            .map(|(movie_id, similarity)| SimilarityResult {
                movie_id,
                similarity,
            })
            .collect();

        // Stores may order ties arbitrarily
        vector::rank_by_similarity(&mut results);
        results.truncate(limit);

        Ok(results)
    }

    async fn hydrate(&self, results: Vec<SimilarityResult>) -> AppResult<Vec<SimilarMovie>> {
        let ids: Vec<MovieId> = results.iter().map(|r| r.movie_id).collect();
        let similarity: HashMap<MovieId, f64> =
            results.iter().map(|r| (r.movie_id, r.similarity)).collect();

        let movies = load_in_order(self.catalog.as_ref(), &ids).await?;
        Ok(movies
            .into_iter()
            .map(|movie| {
                let similarity = similarity.get(&movie.id).copied().unwrap_or_default();
                SimilarMovie {
                    movie: self.aggregator.summarize(movie),
                    similarity,
                }
            })
            .collect())
    }

    /// Movies most similar to the given movie, excluding itself
    pub async fn find_similar_movies(
        &self,
        movie_id: MovieId,
        limit: usize,
    ) -> AppResult<Vec<SimilarMovie>> {
        let key = CacheKey::SimilarMovies { movie_id, limit };
        cached!(self.cache, key, self.cache_ttl, async {
            let movie = self
                .catalog
                .find_by_id(movie_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", movie_id)))?;

            let Some(embedding) = movie.embedding else {
                tracing::debug!(movie_id, "Movie has no embedding, no similar movies");
                return Ok::<_, AppError>(Vec::new());
            };

            let results = self.nearest_to(&embedding, &[movie_id], limit).await?;
            self.hydrate(results).await
        })
    }

    /// Movies closest to the user's preference vector, excluding rated ones
    ///
    /// A stale vector is recomputed first; no vector means no results.
    pub async fn vector_recommendations(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<SimilarMovie>> {
        let key = CacheKey::UserVectorRecommendations { user_id, limit };
        cached!(self.cache, key, self.cache_ttl, async {
            let Some(preference) = self.preferences.ensure_fresh(user_id).await? else {
                tracing::info!(user_id, "No preference vector, no vector recommendations");
                return Ok::<_, AppError>(Vec::new());
            };

            let rated: Vec<MovieId> = self
                .ratings
                .find_by_user(user_id)
                .await?
                .into_iter()
                .map(|r| r.movie_id)
                .collect();

            let results = self.nearest_to(&preference, &rated, limit).await?;
            self.hydrate(results).await
        })
    }

    /// Movies whose embedding is closest to the embedded query text
    ///
    /// A provider failure yields an empty, uncached result.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
    ) -> AppResult<Vec<SimilarMovie>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Search query is empty".to_string()));
        }

        let key = CacheKey::SemanticSearch {
            query: query.to_string(),
            limit,
        };
        if let Some(cached) = self.cache.get_from_cache(&key).await? {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(cached);
        }

        let embedding = self.provider.embed(query).await;
        if vector::is_zero(&embedding) {
            tracing::warn!(
                provider = self.provider.name(),
                "Query embedding unavailable, semantic search degraded to empty"
            );
            return Ok(Vec::new());
        }

        let results = self.nearest_to(&embedding, &[], limit).await?;
        let movies = self.hydrate(results).await?;

        tracing::info!(results = movies.len(), "Semantic search completed");

        self.cache.set_in_background(&key, &movies, self.cache_ttl);
        Ok(movies)
    }
}
