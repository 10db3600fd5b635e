use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::{BookmarkStore, GenreStore, MovieCatalog, RatingStore, ResultCache, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Movie, MovieId, MovieSummary, Rating, RecommendationStatus, SimilarMovie, UserId,
};
use crate::services::bayesian::BayesianRatingAggregator;
use crate::services::collaborative::CollaborativeRecommender;
use crate::services::content::ContentBasedRecommender;
use crate::services::hybrid::HybridOrchestrator;
use crate::services::movie_embeddings::MovieEmbeddingService;
use crate::services::popular::PopularMovies;
use crate::services::preference_vector::PreferenceVectorManager;
use crate::services::providers::EmbeddingProvider;
use crate::services::ratings::{PostWriteTasks, RatingService};
use crate::services::similarity::VectorSimilarityIndex;

/// The collaborators the engine reads from and writes to
#[derive(Clone)]
pub struct Stores {
    pub ratings: Arc<dyn RatingStore>,
    pub catalog: Arc<dyn MovieCatalog>,
    pub genres: Arc<dyn GenreStore>,
    pub bookmarks: Arc<dyn BookmarkStore>,
    pub users: Arc<dyn UserStore>,
}

impl Stores {
    /// One backend serving every store contract
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RatingStore + MovieCatalog + GenreStore + BookmarkStore + UserStore + 'static,
    {
        Self {
            ratings: store.clone(),
            catalog: store.clone(),
            genres: store.clone(),
            bookmarks: store.clone(),
            users: store,
        }
    }
}

/// Entry point for everything the HTTP layer needs from the recommender
#[derive(Clone)]
pub struct RecommendationEngine {
    orchestrator: HybridOrchestrator,
    content: ContentBasedRecommender,
    collaborative: CollaborativeRecommender,
    similarity: VectorSimilarityIndex,
    preferences: PreferenceVectorManager,
    aggregator: BayesianRatingAggregator,
    rating_service: RatingService,
    embeddings: MovieEmbeddingService,
    stores: Stores,
    cache: Arc<dyn ResultCache>,
}

impl RecommendationEngine {
    pub fn new(
        stores: Stores,
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn ResultCache>,
        config: EngineConfig,
    ) -> Self {
        if provider.dimension() != config.embedding_dimension {
            tracing::warn!(
                provider = provider.name(),
                provider_dimension = provider.dimension(),
                configured_dimension = config.embedding_dimension,
                "Embedding provider dimension differs from configuration"
            );
        }

        let aggregator = BayesianRatingAggregator::new(
            config.bayesian,
            stores.catalog.clone(),
            stores.ratings.clone(),
        );
        let preferences = PreferenceVectorManager::new(
            stores.users.clone(),
            stores.ratings.clone(),
            stores.catalog.clone(),
            config.rating_weights.clone(),
            config.embedding_dimension,
            config.vector_stale_after,
        );
        let popular = PopularMovies::new(
            stores.catalog.clone(),
            stores.bookmarks.clone(),
            config.popular_oversample,
        );
        let content = ContentBasedRecommender::new(
            stores.ratings.clone(),
            stores.catalog.clone(),
            stores.bookmarks.clone(),
            popular.clone(),
            config.rating_weights.clone(),
            config.preferred_genre_limit,
            config.content_oversample,
        );
        let collaborative = CollaborativeRecommender::new(
            stores.ratings.clone(),
            stores.catalog.clone(),
            config.min_common_ratings,
            config.max_neighbors,
            config.neighbor_min_rating,
        );
        let similarity = VectorSimilarityIndex::new(
            stores.catalog.clone(),
            stores.ratings.clone(),
            preferences.clone(),
            provider.clone(),
            aggregator.clone(),
            cache.clone(),
            config.cache_ttl,
            config.embedding_dimension,
        );
        let rating_service = RatingService::new(
            stores.ratings.clone(),
            stores.users.clone(),
            stores.catalog.clone(),
            aggregator.clone(),
            preferences.clone(),
            cache.clone(),
        );
        let embeddings =
            MovieEmbeddingService::new(stores.catalog.clone(), stores.genres.clone(), provider);
        let orchestrator = HybridOrchestrator::new(
            stores.users.clone(),
            stores.ratings.clone(),
            content.clone(),
            collaborative.clone(),
            popular,
            aggregator.clone(),
            cache.clone(),
            config,
        );

        Self {
            orchestrator,
            content,
            collaborative,
            similarity,
            preferences,
            aggregator,
            rating_service,
            embeddings,
            stores,
            cache,
        }
    }

    async fn ensure_user(&self, user_id: UserId) -> AppResult<()> {
        match self.stores.users.find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("User {} not found", user_id))),
        }
    }

    fn summarize(&self, movies: Vec<Movie>) -> Vec<MovieSummary> {
        movies
            .into_iter()
            .map(|m| self.aggregator.summarize(m))
            .collect()
    }

    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<MovieSummary>> {
        self.orchestrator.recommend(user_id, limit).await
    }

    pub async fn get_content_based(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<MovieSummary>> {
        self.ensure_user(user_id).await?;
        let movies = self.content.recommend(user_id, limit).await?;
        Ok(self.summarize(movies))
    }

    pub async fn get_collaborative(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<MovieSummary>> {
        self.ensure_user(user_id).await?;
        let movies = self.collaborative.recommend(user_id, limit).await?;
        Ok(self.summarize(movies))
    }

    pub async fn vector_recommendations(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> AppResult<Vec<SimilarMovie>> {
        self.similarity.vector_recommendations(user_id, limit).await
    }

    pub async fn find_similar_movies(
        &self,
        movie_id: MovieId,
        limit: usize,
    ) -> AppResult<Vec<SimilarMovie>> {
        self.similarity.find_similar_movies(movie_id, limit).await
    }

    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
    ) -> AppResult<Vec<SimilarMovie>> {
        self.similarity.semantic_search(query, limit).await
    }

    /// Forces a rebuild of the user's preference vector
    pub async fn recompute_preference_vector(
        &self,
        user_id: UserId,
    ) -> AppResult<Option<Vec<f32>>> {
        let vector = self.preferences.recompute(user_id).await?;
        if vector.is_some() {
            if let Err(e) = self.cache.invalidate_all().await {
                tracing::warn!(error = %e, "Failed to invalidate result cache");
            }
        }
        Ok(vector)
    }

    pub async fn bayesian_rating(&self, movie_id: MovieId) -> AppResult<f64> {
        self.aggregator.bayesian_rating(movie_id).await
    }

    pub async fn rate_movie(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        value: i16,
        review: Option<String>,
    ) -> AppResult<(Rating, PostWriteTasks)> {
        self.rating_service
            .rate_movie(user_id, movie_id, value, review)
            .await
    }

    pub async fn delete_rating(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> AppResult<PostWriteTasks> {
        self.rating_service.delete_rating(user_id, movie_id).await
    }

    pub async fn user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        self.rating_service.user_ratings(user_id).await
    }

    pub async fn movie_ratings(&self, movie_id: MovieId) -> AppResult<Vec<Rating>> {
        self.rating_service.movie_ratings(movie_id).await
    }

    pub async fn recommendation_status(&self, user_id: UserId) -> AppResult<RecommendationStatus> {
        self.ensure_user(user_id).await?;
        let total = self.stores.ratings.count_by_user(user_id).await?;
        Ok(RecommendationStatus::from_rating_count(total))
    }

    /// Embeds the movie when its vector is missing or expired, or always with
    /// `force`. Cached similarity results are dropped once a vector is stored.
    pub async fn generate_movie_embedding(
        &self,
        movie_id: MovieId,
        force: bool,
    ) -> AppResult<bool> {
        let generated = if force {
            self.embeddings.generate(movie_id).await?
        } else {
            self.embeddings.generate_if_needed(movie_id).await?
        };
        if generated {
            if let Err(e) = self.cache.invalidate_all().await {
                tracing::warn!(error = %e, "Failed to invalidate result cache");
            }
        }
        Ok(generated)
    }
}
