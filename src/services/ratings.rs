use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::{MovieCatalog, RatingStore, ResultCache, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{MovieId, Rating, UserId};
use crate::services::bayesian::BayesianRatingAggregator;
use crate::services::preference_vector::PreferenceVectorManager;

/// Which derived artifacts were refreshed after a rating write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostWriteOutcome {
    pub stats_refreshed: bool,
    pub vector_recomputed: bool,
}

/// Handle to the two independent refreshes dispatched after a rating write
///
/// Dropping the handle detaches the tasks; they still run to completion.
#[derive(Debug)]
pub struct PostWriteTasks {
    stats: JoinHandle<bool>,
    vector: JoinHandle<bool>,
}

impl PostWriteTasks {
    /// Waits for both tasks; a panicked task counts as not refreshed
    pub async fn join(self) -> PostWriteOutcome {
        let (stats, vector) = tokio::join!(self.stats, self.vector);
        PostWriteOutcome {
            stats_refreshed: stats.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Movie stats task did not complete");
                false
            }),
            vector_recomputed: vector.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Preference vector task did not complete");
                false
            }),
        }
    }
}

async fn invalidate_cache(cache: &dyn ResultCache) {
    if let Err(e) = cache.invalidate_all().await {
        tracing::warn!(error = %e, "Failed to invalidate result cache");
    }
}

/// Rating write path
///
/// The rating row is the unit of consistency. Movie aggregates and the
/// rater's preference vector are refreshed afterwards by separate tasks whose
/// failures are logged and never reach the caller.
#[derive(Clone)]
pub struct RatingService {
    ratings: Arc<dyn RatingStore>,
    users: Arc<dyn UserStore>,
    catalog: Arc<dyn MovieCatalog>,
    aggregator: BayesianRatingAggregator,
    preferences: PreferenceVectorManager,
    cache: Arc<dyn ResultCache>,
}

impl RatingService {
    pub fn new(
        ratings: Arc<dyn RatingStore>,
        users: Arc<dyn UserStore>,
        catalog: Arc<dyn MovieCatalog>,
        aggregator: BayesianRatingAggregator,
        preferences: PreferenceVectorManager,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            ratings,
            users,
            catalog,
            aggregator,
            preferences,
            cache,
        }
    }

    async fn ensure_user(&self, user_id: UserId) -> AppResult<()> {
        match self.users.find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("User {} not found", user_id))),
        }
    }

    async fn ensure_movie(&self, movie_id: MovieId) -> AppResult<()> {
        match self.catalog.find_by_id(movie_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("Movie {} not found", movie_id))),
        }
    }

    /// Creates or replaces the user's rating of the movie
    pub async fn rate_movie(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        value: i16,
        review: Option<String>,
    ) -> AppResult<(Rating, PostWriteTasks)> {
        Rating::validate_value(value)?;
        self.ensure_user(user_id).await?;
        self.ensure_movie(movie_id).await?;

        let rating = self.ratings.upsert(user_id, movie_id, value, review).await?;

        tracing::info!(user_id, movie_id, rating = value, "Rating saved");

        let tasks = self.after_write(user_id, movie_id).await;
        Ok((rating, tasks))
    }

    pub async fn delete_rating(
        &self,
        user_id: UserId,
        movie_id: MovieId,
    ) -> AppResult<PostWriteTasks> {
        if !self.ratings.delete(user_id, movie_id).await? {
            return Err(AppError::NotFound(format!(
                "Rating by user {} for movie {} not found",
                user_id, movie_id
            )));
        }

        tracing::info!(user_id, movie_id, "Rating deleted");

        Ok(self.after_write(user_id, movie_id).await)
    }

    pub async fn user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        self.ensure_user(user_id).await?;
        self.ratings.find_by_user(user_id).await
    }

    pub async fn movie_ratings(&self, movie_id: MovieId) -> AppResult<Vec<Rating>> {
        self.ensure_movie(movie_id).await?;
        self.ratings.find_by_movie(movie_id).await
    }

    /// Invalidates cached results and dispatches the two refresh tasks
    async fn after_write(&self, user_id: UserId, movie_id: MovieId) -> PostWriteTasks {
        invalidate_cache(self.cache.as_ref()).await;

        let aggregator = self.aggregator.clone();
        let cache = self.cache.clone();
        let stats = tokio::spawn(async move {
            match aggregator.refresh_movie_stats(movie_id).await {
                Ok(_) => {
                    invalidate_cache(cache.as_ref()).await;
                    true
                }
                Err(e) => {
                    tracing::error!(movie_id, error = %e, "Failed to refresh movie stats");
                    false
                }
            }
        });

        let preferences = self.preferences.clone();
        let cache = self.cache.clone();
        let vector = tokio::spawn(async move {
            match preferences.recompute(user_id).await {
                Ok(Some(_)) => {
                    invalidate_cache(cache.as_ref()).await;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    tracing::error!(user_id, error = %e, "Failed to recompute preference vector");
                    false
                }
            }
        });

        PostWriteTasks { stats, vector }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BayesianPrior, RatingWeights};
    use crate::db::repo::{MockMovieCatalog, MockRatingStore, MockUserStore};
    use crate::db::{CacheKey, MemoryCache};
    use crate::models::{Movie, MovieRatingStats, User};
    use chrono::Utc;
    use std::time::Duration;

    fn saved_rating(user_id: UserId, movie_id: MovieId, value: i16) -> Rating {
        let now = Utc::now();
        Rating {
            id: 1,
            user_id,
            movie_id,
            rating: value,
            review: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service(
        ratings: MockRatingStore,
        users: MockUserStore,
        catalog: MockMovieCatalog,
        cache: Arc<MemoryCache>,
    ) -> RatingService {
        let ratings: Arc<dyn RatingStore> = Arc::new(ratings);
        let users: Arc<dyn UserStore> = Arc::new(users);
        let catalog: Arc<dyn MovieCatalog> = Arc::new(catalog);

        let aggregator = BayesianRatingAggregator::new(
            BayesianPrior::default(),
            catalog.clone(),
            ratings.clone(),
        );
        let preferences = PreferenceVectorManager::new(
            users.clone(),
            ratings.clone(),
            catalog.clone(),
            RatingWeights::default(),
            2,
            chrono::Duration::days(1),
        );

        RatingService::new(ratings, users, catalog, aggregator, preferences, cache)
    }

    fn catalog_with_movie() -> MockMovieCatalog {
        let mut catalog = MockMovieCatalog::new();
        catalog.expect_find_by_id().returning(|id| {
            let mut movie = Movie::new(id, 550, "Fight Club");
            movie.embedding = Some(vec![1.0, 0.0]);
            Ok(Some(movie))
        });
        catalog.expect_find_by_ids().returning(|ids| {
            Ok(ids
                .into_iter()
                .map(|id| {
                    let mut movie = Movie::new(id, 550, "Fight Club");
                    movie.embedding = Some(vec![1.0, 0.0]);
                    movie
                })
                .collect())
        });
        catalog.expect_refresh_rating_stats().returning(|_| {
            Ok(MovieRatingStats {
                avg_rating: Some(4.0),
                rating_count: 1,
            })
        });
        catalog
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_rating_before_any_write() {
        let mut ratings = MockRatingStore::new();
        ratings.expect_upsert().never();

        let err = service(
            ratings,
            MockUserStore::new(),
            MockMovieCatalog::new(),
            Arc::new(MemoryCache::new(10)),
        )
        .rate_movie(1, 1, 6, None)
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_movie_is_not_found() {
        let mut users = MockUserStore::new();
        users
            .expect_find_user()
            .returning(|id| Ok(Some(User::new(id, "hank"))));
        let mut catalog = MockMovieCatalog::new();
        catalog.expect_find_by_id().returning(|_| Ok(None));
        let mut ratings = MockRatingStore::new();
        ratings.expect_upsert().never();

        let err = service(ratings, users, catalog, Arc::new(MemoryCache::new(10)))
            .rate_movie(1, 77, 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rate_movie_refreshes_stats_and_vector() {
        let mut users = MockUserStore::new();
        users
            .expect_find_user()
            .returning(|id| Ok(Some(User::new(id, "ivy"))));
        users
            .expect_save_preference_vector()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut ratings = MockRatingStore::new();
        ratings
            .expect_upsert()
            .returning(|user_id, movie_id, value, _| Ok(saved_rating(user_id, movie_id, value)));
        ratings
            .expect_find_by_user()
            .returning(|user_id| Ok(vec![saved_rating(user_id, 3, 4)]));

        let cache = Arc::new(MemoryCache::new(10));
        let key = CacheKey::UserRecommendations {
            user_id: 1,
            limit: 12,
        };
        cache.put_raw(&key, "[]".to_string(), Duration::from_secs(60));

        let (rating, tasks) = service(ratings, users, catalog_with_movie(), cache.clone())
            .rate_movie(1, 3, 4, Some("Great".to_string()))
            .await
            .unwrap();

        assert_eq!(rating.rating, 4);
        assert_eq!(cache.stats().len, 0);
        assert_eq!(
            tasks.join().await,
            PostWriteOutcome {
                stats_refreshed: true,
                vector_recomputed: true,
            }
        );
    }

    #[tokio::test]
    async fn test_vector_failure_does_not_fail_write_or_stats() {
        let mut users = MockUserStore::new();
        users
            .expect_find_user()
            .returning(|id| Ok(Some(User::new(id, "jack"))));
        users
            .expect_save_preference_vector()
            .returning(|_, _, _| Err(AppError::Dependency("vector store down".to_string())));

        let mut ratings = MockRatingStore::new();
        ratings
            .expect_upsert()
            .returning(|user_id, movie_id, value, _| Ok(saved_rating(user_id, movie_id, value)));
        ratings
            .expect_find_by_user()
            .returning(|user_id| Ok(vec![saved_rating(user_id, 3, 5)]));

        let (rating, tasks) = service(
            ratings,
            users,
            catalog_with_movie(),
            Arc::new(MemoryCache::new(10)),
        )
        .rate_movie(1, 3, 5, None)
        .await
        .unwrap();

        assert_eq!(rating.movie_id, 3);
        let outcome = tasks.join().await;
        assert!(outcome.stats_refreshed);
        assert!(!outcome.vector_recomputed);
    }

    #[tokio::test]
    async fn test_stats_failure_does_not_block_vector() {
        let mut users = MockUserStore::new();
        users
            .expect_find_user()
            .returning(|id| Ok(Some(User::new(id, "kate"))));
        users
            .expect_save_preference_vector()
            .returning(|_, _, _| Ok(()));

        let mut ratings = MockRatingStore::new();
        ratings.expect_delete().returning(|_, _| Ok(true));
        ratings
            .expect_find_by_user()
            .returning(|user_id| Ok(vec![saved_rating(user_id, 9, 3)]));

        let mut catalog = MockMovieCatalog::new();
        catalog.expect_find_by_ids().returning(|ids| {
            Ok(ids
                .into_iter()
                .map(|id| {
                    let mut movie = Movie::new(id, id, "Alien");
                    movie.embedding = Some(vec![0.0, 1.0]);
                    movie
                })
                .collect())
        });
        catalog
            .expect_refresh_rating_stats()
            .returning(|id| Err(AppError::NotFound(format!("Movie {} not found", id))));

        let tasks = service(ratings, users, catalog, Arc::new(MemoryCache::new(10)))
            .delete_rating(1, 3)
            .await
            .unwrap();

        let outcome = tasks.join().await;
        assert!(!outcome.stats_refreshed);
        assert!(outcome.vector_recomputed);
    }

    #[tokio::test]
    async fn test_delete_missing_rating_is_not_found() {
        let mut ratings = MockRatingStore::new();
        ratings.expect_delete().returning(|_, _| Ok(false));

        let err = service(
            ratings,
            MockUserStore::new(),
            MockMovieCatalog::new(),
            Arc::new(MemoryCache::new(10)),
        )
        .delete_rating(1, 3)
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
