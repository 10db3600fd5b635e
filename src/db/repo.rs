//! Collaborator contracts consumed by the recommendation engine.
//!
//! Each store hands back plain value collections; nothing is lazily loaded.
//! Both the Postgres store and the in-process store implement every trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{
    Genre, GenreId, KeywordId, Movie, MovieId, MovieRatingStats, Rating, User, UserId,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn find_by_user(&self, user_id: UserId) -> AppResult<Vec<Rating>>;
    async fn find_by_movie(&self, movie_id: MovieId) -> AppResult<Vec<Rating>>;
    async fn count_by_user(&self, user_id: UserId) -> AppResult<usize>;
    async fn count_by_movie(&self, movie_id: MovieId) -> AppResult<usize>;

    /// Inserts or replaces the rating for (user, movie)
    async fn upsert(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        value: i16,
        review: Option<String>,
    ) -> AppResult<Rating>;

    /// Returns false when no rating existed
    async fn delete(&self, user_id: UserId, movie_id: MovieId) -> AppResult<bool>;

    /// Other users who rated at least `min_common` of `movie_ids`
    async fn find_users_with_common_ratings(
        &self,
        user_id: UserId,
        movie_ids: Vec<MovieId>,
        min_common: usize,
    ) -> AppResult<Vec<UserId>>;

    async fn average_rating(&self, movie_id: MovieId) -> AppResult<Option<f64>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MovieCatalog: Send + Sync {
    async fn find_by_id(&self, movie_id: MovieId) -> AppResult<Option<Movie>>;

    /// Movies for the given ids, in no particular order; unknown ids are skipped
    async fn find_by_ids(&self, movie_ids: Vec<MovieId>) -> AppResult<Vec<Movie>>;

    /// Movies tagged with any of the genres, best rated first then most popular
    async fn find_by_genres(&self, genre_ids: Vec<GenreId>, limit: usize)
        -> AppResult<Vec<Movie>>;

    async fn find_popular(&self, limit: usize) -> AppResult<Vec<Movie>>;

    /// Cosine nearest neighbours among movies that have an embedding
    async fn find_by_embedding_knn(
        &self,
        vector: Vec<f32>,
        exclude_ids: Vec<MovieId>,
        limit: usize,
    ) -> AppResult<Vec<(MovieId, f64)>>;

    /// Recomputes avg/count from the ratings table in one atomic step
    async fn refresh_rating_stats(&self, movie_id: MovieId) -> AppResult<MovieRatingStats>;

    async fn save_embedding(
        &self,
        movie_id: MovieId,
        embedding: Vec<f32>,
        generated_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Replaces the movie's genres and adjusts each genre's movie_count in the same transaction
    async fn set_movie_genres(&self, movie_id: MovieId, genre_ids: Vec<GenreId>) -> AppResult<()>;

    /// Same bookkeeping as `set_movie_genres`, for keywords
    async fn set_movie_keywords(
        &self,
        movie_id: MovieId,
        keyword_ids: Vec<KeywordId>,
    ) -> AppResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenreStore: Send + Sync {
    async fn find_genres(&self, genre_ids: Vec<GenreId>) -> AppResult<Vec<Genre>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn find_bookmarked_movie_ids(&self, user_id: UserId) -> AppResult<Vec<MovieId>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> AppResult<Option<User>>;

    async fn save_preference_vector(
        &self,
        user_id: UserId,
        embedding: Vec<f32>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()>;
}
