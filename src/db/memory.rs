//! In-process implementation of the engine collaborators.
//!
//! Backs local runs without Postgres and the integration tests. All mutation
//! happens under a single write lock, so aggregate refreshes are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::repo::{BookmarkStore, GenreStore, MovieCatalog, RatingStore, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Genre, GenreId, Keyword, KeywordId, Movie, MovieId, MovieRatingStats, PreferenceVector,
    Rating, User, UserId,
};
use crate::services::vector;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<UserId, User>,
    movies: BTreeMap<MovieId, Movie>,
    genres: BTreeMap<GenreId, Genre>,
    keywords: BTreeMap<KeywordId, Keyword>,
    movie_keywords: BTreeMap<MovieId, BTreeSet<KeywordId>>,
    ratings: BTreeMap<(UserId, MovieId), Rating>,
    bookmarks: BTreeSet<(UserId, MovieId)>,
    next_rating_id: i64,
}

impl MemoryStoreInner {
    fn adjust_genre_counts(&mut self, genre_ids: &[GenreId], delta: i32) {
        for genre_id in genre_ids {
            if let Some(genre) = self.genres.get_mut(genre_id) {
                genre.movie_count = (genre.movie_count + delta).max(0);
            }
        }
    }

    fn adjust_keyword_counts(&mut self, keyword_ids: &[KeywordId], delta: i32) {
        for keyword_id in keyword_ids {
            if let Some(keyword) = self.keywords.get_mut(keyword_id) {
                keyword.movie_count = (keyword.movie_count + delta).max(0);
            }
        }
    }
}

/// (removed, added) when moving from `current` to `wanted`
fn link_changes(current: &BTreeSet<i64>, wanted: &BTreeSet<i64>) -> (Vec<i64>, Vec<i64>) {
    (
        current.difference(wanted).copied().collect(),
        wanted.difference(current).copied().collect(),
    )
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id, user);
    }

    pub async fn insert_genre(&self, id: GenreId, name: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.genres.insert(
            id,
            Genre {
                id,
                name: name.into(),
                movie_count: 0,
            },
        );
    }

    /// Inserts or replaces a movie, keeping genre counts in step
    pub async fn insert_movie(&self, movie: Movie) {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.movies.remove(&movie.id) {
            inner.adjust_genre_counts(&previous.genre_ids, -1);
        }
        inner.adjust_genre_counts(&movie.genre_ids, 1);
        inner.movies.insert(movie.id, movie);
    }

    pub async fn add_bookmark(&self, user_id: UserId, movie_id: MovieId) {
        let mut inner = self.inner.write().await;
        inner.bookmarks.insert((user_id, movie_id));
    }

    pub async fn insert_keyword(&self, id: KeywordId, name: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.keywords.insert(
            id,
            Keyword {
                id,
                name: name.into(),
                movie_count: 0,
            },
        );
    }

    pub async fn keyword(&self, keyword_id: KeywordId) -> Option<Keyword> {
        self.inner.read().await.keywords.get(&keyword_id).cloned()
    }

    pub async fn genre(&self, genre_id: GenreId) -> Option<Genre> {
        self.inner.read().await.genres.get(&genre_id).cloned()
    }
}

fn cmp_desc_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn find_by_user(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let inner = self.inner.read().await;
        Ok(inner
            .ratings
            .range((user_id, MovieId::MIN)..=(user_id, MovieId::MAX))
            .map(|(_, rating)| rating.clone())
            .collect())
    }

    async fn find_by_movie(&self, movie_id: MovieId) -> AppResult<Vec<Rating>> {
        let inner = self.inner.read().await;
        Ok(inner
            .ratings
            .values()
            .filter(|r| r.movie_id == movie_id)
            .cloned()
            .collect())
    }

    async fn count_by_user(&self, user_id: UserId) -> AppResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .ratings
            .range((user_id, MovieId::MIN)..=(user_id, MovieId::MAX))
            .count())
    }

    async fn count_by_movie(&self, movie_id: MovieId) -> AppResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .ratings
            .values()
            .filter(|r| r.movie_id == movie_id)
            .count())
    }

    async fn upsert(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        value: i16,
        review: Option<String>,
    ) -> AppResult<Rating> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(existing) = inner.ratings.get_mut(&(user_id, movie_id)) {
            existing.rating = value;
            existing.review = review;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        inner.next_rating_id += 1;
        let rating = Rating {
            id: inner.next_rating_id,
            user_id,
            movie_id,
            rating: value,
            review,
            created_at: now,
            updated_at: now,
        };
        inner.ratings.insert((user_id, movie_id), rating.clone());
        Ok(rating)
    }

    async fn delete(&self, user_id: UserId, movie_id: MovieId) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.ratings.remove(&(user_id, movie_id)).is_some())
    }

    async fn find_users_with_common_ratings(
        &self,
        user_id: UserId,
        movie_ids: Vec<MovieId>,
        min_common: usize,
    ) -> AppResult<Vec<UserId>> {
        let wanted: BTreeSet<MovieId> = movie_ids.into_iter().collect();
        let inner = self.inner.read().await;

        let mut common: BTreeMap<UserId, usize> = BTreeMap::new();
        for (other, movie_id) in inner.ratings.keys() {
            if *other != user_id && wanted.contains(movie_id) {
                *common.entry(*other).or_insert(0) += 1;
            }
        }

        Ok(common
            .into_iter()
            .filter(|(_, count)| *count >= min_common)
            .map(|(other, _)| other)
            .collect())
    }

    async fn average_rating(&self, movie_id: MovieId) -> AppResult<Option<f64>> {
        let inner = self.inner.read().await;
        let values: Vec<f64> = inner
            .ratings
            .values()
            .filter(|r| r.movie_id == movie_id)
            .map(|r| f64::from(r.rating))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }
}

#[async_trait]
impl MovieCatalog for MemoryStore {
    async fn find_by_id(&self, movie_id: MovieId) -> AppResult<Option<Movie>> {
        Ok(self.inner.read().await.movies.get(&movie_id).cloned())
    }

    async fn find_by_ids(&self, movie_ids: Vec<MovieId>) -> AppResult<Vec<Movie>> {
        let inner = self.inner.read().await;
        let wanted: BTreeSet<MovieId> = movie_ids.into_iter().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| inner.movies.get(id).cloned())
            .collect())
    }

    async fn find_by_genres(
        &self,
        genre_ids: Vec<GenreId>,
        limit: usize,
    ) -> AppResult<Vec<Movie>> {
        let inner = self.inner.read().await;
        let mut movies: Vec<Movie> = inner
            .movies
            .values()
            .filter(|m| m.genre_ids.iter().any(|g| genre_ids.contains(g)))
            .cloned()
            .collect();

        movies.sort_by(|a, b| {
            cmp_desc_nulls_last(a.avg_rating, b.avg_rating)
                .then_with(|| cmp_desc_nulls_last(a.popularity, b.popularity))
                .then_with(|| a.id.cmp(&b.id))
        });
        movies.truncate(limit);
        Ok(movies)
    }

    async fn find_popular(&self, limit: usize) -> AppResult<Vec<Movie>> {
        let inner = self.inner.read().await;
        let mut movies: Vec<Movie> = inner
            .movies
            .values()
            .filter(|m| m.popularity.is_some())
            .cloned()
            .collect();

        movies.sort_by(|a, b| {
            cmp_desc_nulls_last(a.popularity, b.popularity).then_with(|| a.id.cmp(&b.id))
        });
        movies.truncate(limit);
        Ok(movies)
    }

    async fn find_by_embedding_knn(
        &self,
        query: Vec<f32>,
        exclude_ids: Vec<MovieId>,
        limit: usize,
    ) -> AppResult<Vec<(MovieId, f64)>> {
        let inner = self.inner.read().await;
        let candidates = inner
            .movies
            .values()
            .filter_map(|m| m.embedding.as_deref().map(|e| (m.id, e)));

        let results = vector::nearest_neighbors(&query, candidates, &exclude_ids, limit)?;
        Ok(results
            .into_iter()
            .map(|r| (r.movie_id, r.similarity))
            .collect())
    }

    async fn refresh_rating_stats(&self, movie_id: MovieId) -> AppResult<MovieRatingStats> {
        let mut inner = self.inner.write().await;
        let (sum, count) = inner
            .ratings
            .values()
            .filter(|r| r.movie_id == movie_id)
            .fold((0.0, 0i64), |(sum, count), r| {
                (sum + f64::from(r.rating), count + 1)
            });

        let movie = inner
            .movies
            .get_mut(&movie_id)
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", movie_id)))?;

        let avg_rating = (count > 0).then(|| sum / count as f64);
        movie.avg_rating = avg_rating;
        movie.rating_count = count as i32;

        Ok(MovieRatingStats {
            avg_rating,
            rating_count: count,
        })
    }

    async fn save_embedding(
        &self,
        movie_id: MovieId,
        embedding: Vec<f32>,
        generated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let movie = inner
            .movies
            .get_mut(&movie_id)
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", movie_id)))?;
        movie.embedding = Some(embedding);
        movie.embedding_generated_at = Some(generated_at);
        Ok(())
    }

    async fn set_movie_genres(&self, movie_id: MovieId, genre_ids: Vec<GenreId>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let current: BTreeSet<GenreId> = inner
            .movies
            .get(&movie_id)
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", movie_id)))?
            .genre_ids
            .iter()
            .copied()
            .collect();
        let wanted: BTreeSet<GenreId> = genre_ids.into_iter().collect();

        let (removed, added) = link_changes(&current, &wanted);
        inner.adjust_genre_counts(&removed, -1);
        inner.adjust_genre_counts(&added, 1);

        if let Some(movie) = inner.movies.get_mut(&movie_id) {
            movie.genre_ids = wanted.into_iter().collect();
        }
        Ok(())
    }

    async fn set_movie_keywords(
        &self,
        movie_id: MovieId,
        keyword_ids: Vec<KeywordId>,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.movies.contains_key(&movie_id) {
            return Err(AppError::NotFound(format!("Movie {} not found", movie_id)));
        }

        let current = inner.movie_keywords.get(&movie_id).cloned().unwrap_or_default();
        let wanted: BTreeSet<KeywordId> = keyword_ids.into_iter().collect();

        let (removed, added) = link_changes(&current, &wanted);
        inner.adjust_keyword_counts(&removed, -1);
        inner.adjust_keyword_counts(&added, 1);

        let mut names: Vec<String> = wanted
            .iter()
            .filter_map(|id| inner.keywords.get(id).map(|k| k.name.clone()))
            .collect();
        names.sort();
        if let Some(movie) = inner.movies.get_mut(&movie_id) {
            movie.keywords = names;
        }
        inner.movie_keywords.insert(movie_id, wanted);
        Ok(())
    }
}

#[async_trait]
impl GenreStore for MemoryStore {
    async fn find_genres(&self, genre_ids: Vec<GenreId>) -> AppResult<Vec<Genre>> {
        let inner = self.inner.read().await;
        let wanted: BTreeSet<GenreId> = genre_ids.into_iter().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| inner.genres.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl BookmarkStore for MemoryStore {
    async fn find_bookmarked_movie_ids(&self, user_id: UserId) -> AppResult<Vec<MovieId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .bookmarks
            .range((user_id, MovieId::MIN)..=(user_id, MovieId::MAX))
            .map(|(_, movie_id)| *movie_id)
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: UserId) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn save_preference_vector(
        &self,
        user_id: UserId,
        embedding: Vec<f32>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        user.preference = Some(PreferenceVector {
            embedding,
            updated_at,
        });
        Ok(())
    }
}
