use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{GenreId, KeywordId, MovieId};

/// A catalog movie as consumed by the engine
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Movie {
    pub id: MovieId,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub popularity: Option<f64>,
    pub genre_ids: Vec<GenreId>,
    pub keywords: Vec<String>,
    /// Raw mean of all ratings, `None` until the first rating lands
    pub avg_rating: Option<f64>,
    pub rating_count: i32,
    pub embedding: Option<Vec<f32>>,
    pub embedding_generated_at: Option<DateTime<Utc>>,
}

impl Movie {
    /// Minimal movie used by stores and tests
    pub fn new(id: MovieId, tmdb_id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            tmdb_id,
            title: title.into(),
            overview: None,
            poster_path: None,
            release_date: None,
            popularity: None,
            genre_ids: Vec::new(),
            keywords: Vec::new(),
            avg_rating: None,
            rating_count: 0,
            embedding: None,
            embedding_generated_at: None,
        }
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Genre {
    pub id: GenreId,
    pub name: String,
    /// Denormalised number of movies tagged with this genre
    pub movie_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Keyword {
    pub id: KeywordId,
    pub name: String,
    pub movie_count: i32,
}

/// Aggregate rating stats persisted on a movie
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MovieRatingStats {
    pub avg_rating: Option<f64>,
    pub rating_count: i64,
}

/// Transient result of a nearest-neighbour query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SimilarityResult {
    pub movie_id: MovieId,
    pub similarity: f64,
}

/// Movie as returned to callers of the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovieSummary {
    pub id: MovieId,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub avg_rating: Option<f64>,
    pub rating_count: i32,
    pub bayesian_rating: f64,
}

impl MovieSummary {
    pub fn new(movie: Movie, bayesian_rating: f64) -> Self {
        Self {
            id: movie.id,
            tmdb_id: movie.tmdb_id,
            title: movie.title,
            overview: movie.overview,
            poster_path: movie.poster_path,
            release_date: movie.release_date,
            avg_rating: movie.avg_rating,
            rating_count: movie.rating_count,
            bayesian_rating,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarMovie {
    #[serde(flatten)]
    pub movie: MovieSummary,
    pub similarity: f64,
}
