use serde::{Deserialize, Serialize};

pub mod movie;
pub mod rating;
pub mod user;

pub use movie::{
    Genre, Keyword, Movie, MovieRatingStats, MovieSummary, SimilarMovie, SimilarityResult,
};
pub use rating::{Rating, RatingRequest};
pub use user::{PreferenceVector, User};

pub type UserId = i64;
pub type MovieId = i64;
pub type GenreId = i64;
pub type KeywordId = i64;

/// Whether a user has enough activity to get personalised recommendations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecommendationStatus {
    pub has_recommendations: bool,
    pub total_ratings: usize,
}

impl RecommendationStatus {
    pub fn from_rating_count(total_ratings: usize) -> Self {
        Self {
            has_recommendations: total_ratings > 0,
            total_ratings,
        }
    }
}
