pub mod bayesian;
pub mod collaborative;
pub mod content;
pub mod engine;
pub mod hybrid;
pub mod movie_embeddings;
pub mod popular;
pub mod preference_vector;
pub mod providers;
pub mod ratings;
pub mod similarity;
pub mod vector;

pub use engine::{RecommendationEngine, Stores};
