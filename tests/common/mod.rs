#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;

use cinerec::config::EngineConfig;
use cinerec::db::{MemoryCache, MemoryStore, MovieCatalog, RatingStore};
use cinerec::models::{GenreId, Movie, MovieId, User, UserId};
use cinerec::services::providers::EmbeddingProvider;
use cinerec::services::{RecommendationEngine, Stores};

pub const DRAMA: GenreId = 18;
pub const COMEDY: GenreId = 35;
pub const SCI_FI: GenreId = 878;

const VOCABULARY: [&str; 4] = ["space", "love", "crime", "laugh"];

/// Embeds text as keyword counts over a tiny fixed vocabulary
///
/// Text without any vocabulary word embeds to the zero vector, which the
/// engine treats the same as a provider outage.
pub struct KeywordEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for KeywordEmbeddingProvider {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        VOCABULARY
            .iter()
            .map(|word| text.matches(word).count() as f32)
            .collect()
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        embedding_dimension: VOCABULARY.len(),
        ..EngineConfig::default()
    }
}

pub fn build_engine(store: Arc<MemoryStore>) -> RecommendationEngine {
    RecommendationEngine::new(
        Stores::shared(store),
        Arc::new(KeywordEmbeddingProvider),
        Arc::new(MemoryCache::new(100)),
        engine_config(),
    )
}

pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_genre(DRAMA, "Drama").await;
    store.insert_genre(COMEDY, "Comedy").await;
    store.insert_genre(SCI_FI, "Science Fiction").await;
    store
}

pub fn movie(id: MovieId, title: &str, genres: &[GenreId], popularity: f64) -> Movie {
    let mut movie = Movie::new(id, 1000 + id, title);
    movie.genre_ids = genres.to_vec();
    movie.popularity = Some(popularity);
    movie
}

pub async fn add_user(store: &MemoryStore, id: UserId) {
    store.insert_user(User::new(id, format!("user{}", id))).await;
}

/// Writes a rating straight to the store and refreshes the movie aggregates
pub async fn seed_rating(store: &MemoryStore, user_id: UserId, movie_id: MovieId, value: i16) {
    store.upsert(user_id, movie_id, value, None).await.unwrap();
    store.refresh_rating_stats(movie_id).await.unwrap();
}
