use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::db::{GenreStore, MovieCatalog};
use crate::error::{AppError, AppResult};
use crate::models::{Movie, MovieId};
use crate::services::providers::EmbeddingProvider;
use crate::services::vector;

const MAX_KEYWORDS: usize = 10;
const REGENERATE_AFTER_DAYS: i64 = 90;

/// Text fed to the embedding provider for a movie
///
/// Format: `"<title>. <overview>. Genres: a, b. Keywords: k1, k2."`, with
/// empty parts left out and at most ten keywords.
pub fn build_movie_text(movie: &Movie, genre_names: &[String]) -> String {
    let mut text = String::new();

    if !movie.title.is_empty() {
        text.push_str(&movie.title);
        text.push_str(". ");
    }

    if let Some(overview) = movie.overview.as_deref().filter(|o| !o.is_empty()) {
        text.push_str(overview);
        text.push_str(". ");
    }

    if !genre_names.is_empty() {
        text.push_str("Genres: ");
        text.push_str(&genre_names.join(", "));
        text.push_str(". ");
    }

    if !movie.keywords.is_empty() {
        let keywords: Vec<&str> = movie
            .keywords
            .iter()
            .take(MAX_KEYWORDS)
            .map(String::as_str)
            .collect();
        text.push_str("Keywords: ");
        text.push_str(&keywords.join(", "));
        text.push_str(". ");
    }

    text.trim().to_string()
}

/// Absent, undated, or older than 90 days
pub fn needs_regeneration(movie: &Movie, now: DateTime<Utc>) -> bool {
    if !movie.has_embedding() {
        return true;
    }
    match movie.embedding_generated_at {
        Some(generated_at) => generated_at < now - Duration::days(REGENERATE_AFTER_DAYS),
        None => true,
    }
}

/// Generates and stores movie embeddings
#[derive(Clone)]
pub struct MovieEmbeddingService {
    catalog: Arc<dyn MovieCatalog>,
    genres: Arc<dyn GenreStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl MovieEmbeddingService {
    pub fn new(
        catalog: Arc<dyn MovieCatalog>,
        genres: Arc<dyn GenreStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            catalog,
            genres,
            provider,
        }
    }

    /// Embeds the movie's text and stores the vector
    ///
    /// Returns false when the provider degraded to the zero vector; nothing is
    /// stored in that case and any previous embedding is kept.
    pub async fn generate(&self, movie_id: MovieId) -> AppResult<bool> {
        let movie = self
            .catalog
            .find_by_id(movie_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", movie_id)))?;

        tracing::info!(movie_id, title = %movie.title, "Generating movie embedding");

        let genre_names: Vec<String> = self
            .genres
            .find_genres(movie.genre_ids.clone())
            .await?
            .into_iter()
            .map(|g| g.name)
            .collect();
        let text = build_movie_text(&movie, &genre_names);

        tracing::debug!(movie_id, chars = text.len(), "Built movie text");

        let embedding = self.provider.embed(&text).await;
        if vector::is_zero(&embedding) {
            tracing::warn!(
                movie_id,
                provider = self.provider.name(),
                "Provider returned no usable embedding, keeping previous value"
            );
            return Ok(false);
        }
        vector::ensure_dimension(&embedding, self.provider.dimension())?;

        self.catalog
            .save_embedding(movie_id, embedding, Utc::now())
            .await?;

        tracing::info!(movie_id, "Movie embedding saved");
        Ok(true)
    }

    /// Regenerates only when the stored embedding is missing or expired
    pub async fn generate_if_needed(&self, movie_id: MovieId) -> AppResult<bool> {
        let movie = self
            .catalog
            .find_by_id(movie_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", movie_id)))?;

        if !needs_regeneration(&movie, Utc::now()) {
            tracing::debug!(movie_id, "Movie embedding is fresh");
            return Ok(false);
        }

        self.generate(movie_id).await
    }
}
