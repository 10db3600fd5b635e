use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::BTreeSet;

use crate::db::repo::{BookmarkStore, GenreStore, MovieCatalog, RatingStore, UserStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Genre, GenreId, KeywordId, Movie, MovieId, MovieRatingStats, PreferenceVector, Rating, User,
    UserId,
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the bundled schema migrations (requires the pgvector extension)
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// Embeddings live in pgvector columns and cross the wire as real[].
const MOVIE_COLUMNS: &str = r#"
    m.id, m.tmdb_id, m.title, m.overview, m.poster_path, m.release_date, m.popularity,
    COALESCE(
        (SELECT array_agg(mg.genre_id ORDER BY mg.genre_id) FROM movie_genres mg WHERE mg.movie_id = m.id),
        '{}'
    ) AS genre_ids,
    COALESCE(
        (SELECT array_agg(k.name ORDER BY k.name)
         FROM movie_keywords mk JOIN keywords k ON k.id = mk.keyword_id
         WHERE mk.movie_id = m.id),
        '{}'
    ) AS keywords,
    m.avg_rating, m.rating_count,
    m.embedding::real[] AS embedding,
    m.embedding_generated_at
"#;

const RATING_COLUMNS: &str = "id, user_id, movie_id, rating, review, created_at, updated_at";

/// A movie association table whose target rows carry a `movie_count`
struct MovieLinks {
    link_table: &'static str,
    link_column: &'static str,
    count_table: &'static str,
}

const GENRE_LINKS: MovieLinks = MovieLinks {
    link_table: "movie_genres",
    link_column: "genre_id",
    count_table: "genres",
};

const KEYWORD_LINKS: MovieLinks = MovieLinks {
    link_table: "movie_keywords",
    link_column: "keyword_id",
    count_table: "keywords",
};

/// Postgres-backed implementation of every engine collaborator
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replaces the movie's links and moves each target's `movie_count` by
    /// the difference, all in one transaction holding the movie row lock
    async fn replace_links(
        &self,
        movie_id: MovieId,
        ids: Vec<i64>,
        links: &MovieLinks,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM movies WHERE id = $1 FOR UPDATE")
                .bind(movie_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("Movie {} not found", movie_id)));
        }

        let current: BTreeSet<i64> = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT {} FROM {} WHERE movie_id = $1",
            links.link_column, links.link_table
        ))
        .bind(movie_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();
        let wanted: BTreeSet<i64> = ids.into_iter().collect();

        let removed: Vec<i64> = current.difference(&wanted).copied().collect();
        let added: Vec<i64> = wanted.difference(&current).copied().collect();

        if !removed.is_empty() {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE movie_id = $1 AND {} = ANY($2)",
                links.link_table, links.link_column
            ))
            .bind(movie_id)
            .bind(&removed)
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!(
                "UPDATE {} SET movie_count = GREATEST(movie_count - 1, 0) WHERE id = ANY($1)",
                links.count_table
            ))
            .bind(&removed)
            .execute(&mut *tx)
            .await?;
        }

        if !added.is_empty() {
            sqlx::query(&format!(
                "INSERT INTO {} (movie_id, {}) SELECT $1, UNNEST($2::bigint[])",
                links.link_table, links.link_column
            ))
            .bind(movie_id)
            .bind(&added)
            .execute(&mut *tx)
            .await?;
            sqlx::query(&format!(
                "UPDATE {} SET movie_count = movie_count + 1 WHERE id = ANY($1)",
                links.count_table
            ))
            .bind(&added)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            movie_id,
            table = links.link_table,
            added = added.len(),
            removed = removed.len(),
            "Updated movie associations"
        );
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    preference_vector: Option<Vec<f32>>,
    preference_vector_updated_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let preference = match (row.preference_vector, row.preference_vector_updated_at) {
            (Some(embedding), Some(updated_at)) => Some(PreferenceVector {
                embedding,
                updated_at,
            }),
            _ => None,
        };

        User {
            id: row.id,
            username: row.username,
            preference,
        }
    }
}

#[async_trait]
impl RatingStore for PgStore {
    async fn find_by_user(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let sql = format!(
            "SELECT {} FROM ratings WHERE user_id = $1 ORDER BY movie_id",
            RATING_COLUMNS
        );
        let ratings = sqlx::query_as::<_, Rating>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ratings)
    }

    async fn find_by_movie(&self, movie_id: MovieId) -> AppResult<Vec<Rating>> {
        let sql = format!(
            "SELECT {} FROM ratings WHERE movie_id = $1 ORDER BY user_id",
            RATING_COLUMNS
        );
        let ratings = sqlx::query_as::<_, Rating>(&sql)
            .bind(movie_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ratings)
    }

    async fn count_by_user(&self, user_id: UserId) -> AppResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn count_by_movie(&self, movie_id: MovieId) -> AppResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE movie_id = $1")
            .bind(movie_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn upsert(
        &self,
        user_id: UserId,
        movie_id: MovieId,
        value: i16,
        review: Option<String>,
    ) -> AppResult<Rating> {
        let sql = format!(
            r#"
            INSERT INTO ratings (user_id, movie_id, rating, review)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, movie_id)
            DO UPDATE SET rating = EXCLUDED.rating, review = EXCLUDED.review, updated_at = now()
            RETURNING {}
            "#,
            RATING_COLUMNS
        );
        let rating = sqlx::query_as::<_, Rating>(&sql)
            .bind(user_id)
            .bind(movie_id)
            .bind(value)
            .bind(review)
            .fetch_one(&self.pool)
            .await?;
        Ok(rating)
    }

    async fn delete(&self, user_id: UserId, movie_id: MovieId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM ratings WHERE user_id = $1 AND movie_id = $2")
            .bind(user_id)
            .bind(movie_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_users_with_common_ratings(
        &self,
        user_id: UserId,
        movie_ids: Vec<MovieId>,
        min_common: usize,
    ) -> AppResult<Vec<UserId>> {
        if movie_ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT user_id
            FROM ratings
            WHERE movie_id = ANY($2) AND user_id <> $1
            GROUP BY user_id
            HAVING COUNT(DISTINCT movie_id) >= $3
            ORDER BY user_id
            "#,
        )
        .bind(user_id)
        .bind(&movie_ids)
        .bind(min_common as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn average_rating(&self, movie_id: MovieId) -> AppResult<Option<f64>> {
        let avg: Option<f64> =
            sqlx::query_scalar("SELECT AVG(rating)::float8 FROM ratings WHERE movie_id = $1")
                .bind(movie_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(avg)
    }
}

#[async_trait]
impl MovieCatalog for PgStore {
    async fn find_by_id(&self, movie_id: MovieId) -> AppResult<Option<Movie>> {
        let sql = format!("SELECT {} FROM movies m WHERE m.id = $1", MOVIE_COLUMNS);
        let movie = sqlx::query_as::<_, Movie>(&sql)
            .bind(movie_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(movie)
    }

    async fn find_by_ids(&self, movie_ids: Vec<MovieId>) -> AppResult<Vec<Movie>> {
        if movie_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM movies m WHERE m.id = ANY($1) ORDER BY m.id",
            MOVIE_COLUMNS
        );
        let movies = sqlx::query_as::<_, Movie>(&sql)
            .bind(&movie_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(movies)
    }

    async fn find_by_genres(
        &self,
        genre_ids: Vec<GenreId>,
        limit: usize,
    ) -> AppResult<Vec<Movie>> {
        if genre_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {}
            FROM movies m
            WHERE EXISTS (
                SELECT 1 FROM movie_genres mg
                WHERE mg.movie_id = m.id AND mg.genre_id = ANY($1)
            )
            ORDER BY m.avg_rating DESC NULLS LAST, m.popularity DESC NULLS LAST, m.id
            LIMIT $2
            "#,
            MOVIE_COLUMNS
        );
        let movies = sqlx::query_as::<_, Movie>(&sql)
            .bind(&genre_ids)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(movies)
    }

    async fn find_popular(&self, limit: usize) -> AppResult<Vec<Movie>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM movies m
            WHERE m.popularity IS NOT NULL
            ORDER BY m.popularity DESC, m.id
            LIMIT $1
            "#,
            MOVIE_COLUMNS
        );
        let movies = sqlx::query_as::<_, Movie>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(movies)
    }

    async fn find_by_embedding_knn(
        &self,
        vector: Vec<f32>,
        exclude_ids: Vec<MovieId>,
        limit: usize,
    ) -> AppResult<Vec<(MovieId, f64)>> {
        let rows = sqlx::query_as::<_, (i64, f64)>(
            r#"
            SELECT m.id, 1 - (m.embedding <=> $1::real[]::vector) AS similarity
            FROM movies m
            WHERE m.embedding IS NOT NULL
              AND NOT (m.id = ANY($2))
            ORDER BY m.embedding <=> $1::real[]::vector, m.id
            LIMIT $3
            "#,
        )
        .bind(&vector)
        .bind(&exclude_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn refresh_rating_stats(&self, movie_id: MovieId) -> AppResult<MovieRatingStats> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent refreshers of the same movie; the
        // aggregate below then reads a snapshot taken after the lock.
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM movies WHERE id = $1 FOR UPDATE")
                .bind(movie_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!("Movie {} not found", movie_id)));
        }

        let (avg_rating, rating_count): (Option<f64>, i64) = sqlx::query_as(
            "SELECT AVG(rating)::float8, COUNT(*) FROM ratings WHERE movie_id = $1",
        )
        .bind(movie_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE movies SET avg_rating = $2, rating_count = $3 WHERE id = $1")
            .bind(movie_id)
            .bind(avg_rating)
            .bind(rating_count as i32)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(MovieRatingStats {
            avg_rating,
            rating_count,
        })
    }

    async fn save_embedding(
        &self,
        movie_id: MovieId,
        embedding: Vec<f32>,
        generated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE movies SET embedding = $2::real[]::vector, embedding_generated_at = $3 WHERE id = $1",
        )
        .bind(movie_id)
        .bind(&embedding)
        .bind(generated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Movie {} not found", movie_id)));
        }
        Ok(())
    }

    async fn set_movie_genres(&self, movie_id: MovieId, genre_ids: Vec<GenreId>) -> AppResult<()> {
        self.replace_links(movie_id, genre_ids, &GENRE_LINKS).await
    }

    async fn set_movie_keywords(
        &self,
        movie_id: MovieId,
        keyword_ids: Vec<KeywordId>,
    ) -> AppResult<()> {
        self.replace_links(movie_id, keyword_ids, &KEYWORD_LINKS).await
    }
}

#[async_trait]
impl GenreStore for PgStore {
    async fn find_genres(&self, genre_ids: Vec<GenreId>) -> AppResult<Vec<Genre>> {
        let genres = sqlx::query_as::<_, Genre>(
            "SELECT id, name, movie_count FROM genres WHERE id = ANY($1) ORDER BY id",
        )
        .bind(&genre_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(genres)
    }
}

#[async_trait]
impl BookmarkStore for PgStore {
    async fn find_bookmarked_movie_ids(&self, user_id: UserId) -> AppResult<Vec<MovieId>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT movie_id FROM bookmarks WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, user_id: UserId) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username,
                   preference_vector::real[] AS preference_vector,
                   preference_vector_updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn save_preference_vector(
        &self,
        user_id: UserId,
        embedding: Vec<f32>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET preference_vector = $2::real[]::vector, preference_vector_updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(&embedding)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }
}
