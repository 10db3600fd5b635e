use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::RatingWeights;
use crate::db::{BookmarkStore, MovieCatalog, RatingStore};
use crate::error::AppResult;
use crate::models::{GenreId, Movie, MovieId, Rating, UserId};
use crate::services::popular::PopularMovies;

/// Genre affinity scores, highest first, ties by ascending genre id
///
/// Each rated movie adds its rating weight to every one of its genres.
pub fn rank_genres(
    ratings: &[Rating],
    genres_by_movie: &HashMap<MovieId, Vec<GenreId>>,
    weights: &RatingWeights,
    limit: usize,
) -> Vec<(GenreId, f64)> {
    let mut scores: BTreeMap<GenreId, f64> = BTreeMap::new();
    for rating in ratings {
        let Some(genre_ids) = genres_by_movie.get(&rating.movie_id) else {
            continue;
        };
        let weight = weights.weight(rating.rating);
        for genre_id in genre_ids {
            *scores.entry(*genre_id).or_insert(0.0) += weight;
        }
    }

    let mut ranked: Vec<(GenreId, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(limit);
    ranked
}

/// Recommends movies from the user's preferred genres
#[derive(Clone)]
pub struct ContentBasedRecommender {
    ratings: Arc<dyn RatingStore>,
    catalog: Arc<dyn MovieCatalog>,
    bookmarks: Arc<dyn BookmarkStore>,
    popular: PopularMovies,
    weights: RatingWeights,
    genre_limit: usize,
    oversample: usize,
}

impl ContentBasedRecommender {
    pub fn new(
        ratings: Arc<dyn RatingStore>,
        catalog: Arc<dyn MovieCatalog>,
        bookmarks: Arc<dyn BookmarkStore>,
        popular: PopularMovies,
        weights: RatingWeights,
        genre_limit: usize,
        oversample: usize,
    ) -> Self {
        Self {
            ratings,
            catalog,
            bookmarks,
            popular,
            weights,
            genre_limit,
            oversample: oversample.max(1),
        }
    }

    async fn genres_for(&self, ratings: &[Rating]) -> AppResult<HashMap<MovieId, Vec<GenreId>>> {
        let movie_ids = ratings.iter().map(|r| r.movie_id).collect();
        Ok(self
            .catalog
            .find_by_ids(movie_ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m.genre_ids))
            .collect())
    }

    /// Up to `genre_limit` genres with their accumulated affinity
    async fn preferred_genres(&self, ratings: &[Rating]) -> AppResult<Vec<(GenreId, f64)>> {
        let genres = self.genres_for(ratings).await?;
        Ok(rank_genres(ratings, &genres, &self.weights, self.genre_limit))
    }

    pub async fn recommend(&self, user_id: UserId, limit: usize) -> AppResult<Vec<Movie>> {
        tracing::debug!(user_id, limit, "Using content-based filtering");

        let ratings = self.ratings.find_by_user(user_id).await?;
        let preferred = self.preferred_genres(&ratings).await?;

        if preferred.is_empty() {
            tracing::info!(user_id, "No genre preferences, falling back to popular movies");
            return self.popular.recommend(user_id, limit).await;
        }

        tracing::debug!(user_id, genres = ?preferred, "Preferred genres");

        let mut excluded: HashSet<MovieId> = ratings.iter().map(|r| r.movie_id).collect();
        excluded.extend(self.bookmarks.find_bookmarked_movie_ids(user_id).await?);

        let genre_ids = preferred.into_iter().map(|(id, _)| id).collect();
        let candidates = self
            .catalog
            .find_by_genres(genre_ids, limit.saturating_mul(self.oversample))
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|m| !excluded.contains(&m.id))
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{MockBookmarkStore, MockMovieCatalog, MockRatingStore};
    use chrono::Utc;
    use mockall::predicate::eq;

    const DRAMA: GenreId = 18;
    const COMEDY: GenreId = 35;
    const THRILLER: GenreId = 53;

    fn rating(movie_id: MovieId, value: i16) -> Rating {
        let now = Utc::now();
        Rating {
            id: movie_id,
            user_id: 1,
            movie_id,
            rating: value,
            review: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn movie(id: MovieId, genre_ids: Vec<GenreId>) -> Movie {
        let mut movie = Movie::new(id, id, format!("Movie {}", id));
        movie.genre_ids = genre_ids;
        movie
    }

    #[test]
    fn test_drama_scores_sum_of_weights() {
        let ratings = vec![rating(1, 5), rating(2, 4), rating(3, 3)];
        let genres = HashMap::from([(1, vec![DRAMA]), (2, vec![DRAMA]), (3, vec![DRAMA])]);

        let ranked = rank_genres(&ratings, &genres, &RatingWeights::default(), 5);
        assert_eq!(ranked, vec![(DRAMA, 4.5)]);
    }

    #[test]
    fn test_genre_ties_break_by_ascending_id() {
        let ratings = vec![rating(1, 4), rating(2, 4), rating(3, 5)];
        let genres = HashMap::from([
            (1, vec![THRILLER]),
            (2, vec![COMEDY]),
            (3, vec![DRAMA, THRILLER]),
        ]);

        let ranked = rank_genres(&ratings, &genres, &RatingWeights::default(), 2);
        // Thriller 3.5, Drama 2.0, Comedy 1.5
        assert_eq!(ranked, vec![(THRILLER, 3.5), (DRAMA, 2.0)]);

        let ratings = vec![rating(1, 3), rating(2, 3)];
        let ranked = rank_genres(&ratings, &genres, &RatingWeights::default(), 5);
        assert_eq!(ranked, vec![(COMEDY, 1.0), (THRILLER, 1.0)]);
    }

    #[test]
    fn test_caps_at_limit() {
        let ratings: Vec<Rating> = (1..=8).map(|id| rating(id, 5)).collect();
        let genres: HashMap<MovieId, Vec<GenreId>> =
            (1..=8).map(|id| (id, vec![id * 100])).collect();

        let ranked = rank_genres(&ratings, &genres, &RatingWeights::default(), 5);
        let ids: Vec<GenreId> = ranked.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![100, 200, 300, 400, 500]);
    }

    fn recommender(
        ratings: MockRatingStore,
        catalog: MockMovieCatalog,
        bookmarks: MockBookmarkStore,
    ) -> ContentBasedRecommender {
        let catalog: Arc<dyn MovieCatalog> = Arc::new(catalog);
        let bookmarks: Arc<dyn BookmarkStore> = Arc::new(bookmarks);
        let popular = PopularMovies::new(catalog.clone(), bookmarks.clone(), 2);
        ContentBasedRecommender::new(
            Arc::new(ratings),
            catalog,
            bookmarks,
            popular,
            RatingWeights::default(),
            5,
            3,
        )
    }

    #[tokio::test]
    async fn test_recommend_filters_rated_and_bookmarked() {
        let mut ratings = MockRatingStore::new();
        ratings
            .expect_find_by_user()
            .returning(|_| Ok(vec![rating(1, 5), rating(2, 4)]));

        let mut catalog = MockMovieCatalog::new();
        catalog
            .expect_find_by_ids()
            .returning(|_| Ok(vec![movie(1, vec![DRAMA]), movie(2, vec![DRAMA])]));
        catalog
            .expect_find_by_genres()
            .with(eq(vec![DRAMA]), eq(6))
            .returning(|_, _| {
                Ok(vec![
                    movie(1, vec![DRAMA]),
                    movie(10, vec![DRAMA]),
                    movie(11, vec![DRAMA]),
                    movie(12, vec![DRAMA]),
                ])
            });

        let mut bookmarks = MockBookmarkStore::new();
        bookmarks
            .expect_find_bookmarked_movie_ids()
            .returning(|_| Ok(vec![11]));

        let ids: Vec<MovieId> = recommender(ratings, catalog, bookmarks)
            .recommend(1, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(ids, vec![10, 12]);
    }

    #[tokio::test]
    async fn test_recommend_without_ratings_falls_back_to_popular() {
        let mut ratings = MockRatingStore::new();
        ratings.expect_find_by_user().returning(|_| Ok(vec![]));

        let mut catalog = MockMovieCatalog::new();
        catalog.expect_find_by_ids().returning(|_| Ok(vec![]));
        catalog.expect_find_by_genres().never();
        catalog
            .expect_find_popular()
            .returning(|_| Ok(vec![movie(7, vec![]), movie(8, vec![])]));

        let mut bookmarks = MockBookmarkStore::new();
        bookmarks
            .expect_find_bookmarked_movie_ids()
            .returning(|_| Ok(vec![]));

        let movies = recommender(ratings, catalog, bookmarks)
            .recommend(1, 5)
            .await
            .unwrap();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].id, 7);
    }
}
