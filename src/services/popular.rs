use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{BookmarkStore, MovieCatalog};
use crate::error::AppResult;
use crate::models::{Movie, UserId};

/// Most popular movies the user has not bookmarked
#[derive(Clone)]
pub struct PopularMovies {
    catalog: Arc<dyn MovieCatalog>,
    bookmarks: Arc<dyn BookmarkStore>,
    oversample: usize,
}

impl PopularMovies {
    pub fn new(
        catalog: Arc<dyn MovieCatalog>,
        bookmarks: Arc<dyn BookmarkStore>,
        oversample: usize,
    ) -> Self {
        Self {
            catalog,
            bookmarks,
            oversample: oversample.max(1),
        }
    }

    pub async fn recommend(&self, user_id: UserId, limit: usize) -> AppResult<Vec<Movie>> {
        tracing::debug!(user_id, limit, "Getting popular movies");

        let bookmarked: HashSet<_> = self
            .bookmarks
            .find_bookmarked_movie_ids(user_id)
            .await?
            .into_iter()
            .collect();

        let movies = self
            .catalog
            .find_popular(limit.saturating_mul(self.oversample))
            .await?;

        Ok(movies
            .into_iter()
            .filter(|m| !bookmarked.contains(&m.id))
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{MockBookmarkStore, MockMovieCatalog};
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_popular_oversamples_and_skips_bookmarks() {
        let mut catalog = MockMovieCatalog::new();
        catalog
            .expect_find_popular()
            .with(eq(6))
            .returning(|_| Ok((1..=6).map(|id| Movie::new(id, id, "Popular")).collect()));

        let mut bookmarks = MockBookmarkStore::new();
        bookmarks
            .expect_find_bookmarked_movie_ids()
            .returning(|_| Ok(vec![1, 3]));

        let popular = PopularMovies::new(Arc::new(catalog), Arc::new(bookmarks), 2);
        let ids: Vec<i64> = popular
            .recommend(7, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(ids, vec![2, 4, 5]);
    }
}
