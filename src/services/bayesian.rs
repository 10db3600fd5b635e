use std::sync::Arc;

use crate::config::BayesianPrior;
use crate::db::{MovieCatalog, RatingStore};
use crate::error::{AppError, AppResult};
use crate::models::{Movie, MovieId, MovieRatingStats, MovieSummary};

/// Bayesian (weighted) rating
///
/// `WR = (v / (v + m)) * R + (m / (v + m)) * C`, rounded to two decimals.
/// With no votes the prior mean `C` is returned unchanged.
pub fn smooth(raw_average: f64, vote_count: u64, prior_votes: u32, prior_mean: f64) -> f64 {
    if vote_count == 0 {
        return prior_mean;
    }

    let v = vote_count as f64;
    let m = f64::from(prior_votes);
    let weighted = (v / (v + m)) * raw_average + (m / (v + m)) * prior_mean;

    (weighted * 100.0).round() / 100.0
}

/// Smooths raw movie averages and keeps the persisted aggregates fresh
#[derive(Clone)]
pub struct BayesianRatingAggregator {
    prior: BayesianPrior,
    catalog: Arc<dyn MovieCatalog>,
    ratings: Arc<dyn RatingStore>,
}

impl BayesianRatingAggregator {
    pub fn new(
        prior: BayesianPrior,
        catalog: Arc<dyn MovieCatalog>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        Self {
            prior,
            catalog,
            ratings,
        }
    }

    pub fn smooth(&self, raw_average: f64, vote_count: u64) -> f64 {
        smooth(
            raw_average,
            vote_count,
            self.prior.prior_votes,
            self.prior.prior_mean,
        )
    }

    /// Bayesian rating from the movie's persisted aggregates
    pub fn rating_for(&self, movie: &Movie) -> f64 {
        match movie.avg_rating {
            Some(avg) => self.smooth(avg, movie.rating_count.max(0) as u64),
            None => self.prior.prior_mean,
        }
    }

    pub fn summarize(&self, movie: Movie) -> MovieSummary {
        let bayesian_rating = self.rating_for(&movie);
        MovieSummary::new(movie, bayesian_rating)
    }

    /// Bayesian rating computed from the live ratings table
    pub async fn bayesian_rating(&self, movie_id: MovieId) -> AppResult<f64> {
        if self.catalog.find_by_id(movie_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Movie {} not found", movie_id)));
        }

        let average = self.ratings.average_rating(movie_id).await?;
        let count = self.ratings.count_by_movie(movie_id).await?;

        Ok(match average {
            Some(avg) => self.smooth(avg, count as u64),
            None => self.prior.prior_mean,
        })
    }

    /// Recomputes the movie's stored average and count
    pub async fn refresh_movie_stats(&self, movie_id: MovieId) -> AppResult<MovieRatingStats> {
        let stats = self.catalog.refresh_rating_stats(movie_id).await?;

        tracing::debug!(
            movie_id,
            avg_rating = ?stats.avg_rating,
            rating_count = stats.rating_count,
            "Updated movie rating stats"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{MockMovieCatalog, MockRatingStore};
    use proptest::prelude::*;

    #[test]
    fn test_zero_votes_returns_prior_mean() {
        assert_eq!(smooth(5.0, 0, 25, 3.5), 3.5);
        assert_eq!(smooth(1.0, 0, 25, 3.456), 3.456);
    }

    #[test]
    fn test_equal_votes_and_prior_is_midpoint() {
        assert_eq!(smooth(4.0, 25, 25, 3.5), 3.75);
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        // 10/35 * 5.0 + 25/35 * 3.5 = 3.92857...
        assert_eq!(smooth(5.0, 10, 25, 3.5), 3.93);
    }

    #[test]
    fn test_rounding_may_step_just_below_raw_average() {
        let raw = 10.0 / 3.0;
        let result = smooth(raw, 1_000_000, 25, 3.5);
        assert_eq!(result, 3.33);
        assert!(result < raw.min(3.5));
        assert!(raw.min(3.5) - result <= 0.005);
    }

    #[test]
    fn test_more_votes_move_toward_raw_average() {
        let few = smooth(5.0, 5, 25, 3.5);
        let many = smooth(5.0, 500, 25, 3.5);
        assert!(few < many);
        assert!(many < 5.0);
    }

    #[test]
    fn test_rating_for_unrated_movie_is_prior() {
        let aggregator = BayesianRatingAggregator::new(
            BayesianPrior::default(),
            Arc::new(MockMovieCatalog::new()),
            Arc::new(MockRatingStore::new()),
        );
        let movie = Movie::new(1, 100, "Unrated");
        assert_eq!(aggregator.rating_for(&movie), 3.5);
    }

    #[tokio::test]
    async fn test_bayesian_rating_unknown_movie() {
        let mut catalog = MockMovieCatalog::new();
        catalog.expect_find_by_id().returning(|_| Ok(None));
        let aggregator = BayesianRatingAggregator::new(
            BayesianPrior::default(),
            Arc::new(catalog),
            Arc::new(MockRatingStore::new()),
        );

        let err = aggregator.bayesian_rating(9).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bayesian_rating_uses_live_ratings() {
        let mut catalog = MockMovieCatalog::new();
        catalog
            .expect_find_by_id()
            .returning(|id| Ok(Some(Movie::new(id, 100, "Heat"))));
        let mut ratings = MockRatingStore::new();
        ratings.expect_average_rating().returning(|_| Ok(Some(4.0)));
        ratings.expect_count_by_movie().returning(|_| Ok(25));

        let aggregator = BayesianRatingAggregator::new(
            BayesianPrior::default(),
            Arc::new(catalog),
            Arc::new(ratings),
        );

        assert_eq!(aggregator.bayesian_rating(1).await.unwrap(), 3.75);
    }

    proptest! {
        #[test]
        fn prop_smooth_between_raw_and_prior(
            raw_cents in 100u32..=500,
            prior_cents in 100u32..=500,
            votes in 0u64..10_000,
            prior_votes in 0u32..200,
        ) {
            let raw = f64::from(raw_cents) / 100.0;
            let prior = f64::from(prior_cents) / 100.0;
            let result = smooth(raw, votes, prior_votes, prior);

            prop_assert!(result >= raw.min(prior) - 1e-9);
            prop_assert!(result <= raw.max(prior) + 1e-9);
            if votes == 0 {
                prop_assert_eq!(result, prior);
            }
        }

        #[test]
        fn prop_smooth_within_half_cent_of_bounds(
            raw in 1.0f64..=5.0,
            prior in 1.0f64..=5.0,
            votes in 1u64..2_000_000,
            prior_votes in 0u32..200,
        ) {
            let result = smooth(raw, votes, prior_votes, prior);

            // Two-decimal rounding can land up to half a cent outside
            prop_assert!(result >= raw.min(prior) - 0.005 - 1e-9);
            prop_assert!(result <= raw.max(prior) + 0.005 + 1e-9);
            prop_assert_eq!((result * 100.0).round() / 100.0, result);
        }
    }
}
