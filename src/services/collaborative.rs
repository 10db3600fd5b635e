use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::{MovieCatalog, RatingStore};
use crate::error::AppResult;
use crate::models::{Movie, MovieId, UserId};
use crate::services::similarity::load_in_order;

/// Pearson correlation over the movies both users rated
///
/// 0 when there is no common movie or the denominator is 0.
pub fn pearson_correlation(a: &HashMap<MovieId, i16>, b: &HashMap<MovieId, i16>) -> f64 {
    // Sorted so the floating point sums do not depend on hash order
    let mut common: Vec<(MovieId, i16, i16)> = a
        .iter()
        .filter_map(|(id, x)| b.get(id).map(|y| (*id, *x, *y)))
        .collect();
    common.sort_unstable_by_key(|(id, _, _)| *id);

    let mut n = 0usize;
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    let (mut sum_x2, mut sum_y2, mut sum_xy) = (0.0, 0.0, 0.0);

    for (_, x, y) in common {
        let (x, y) = (f64::from(x), f64::from(y));
        n += 1;
        sum_x += x;
        sum_y += y;
        sum_x2 += x * x;
        sum_y2 += y * y;
        sum_xy += x * y;
    }

    if n == 0 {
        return 0.0;
    }

    let n = n as f64;
    let numerator = sum_xy - (sum_x * sum_y / n);
    let denominator = ((sum_x2 - sum_x * sum_x / n) * (sum_y2 - sum_y * sum_y / n)).sqrt();

    if denominator == 0.0 || denominator.is_nan() {
        return 0.0;
    }

    (numerator / denominator).clamp(-1.0, 1.0)
}

fn common_count(a: &HashMap<MovieId, i16>, b: &HashMap<MovieId, i16>) -> usize {
    a.keys().filter(|id| b.contains_key(id)).count()
}

/// A peer user and how closely their ratings track the target user's
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub user_id: UserId,
    pub correlation: f64,
    ratings: HashMap<MovieId, i16>,
}

/// Recommends what correlated users rated highly
#[derive(Clone)]
pub struct CollaborativeRecommender {
    ratings: Arc<dyn RatingStore>,
    catalog: Arc<dyn MovieCatalog>,
    min_common_ratings: usize,
    max_neighbors: usize,
    neighbor_min_rating: i16,
}

impl CollaborativeRecommender {
    pub fn new(
        ratings: Arc<dyn RatingStore>,
        catalog: Arc<dyn MovieCatalog>,
        min_common_ratings: usize,
        max_neighbors: usize,
        neighbor_min_rating: i16,
    ) -> Self {
        Self {
            ratings,
            catalog,
            min_common_ratings,
            max_neighbors,
            neighbor_min_rating,
        }
    }

    async fn rating_map(&self, user_id: UserId) -> AppResult<HashMap<MovieId, i16>> {
        Ok(self
            .ratings
            .find_by_user(user_id)
            .await?
            .into_iter()
            .map(|r| (r.movie_id, r.rating))
            .collect())
    }

    /// Most correlated eligible neighbours, best first, ties by ascending id
    pub async fn neighbors(
        &self,
        user_id: UserId,
        target: &HashMap<MovieId, i16>,
    ) -> AppResult<Vec<Neighbor>> {
        let mut movie_ids: Vec<MovieId> = target.keys().copied().collect();
        movie_ids.sort_unstable();

        let candidates = self
            .ratings
            .find_users_with_common_ratings(user_id, movie_ids, self.min_common_ratings)
            .await?;

        tracing::debug!(user_id, candidates = candidates.len(), "Found similar users");

        let mut neighbors = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate == user_id {
                continue;
            }
            let ratings = self.rating_map(candidate).await?;
            if common_count(target, &ratings) < self.min_common_ratings {
                continue;
            }
            neighbors.push(Neighbor {
                user_id: candidate,
                correlation: pearson_correlation(target, &ratings),
                ratings,
            });
        }

        neighbors.sort_by(|a, b| {
            b.correlation
                .partial_cmp(&a.correlation)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        neighbors.truncate(self.max_neighbors);

        Ok(neighbors)
    }

    /// Accumulated `rating * correlation` per unrated movie, best first
    pub fn score_candidates(
        &self,
        target: &HashMap<MovieId, i16>,
        neighbors: &[Neighbor],
    ) -> Vec<(MovieId, f64)> {
        let mut scores: HashMap<MovieId, f64> = HashMap::new();
        for neighbor in neighbors {
            for (movie_id, rating) in &neighbor.ratings {
                if target.contains_key(movie_id) || *rating < self.neighbor_min_rating {
                    continue;
                }
                let score = f64::from(*rating) * neighbor.correlation;
                *scores.entry(*movie_id).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(MovieId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    pub async fn recommend(&self, user_id: UserId, limit: usize) -> AppResult<Vec<Movie>> {
        tracing::debug!(user_id, limit, "Using collaborative filtering");

        let target = self.rating_map(user_id).await?;
        if target.is_empty() {
            return Ok(Vec::new());
        }

        let neighbors = self.neighbors(user_id, &target).await?;
        if neighbors.is_empty() {
            tracing::info!(user_id, "No neighbours passed the common rating threshold");
            return Ok(Vec::new());
        }

        let excluded: HashSet<MovieId> = target.keys().copied().collect();
        let ids: Vec<MovieId> = self
            .score_candidates(&target, &neighbors)
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !excluded.contains(id))
            .take(limit)
            .collect();

        tracing::debug!(
            user_id,
            neighbors = neighbors.len(),
            candidates = ids.len(),
            "Collaborative candidates scored"
        );

        load_in_order(self.catalog.as_ref(), &ids).await
    }
}
