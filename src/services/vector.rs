//! Dense vector math shared by the similarity index, the preference vector
//! manager and the in-process catalog.
//!
//! Every binary operation checks dimensions first; mixing vector sizes is a
//! caller bug and surfaces as `AppError::DimensionMismatch`.

use std::cmp::Ordering;

use crate::error::{AppError, AppResult};
use crate::models::{MovieId, SimilarityResult};

pub fn ensure_dimension(vector: &[f32], expected: usize) -> AppResult<()> {
    if vector.len() != expected {
        return Err(AppError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub fn dot(a: &[f32], b: &[f32]) -> AppResult<f64> {
    ensure_dimension(b, a.len())?;
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum())
}

pub fn norm(a: &[f32]) -> f64 {
    a.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity in [-1, 1]; 0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> AppResult<f64> {
    let dot = dot(a, b)?;
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / denominator).clamp(-1.0, 1.0))
}

pub fn is_zero(a: &[f32]) -> bool {
    a.iter().all(|x| *x == 0.0)
}

/// Running weighted sum of equally sized vectors
#[derive(Debug, Clone)]
pub struct WeightedMean {
    sum: Vec<f64>,
    total_weight: f64,
    count: usize,
}

impl WeightedMean {
    pub fn new(dimension: usize) -> Self {
        Self {
            sum: vec![0.0; dimension],
            total_weight: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, vector: &[f32], weight: f64) -> AppResult<()> {
        ensure_dimension(vector, self.sum.len())?;
        for (acc, value) in self.sum.iter_mut().zip(vector) {
            *acc += f64::from(*value) * weight;
        }
        self.total_weight += weight;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Elementwise `sum / total_weight`, or `None` when nothing was added
    pub fn finish(self) -> Option<Vec<f32>> {
        if self.count == 0 || self.total_weight == 0.0 {
            return None;
        }
        let total = self.total_weight;
        Some(self.sum.into_iter().map(|v| (v / total) as f32).collect())
    }
}

/// Descending by similarity, ascending id on ties; NaN scores count as 0
pub fn rank_by_similarity(results: &mut [SimilarityResult]) {
    for result in results.iter_mut() {
        if result.similarity.is_nan() {
            result.similarity = 0.0;
        }
    }
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.movie_id.cmp(&b.movie_id))
    });
}

/// Brute-force cosine k-nearest-neighbours over `(id, embedding)` candidates
pub fn nearest_neighbors<'a, I>(
    query: &[f32],
    candidates: I,
    exclude: &[MovieId],
    limit: usize,
) -> AppResult<Vec<SimilarityResult>>
where
    I: IntoIterator<Item = (MovieId, &'a [f32])>,
{
    let mut scored = Vec::new();
    for (movie_id, embedding) in candidates {
        if exclude.contains(&movie_id) {
            continue;
        }
        scored.push(SimilarityResult {
            movie_id,
            similarity: cosine_similarity(query, embedding)?,
        });
    }
    rank_by_similarity(&mut scored);
    scored.truncate(limit);
    Ok(scored)
}
