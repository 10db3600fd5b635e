use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MovieId, UserId};
use crate::error::{AppError, AppResult};

/// One user's rating of one movie; (user_id, movie_id) is unique
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Rating {
    pub id: i64,
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub rating: i16,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rating {
    pub const MIN: i16 = 1;
    pub const MAX: i16 = 5;

    /// Rejects values outside the 1..=5 star range
    pub fn validate_value(value: i16) -> AppResult<()> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(AppError::InvalidInput(format!(
                "Rating must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )));
        }
        Ok(())
    }
}

/// Body of a rate-movie request
#[derive(Debug, Clone, Deserialize)]
pub struct RatingRequest {
    pub rating: i16,
    #[serde(default)]
    pub review: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_value_bounds() {
        assert!(Rating::validate_value(1).is_ok());
        assert!(Rating::validate_value(5).is_ok());
        assert!(matches!(
            Rating::validate_value(0),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            Rating::validate_value(6),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rating_request_review_is_optional() {
        let request: RatingRequest = serde_json::from_str(r#"{"rating": 4}"#).unwrap();
        assert_eq!(request.rating, 4);
        assert_eq!(request.review, None);
    }
}
