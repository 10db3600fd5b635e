use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub preference: Option<PreferenceVector>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            preference: None,
        }
    }
}

/// A user's aggregated taste in embedding space
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceVector {
    pub embedding: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceVector {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.updated_at < now - max_age
    }
}
