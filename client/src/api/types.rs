use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub slug: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub last_pulse_at: DateTime<Utc>,
    pub next_pulse_after_seconds: u64,
    pub game: Game,
    pub user: User,
}

/// Achievement progress keyed by achievement slug. The server never
/// enumerates zero-progress achievements, so an absent slug means 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AchievementProgress {
    #[serde(default)]
    pub progress: HashMap<String, i64>,
}

impl AchievementProgress {
    pub fn value(&self, slug: &str) -> i64 {
        self.progress.get(slug).copied().unwrap_or(0)
    }
}

/// Structured problem body returned by the API on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiProblem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub errors: Vec<ProblemDetailEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetailEntry {
    pub location: String,
    pub message: String,
    #[serde(default)]
    pub value: Value,
}

impl fmt::Display for ApiProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "{} ", status)?;
        }
        if let Some(title) = &self.title {
            write!(f, "{}", title)
        } else if let Some(detail) = &self.detail {
            write!(f, "{}", detail)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}
