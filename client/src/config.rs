use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub game_id: String,
    pub game_token: String,
    pub user_id: Option<String>,
    pub api_base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            game_id: String::new(),
            game_token: String::new(),
            user_id: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(game_id: impl Into<String>, game_token: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            game_token: game_token.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }

    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let game_id = env::var("SCOREKEEPER_GAME_ID").unwrap_or_default();
        let game_token = env::var("SCOREKEEPER_GAME_TOKEN").unwrap_or_default();
        let user_id = env::var("SCOREKEEPER_USER_ID")
            .ok()
            .filter(|v| !v.is_empty());

        let api_base_url =
            env::var("SCOREKEEPER_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        reqwest::Url::parse(&api_base_url)
            .map_err(|_| anyhow!("Invalid SCOREKEEPER_API_BASE_URL value: {}", api_base_url))?;

        Ok(ClientConfig {
            game_id,
            game_token,
            user_id,
            api_base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_optional_fields() {
        let config = ClientConfig::new("game-1", "token-1")
            .with_user("user-1")
            .with_base_url("https://api.scorekeeper.dev");
        assert_eq!(config.game_id, "game-1");
        assert_eq!(config.game_token, "token-1");
        assert_eq!(config.user_id.as_deref(), Some("user-1"));
        assert_eq!(config.api_base_url, "https://api.scorekeeper.dev");
    }

    #[test]
    fn default_points_at_local_development_endpoint() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert!(config.user_id.is_none());
    }

    #[test]
    fn load_reads_environment_with_defaults() {
        env::set_var("SCOREKEEPER_GAME_ID", "game-env");
        env::set_var("SCOREKEEPER_GAME_TOKEN", "token-env");
        env::set_var("SCOREKEEPER_USER_ID", "");
        env::remove_var("SCOREKEEPER_API_BASE_URL");

        let config = ClientConfig::load().unwrap();
        assert_eq!(config.game_id, "game-env");
        assert_eq!(config.game_token, "token-env");
        assert!(config.user_id.is_none());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }
}
