use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tokio_util::sync::CancellationToken;

use super::session::{Phase, SessionController, SessionGate};
use super::types::{AchievementProgress, ApiProblem, Session, User};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Everything beyond unreserved path characters, plus the delimiters that
/// would change the path shape if they slipped through unencoded.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

pub(crate) fn encode_segment(segment: &str) -> Cow<'_, str> {
    utf8_percent_encode(segment, SEGMENT).into()
}

pub(crate) fn endpoint(base_url: &str, segments: &[&str]) -> String {
    let mut url = base_url.trim_end_matches('/').to_string();
    for segment in segments {
        url.push('/');
        url.push_str(&encode_segment(segment));
    }
    url
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    session: SessionController,
}

impl ApiClient {
    /// Client sharing the process-wide session gate: session operations
    /// are serialized across every client in the process.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_gate(config, SessionGate::process_wide())
    }

    /// Client with an explicitly injected session gate, for callers that
    /// run independent sessions within one process.
    pub fn with_gate(config: ClientConfig, gate: Arc<SessionGate>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session: SessionController::new(gate),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn can_query(&self) -> bool {
        !self.config.game_id.is_empty() && !self.config.game_token.is_empty()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.current_session()
    }

    fn require_query(&self) -> Result<(), ClientError> {
        if self.can_query() {
            Ok(())
        } else {
            Err(ClientError::InvalidOperation(
                "game id and game token must be configured".to_string(),
            ))
        }
    }

    fn require_user(&self) -> Result<&str, ClientError> {
        self.config
            .user_id
            .as_deref()
            .filter(|user_id| !user_id.is_empty())
            .ok_or_else(|| {
                ClientError::InvalidOperation(
                    "user id must be configured before session operations".to_string(),
                )
            })
    }

    pub async fn get_user(&self, user_rid: Option<&str>) -> Result<User, ClientError> {
        self.require_query()?;
        let rid = user_rid.unwrap_or("@me");
        let url = endpoint(&self.config.api_base_url, &["users", "v1", rid]);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.game_token)
            .send()
            .await?;
        map_json_response(response).await
    }

    pub async fn get_achievement_progress(
        &self,
        user_rid: &str,
    ) -> Result<AchievementProgress, ClientError> {
        self.require_query()?;
        let url = endpoint(
            &self.config.api_base_url,
            &["users", "v1", user_rid, "achievements"],
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.game_token)
            .send()
            .await?;
        map_json_response(response).await
    }

    /// Submits progress values for the configured user. The server clamps
    /// monotonically (never decreases, never exceeds an achievement's
    /// target); the returned mapping is its verdict, passed through as-is.
    pub async fn add_achievement_progress(
        &self,
        new_progress: &HashMap<String, i64>,
    ) -> Result<AchievementProgress, ClientError> {
        self.require_query()?;
        let user_id = self.require_user()?;
        let token = self.session.current_token().ok_or(ClientError::InvalidState {
            required: Phase::Ready,
            observed: self.session.phase(),
        })?;

        let url = endpoint(
            &self.config.api_base_url,
            &["users", "v1", user_id, "achievements"],
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(new_progress)
            .send()
            .await?;
        map_json_response(response).await
    }

    pub async fn start_session(&self) -> Result<Session, ClientError> {
        self.require_query()?;
        let user_id = self.require_user()?;
        self.session.start(&self.http, &self.config, user_id).await
    }

    pub async fn send_heartbeat(&self) -> Result<Session, ClientError> {
        self.require_query()?;
        let user_id = self.require_user()?;
        self.session
            .heartbeat(&self.http, &self.config, user_id)
            .await
    }

    /// Pulses the current session until `cancel` fires or a heartbeat
    /// fails with anything other than a lost slot race.
    pub async fn run_heartbeat_loop(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        self.require_query()?;
        let user_id = self.require_user()?;
        self.session
            .run(&self.http, &self.config, user_id, cancel)
            .await
    }
}

async fn map_json_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let problem: ApiProblem = response.json().await?;
        Err(ClientError::Api(problem))
    }
}
