use thiserror::Error;

use crate::api::session::Phase;
use crate::api::types::ApiProblem;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A statically checkable precondition was violated (missing game
    /// credentials or user id). Fix the configuration before retrying.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A session operation ran while the state machine was not in the
    /// required phase, or while another session operation held the slot.
    /// The two cases are indistinguishable on purpose.
    #[error("invalid session state: operation requires {required:?}, session is {observed:?}")]
    InvalidState { required: Phase, observed: Phase },

    /// The server rejected the request with a structured problem body.
    #[error("API request rejected: {0}")]
    Api(ApiProblem),

    /// The server accepted a session start but did not send the session
    /// token header. Contract violation; there is nothing to retry.
    #[error("session start response did not carry a session token")]
    MissingSessionToken,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display_names_both_phases() {
        let err = ClientError::InvalidState {
            required: Phase::Ready,
            observed: Phase::Starting,
        };
        assert_eq!(
            err.to_string(),
            "invalid session state: operation requires Ready, session is Starting"
        );
    }

    #[test]
    fn api_error_display_carries_problem_summary() {
        let problem: ApiProblem = serde_json::from_value(serde_json::json!({
            "type": "https://scorekeeper.dev/problems/unauthorized",
            "title": "Unauthorized",
            "status": 401
        }))
        .unwrap();
        let err = ClientError::Api(problem);
        assert_eq!(err.to_string(), "API request rejected: 401 Unauthorized");
    }
}
