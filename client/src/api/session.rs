use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::client::endpoint;
use super::types::{ApiProblem, Session};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Response header carrying the session authorization token.
pub const SESSION_TOKEN_HEADER: &str = "X-Game-Session-Token";

/// Lifecycle phase of the session slot.
///
/// The in-flight phases (`Starting`, `Pulsing`) double as "slot held":
/// winning the compare-and-swap into one of them is the only way to run
/// a session operation, so no separate lock exists for the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    None = 0,
    Starting = 1,
    Ready = 2,
    Pulsing = 3,
}

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            1 => Phase::Starting,
            2 => Phase::Ready,
            3 => Phase::Pulsing,
            _ => Phase::None,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    session: Session,
    token: String,
}

/// Shared session slot: one atomic phase plus the snapshot/token pair it
/// guards. The snapshot is only written by the task that won the phase
/// transition, and the phase is stored with `Release` after the write,
/// so any task that observes `Ready` observes the matching snapshot.
#[derive(Debug, Default)]
pub struct SessionGate {
    phase: AtomicU8,
    slot: Mutex<Option<ActiveSession>>,
}

impl SessionGate {
    /// A gate of its own, for callers that need independent session
    /// slots within one process (and for tests).
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide gate. Every controller built through
    /// [`crate::ApiClient::new`] shares it, so session operations are
    /// serialized across the whole process.
    pub fn process_wide() -> Arc<Self> {
        static GATE: OnceLock<Arc<SessionGate>> = OnceLock::new();
        GATE.get_or_init(SessionGate::new).clone()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> Option<ActiveSession> {
        self.lock_slot().clone()
    }

    /// Try to enter `in_flight` from `required`. The compare-and-swap is
    /// both the phase check and the try-lock; a failed swap reports the
    /// phase actually observed, whether that means "busy" or "wrong
    /// state".
    fn begin(&self, required: Phase, in_flight: Phase) -> Result<TransitionGuard<'_>, ClientError> {
        match self.phase.compare_exchange(
            required as u8,
            in_flight as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(TransitionGuard {
                gate: self,
                armed: true,
            }),
            Err(observed) => Err(ClientError::InvalidState {
                required,
                observed: Phase::from_u8(observed),
            }),
        }
    }
}

/// Holds the in-flight phase won by [`SessionGate::begin`]. Dropping it
/// without [`TransitionGuard::complete`] resets the slot to `None`,
/// which covers error returns and cancelled (dropped) futures alike.
#[must_use]
#[derive(Debug)]
struct TransitionGuard<'a> {
    gate: &'a SessionGate,
    armed: bool,
}

impl TransitionGuard<'_> {
    fn complete(mut self, session: Session, token: String) {
        *self.gate.lock_slot() = Some(ActiveSession { session, token });
        self.gate.phase.store(Phase::Ready as u8, Ordering::Release);
        self.armed = false;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.gate.lock_slot().take();
        self.gate.phase.store(Phase::None as u8, Ordering::Release);
    }
}

/// Owns the session lifecycle: start, heartbeat, and the polling loop.
#[derive(Debug, Clone)]
pub struct SessionController {
    gate: Arc<SessionGate>,
}

impl SessionController {
    pub(crate) fn new(gate: Arc<SessionGate>) -> Self {
        Self { gate }
    }

    pub fn phase(&self) -> Phase {
        self.gate.phase()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.gate.current().map(|active| active.session)
    }

    pub(crate) fn current_token(&self) -> Option<String> {
        self.gate.current().map(|active| active.token)
    }

    pub(crate) async fn start(
        &self,
        http: &reqwest::Client,
        config: &ClientConfig,
        user_id: &str,
    ) -> Result<Session, ClientError> {
        let guard = self.gate.begin(Phase::None, Phase::Starting)?;

        let url = endpoint(
            &config.api_base_url,
            &["users", "v1", user_id, "games", &config.game_id, "sessions"],
        );
        let response = http
            .post(&url)
            .bearer_auth(&config.game_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let problem: ApiProblem = response.json().await?;
            tracing::error!(status = status.as_u16(), problem = %problem, "session start rejected");
            return Err(ClientError::Api(problem));
        }

        let token = session_token(&response).ok_or(ClientError::MissingSessionToken)?;
        let session: Session = response.json().await?;
        tracing::info!(
            session_id = %session.id,
            next_pulse_after_seconds = session.next_pulse_after_seconds,
            "session started"
        );

        guard.complete(session.clone(), token);
        Ok(session)
    }

    pub(crate) async fn heartbeat(
        &self,
        http: &reqwest::Client,
        config: &ClientConfig,
        user_id: &str,
    ) -> Result<Session, ClientError> {
        let guard = self.gate.begin(Phase::Ready, Phase::Pulsing)?;

        // Winning the Ready -> Pulsing swap guarantees the slot is filled.
        let active = self
            .gate
            .current()
            .expect("ready phase implies a stored session");

        let url = endpoint(
            &config.api_base_url,
            &[
                "users",
                "v1",
                user_id,
                "games",
                &config.game_id,
                "sessions",
                &active.session.id,
                "heartbeat",
            ],
        );
        let response = http.post(&url).bearer_auth(&active.token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let problem: ApiProblem = response.json().await?;
            tracing::error!(status = status.as_u16(), problem = %problem, "heartbeat rejected");
            return Err(ClientError::Api(problem));
        }

        // Token rotation is optional per response: replace when the header
        // is present, keep the previous token otherwise.
        let token = session_token(&response).unwrap_or(active.token);
        let session: Session = response.json().await?;
        tracing::debug!(
            session_id = %session.id,
            next_pulse_after_seconds = session.next_pulse_after_seconds,
            "heartbeat accepted"
        );

        guard.complete(session.clone(), token);
        Ok(session)
    }

    /// Heartbeat loop: sleep for the latest known pulse delay, then pulse.
    /// Losing a race against a manual heartbeat is expected and retried on
    /// the next cycle; every other failure terminates the loop.
    pub(crate) async fn run(
        &self,
        http: &reqwest::Client,
        config: &ClientConfig,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let mut delay = match self.current_session() {
            Some(session) => Duration::from_secs(session.next_pulse_after_seconds),
            None => {
                return Err(ClientError::InvalidState {
                    required: Phase::Ready,
                    observed: self.phase(),
                })
            }
        };

        loop {
            // Latest snapshot at the time the sleep begins; if the slot is
            // momentarily empty the previous delay is reused.
            if let Some(session) = self.current_session() {
                delay = Duration::from_secs(session.next_pulse_after_seconds);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("heartbeat loop cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.heartbeat(http, config, user_id).await {
                Ok(_) => {}
                Err(ClientError::InvalidState { observed, .. }) => {
                    tracing::debug!(observed = ?observed, "heartbeat lost the slot, retrying next cycle");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn session_token(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(SESSION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_fixture() -> Session {
        serde_json::from_value(serde_json::json!({
            "id": "s1",
            "last_pulse_at": "2026-01-01T00:00:00Z",
            "next_pulse_after_seconds": 30,
            "game": { "id": "g1", "created_at": "2026-01-01T00:00:00Z", "slug": "starblaster" },
            "user": { "id": "u1", "created_at": "2026-01-01T00:00:00Z", "slug": "alice" }
        }))
        .unwrap()
    }

    #[test]
    fn begin_from_wrong_phase_reports_observed_phase() {
        let gate = SessionGate::new();
        let err = gate.begin(Phase::Ready, Phase::Pulsing).unwrap_err();
        match err {
            ClientError::InvalidState { required, observed } => {
                assert_eq!(required, Phase::Ready);
                assert_eq!(observed, Phase::None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(gate.phase(), Phase::None);
    }

    #[test]
    fn begin_while_in_flight_fails_and_leaves_phase_untouched() {
        let gate = SessionGate::new();
        let guard = gate.begin(Phase::None, Phase::Starting).unwrap();
        assert_eq!(gate.phase(), Phase::Starting);

        let err = gate.begin(Phase::None, Phase::Starting).unwrap_err();
        match err {
            ClientError::InvalidState { observed, .. } => assert_eq!(observed, Phase::Starting),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(gate.phase(), Phase::Starting);
        drop(guard);
    }

    #[test]
    fn dropping_an_armed_guard_resets_to_none_and_clears_the_slot() {
        let gate = SessionGate::new();
        gate.begin(Phase::None, Phase::Starting)
            .unwrap()
            .complete(session_fixture(), "tok".into());
        assert_eq!(gate.phase(), Phase::Ready);
        assert!(gate.current().is_some());

        let guard = gate.begin(Phase::Ready, Phase::Pulsing).unwrap();
        drop(guard);
        assert_eq!(gate.phase(), Phase::None);
        assert!(gate.current().is_none());
    }

    #[test]
    fn complete_installs_snapshot_token_and_ready_phase() {
        let gate = SessionGate::new();
        let guard = gate.begin(Phase::None, Phase::Starting).unwrap();
        guard.complete(session_fixture(), "tok-1".into());

        assert_eq!(gate.phase(), Phase::Ready);
        let active = gate.current().unwrap();
        assert_eq!(active.session.id, "s1");
        assert_eq!(active.token, "tok-1");
    }

    #[test]
    fn controller_accessors_reflect_the_gate() {
        let gate = SessionGate::new();
        let controller = SessionController::new(gate.clone());
        assert_eq!(controller.phase(), Phase::None);
        assert!(controller.current_session().is_none());
        assert!(controller.current_token().is_none());

        gate.begin(Phase::None, Phase::Starting)
            .unwrap()
            .complete(session_fixture(), "tok-1".into());
        assert_eq!(controller.phase(), Phase::Ready);
        assert_eq!(controller.current_session().unwrap().id, "s1");
        assert_eq!(controller.current_token().as_deref(), Some("tok-1"));
    }

    #[test]
    fn process_wide_gate_is_shared() {
        assert!(Arc::ptr_eq(
            &SessionGate::process_wide(),
            &SessionGate::process_wide()
        ));
    }
}
