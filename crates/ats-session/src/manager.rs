use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use ats_core::{DeviceId, ProviderConfig, SessionError, SessionId, SessionInfo};
use ats_store::ClientStateRepo;

use crate::api::{CreateSessionRequest, SessionApi, TestConfigRequest};
use crate::config::SessionConfig;

/// Where the manager is in turning a configuration into a live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Testing,
    Creating,
    Active,
    Revalidating,
    Invalid,
    Cleared,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Testing => "testing",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Revalidating => "revalidating",
            Self::Invalid => "invalid",
            Self::Cleared => "cleared",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session Lifecycle Manager.
///
/// Sole writer of the persisted configuration and session. Reads the store on
/// construction; every derived query re-reads it so writes by other processes
/// are observed (last writer wins).
pub struct SessionManager<A: SessionApi> {
    api: A,
    repo: ClientStateRepo,
    config: SessionConfig,
    state: RwLock<LifecycleState>,
}

impl<A: SessionApi> SessionManager<A> {
    pub fn new(api: A, repo: ClientStateRepo, config: SessionConfig) -> Self {
        let initial = initial_state(&repo);
        info!(state = %initial, "session manager initialised");
        Self {
            api,
            repo,
            config,
            state: RwLock::new(initial),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.write() = next;
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Test the configuration remotely, create a session for it and persist both.
    ///
    /// On failure nothing persisted changes and the previous state is restored.
    #[instrument(skip_all, fields(provider = %config.provider))]
    pub async fn configure(&self, config: ProviderConfig) -> Result<SessionId, SessionError> {
        config.check()?;

        let previous = self.state();
        match self.test_and_create(&config).await {
            Ok(session) => {
                if let Err(e) = self.repo.save(&config, &session) {
                    self.set_state(previous);
                    return Err(e.into());
                }
                self.set_state(LifecycleState::Active);
                info!(
                    session_id = %session.session_id,
                    expires_at = %session.expires_at,
                    "session created"
                );
                Ok(session.session_id)
            }
            Err(e) => {
                self.set_state(previous);
                warn!(kind = e.error_kind(), error = %e, "configure failed");
                Err(e)
            }
        }
    }

    async fn test_and_create(&self, config: &ProviderConfig) -> Result<SessionInfo, SessionError> {
        self.set_state(LifecycleState::Testing);
        let test = TestConfigRequest::new(config, &self.config);
        let outcome = self.api.test_config(&test).await?;
        if !outcome.success {
            return Err(SessionError::ConfigurationTest(
                outcome
                    .message
                    .unwrap_or_else(|| "provider did not accept the configuration".into()),
            ));
        }

        self.set_state(LifecycleState::Creating);
        let device_id = self.repo.device_id()?;
        let request = CreateSessionRequest::new(config, device_id, &self.config);
        let created = self.api.create_session(&request).await?;
        SessionInfo::new(created.session_id, Utc::now(), created.expires_at)
    }

    /// Ask the server whether `session_id` is still live.
    ///
    /// A negative or failed check clears local state.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn validate(&self, session_id: &SessionId) -> bool {
        self.set_state(LifecycleState::Revalidating);
        let verdict = match self.api.validate_session(session_id).await {
            Ok(resp) if resp.valid => Ok(()),
            Ok(resp) => Err(SessionError::SessionValidation(
                resp.error_message
                    .unwrap_or_else(|| "session is no longer valid".into()),
            )),
            Err(e) => Err(e),
        };

        match verdict {
            Ok(()) => {
                self.set_state(LifecycleState::Active);
                true
            }
            Err(e) => {
                warn!(kind = e.error_kind(), error = %e, "session rejected, clearing local state");
                if let Err(store) = self.repo.clear() {
                    warn!(error = %store, "failed to clear persisted session");
                }
                self.set_state(LifecycleState::Invalid);
                false
            }
        }
    }

    /// Validate the persisted session; `false` without a remote call when there is none.
    pub async fn validate_current(&self) -> bool {
        match self.session() {
            Some(session) => self.validate(&session.session_id).await,
            None => false,
        }
    }

    /// Remove persisted configuration and session. Idempotent.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.repo.clear()?;
        self.set_state(LifecycleState::Cleared);
        Ok(())
    }

    pub fn session(&self) -> Option<SessionInfo> {
        read_or_warn(self.repo.load_session(), "session")
    }

    pub fn config(&self) -> Option<ProviderConfig> {
        read_or_warn(self.repo.load_config(), "provider config")
    }

    pub fn device_id(&self) -> Result<DeviceId, SessionError> {
        Ok(self.repo.device_id()?)
    }

    pub fn is_configured(&self) -> bool {
        self.config().is_some() && self.session().is_some()
    }

    pub fn is_session_valid(&self) -> bool {
        self.session().is_some_and(|s| s.is_valid())
    }
}

fn initial_state(repo: &ClientStateRepo) -> LifecycleState {
    let config = read_or_warn(repo.load_config(), "provider config");
    let session = read_or_warn(repo.load_session(), "session");
    match (config, session) {
        (Some(_), Some(session)) if session.is_valid() => LifecycleState::Active,
        _ => LifecycleState::Unconfigured,
    }
}

/// Unreadable persisted entries behave as absent.
fn read_or_warn<T>(result: Result<Option<T>, ats_store::StoreError>, what: &str) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable persisted {what}");
            None
        }
    }
}
