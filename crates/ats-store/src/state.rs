use ats_core::{DeviceId, ProviderConfig, SessionInfo};
use tracing::{info, instrument};

use crate::error::StoreError;
use crate::kv::{encode, keys, KvStore};

/// Typed access to the three persisted client entries.
#[derive(Clone)]
pub struct ClientStateRepo {
    kv: KvStore,
}

impl ClientStateRepo {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn load_config(&self) -> Result<Option<ProviderConfig>, StoreError> {
        self.kv.get(keys::LLM_CONFIG)
    }

    pub fn load_session(&self) -> Result<Option<SessionInfo>, StoreError> {
        self.kv.get(keys::SESSION)
    }

    /// Persist a new session with its configuration, replacing any previous pair.
    #[instrument(skip_all, fields(session_id = %session.session_id, provider = %config.provider))]
    pub fn save(&self, config: &ProviderConfig, session: &SessionInfo) -> Result<(), StoreError> {
        self.kv.put_all(&[
            (keys::LLM_CONFIG, encode(keys::LLM_CONFIG, config)?),
            (keys::SESSION, encode(keys::SESSION, session)?),
        ])
    }

    /// Remove configuration and session. Idempotent; the device identity survives.
    pub fn clear(&self) -> Result<(), StoreError> {
        if self.kv.remove_all(&[keys::LLM_CONFIG, keys::SESSION])? > 0 {
            info!("cleared persisted provider configuration and session");
        }
        Ok(())
    }

    /// Stable device identity, generated and persisted on first use.
    pub fn device_id(&self) -> Result<DeviceId, StoreError> {
        if let Some(id) = self.kv.get::<DeviceId>(keys::DEVICE_ID)? {
            return Ok(id);
        }
        let id = DeviceId::generate();
        self.kv.put(keys::DEVICE_ID, &id)?;
        info!(device_id = %id, "generated device identity");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use ats_core::{Provider, SessionId};
    use chrono::{Duration, Utc};

    fn repo() -> ClientStateRepo {
        ClientStateRepo::new(KvStore::in_memory().unwrap())
    }

    fn session(id: &str) -> SessionInfo {
        let now = Utc::now();
        SessionInfo::new(SessionId::from_raw(id), now, now + Duration::hours(24)).unwrap()
    }

    #[test]
    fn save_then_load() {
        let repo = repo();
        let config = ProviderConfig::new(Provider::Claude).with_api_key("sk-ant");
        repo.save(&config, &session("s-1")).unwrap();

        assert_eq!(repo.load_config().unwrap(), Some(config));
        assert_eq!(repo.load_session().unwrap().unwrap().session_id.as_str(), "s-1");
    }

    #[test]
    fn save_supersedes_previous_session() {
        let repo = repo();
        let config = ProviderConfig::new(Provider::Ollama);
        repo.save(&config, &session("s-old")).unwrap();
        repo.save(&config, &session("s-new")).unwrap();
        assert_eq!(repo.load_session().unwrap().unwrap().session_id.as_str(), "s-new");
    }

    #[test]
    fn clear_is_idempotent_and_keeps_device() {
        let repo = repo();
        let device = repo.device_id().unwrap();
        repo.save(&ProviderConfig::new(Provider::Ollama), &session("s-1")).unwrap();

        repo.clear().unwrap();
        assert!(repo.load_config().unwrap().is_none());
        assert!(repo.load_session().unwrap().is_none());
        repo.clear().unwrap();
        assert!(repo.load_session().unwrap().is_none());

        assert_eq!(repo.device_id().unwrap(), device);
    }

    fn fail_on(db: &Database, trigger: &str) {
        db.with_conn(|conn| {
            conn.execute_batch(trigger)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn failed_save_keeps_previous_pair() {
        let db = Database::in_memory().unwrap();
        let repo = ClientStateRepo::new(KvStore::new(db.clone()));
        repo.save(&ProviderConfig::new(Provider::Ollama), &session("s-old")).unwrap();
        fail_on(
            &db,
            "CREATE TRIGGER reject_session BEFORE INSERT ON kv WHEN NEW.key = 'resume-ats-session'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        );

        let next = ProviderConfig::new(Provider::Ollama).with_model("phi3");
        assert!(repo.save(&next, &session("s-new")).is_err());

        assert_eq!(repo.load_config().unwrap().unwrap().model, None);
        assert_eq!(repo.load_session().unwrap().unwrap().session_id.as_str(), "s-old");
    }

    #[test]
    fn failed_clear_removes_nothing() {
        let db = Database::in_memory().unwrap();
        let repo = ClientStateRepo::new(KvStore::new(db.clone()));
        repo.save(&ProviderConfig::new(Provider::Ollama), &session("s-1")).unwrap();
        fail_on(
            &db,
            "CREATE TRIGGER keep_session BEFORE DELETE ON kv WHEN OLD.key = 'resume-ats-session'
             BEGIN SELECT RAISE(ABORT, 'locked'); END;",
        );

        assert!(repo.clear().is_err());
        assert!(repo.load_config().unwrap().is_some());
        assert!(repo.load_session().unwrap().is_some());
    }

    #[test]
    fn device_id_is_stable() {
        let repo = repo();
        let first = repo.device_id().unwrap();
        let second = repo.device_id().unwrap();
        assert_eq!(first, second);
        assert!(first.as_str().starts_with("device_"));
    }
}
