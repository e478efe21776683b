use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::ids::SessionId;

/// A server-acknowledged, time-bounded session. `expires_at > created_at` always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(
        session_id: SessionId,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if expires_at <= created_at {
            return Err(SessionError::SessionCreation(format!(
                "session {session_id} expires at {expires_at}, not after its creation at {created_at}"
            )));
        }
        Ok(Self {
            session_id,
            created_at,
            expires_at,
        })
    }

    /// Validity is derived from the wall clock, never stored.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: Duration) -> SessionInfo {
        let now = Utc::now();
        SessionInfo {
            session_id: SessionId::from_raw("s-1"),
            created_at: now - Duration::hours(1),
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn expired_one_second_ago_is_invalid() {
        assert!(!session(Duration::seconds(-1)).is_valid());
    }

    #[test]
    fn expiring_in_an_hour_is_valid() {
        assert!(session(Duration::seconds(3600)).is_valid());
    }

    #[test]
    fn validity_boundary_is_exclusive() {
        let s = session(Duration::hours(1));
        assert!(s.is_valid_at(s.expires_at - Duration::milliseconds(1)));
        assert!(!s.is_valid_at(s.expires_at));
    }

    #[test]
    fn new_rejects_non_increasing_window() {
        let now = Utc::now();
        let err = SessionInfo::new(SessionId::from_raw("s"), now, now).unwrap_err();
        assert!(matches!(err, SessionError::SessionCreation(_)));
        assert!(SessionInfo::new(SessionId::from_raw("s"), now, now + Duration::hours(24)).is_ok());
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let s = session(Duration::seconds(-30));
        assert_eq!(s.remaining(Utc::now()), Duration::zero());
        let s = session(Duration::hours(2));
        assert!(s.remaining(Utc::now()) > Duration::minutes(119));
    }

    #[test]
    fn persisted_shape_is_camel_case() {
        let s = session(Duration::hours(1));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert!(json["expiresAt"].is_string());
        let back: SessionInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
