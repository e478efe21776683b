use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque string identifiers. The wrapped text is passed through untouched.
macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

opaque_id!(
    /// Issued by the session service; never minted locally.
    SessionId
);
opaque_id!(
    /// Stable per installation, sent as `user_id` on the feedback socket.
    DeviceId
);

impl DeviceId {
    pub fn generate() -> Self {
        Self(format!("device_{}", Uuid::now_v7().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_device_ids_are_prefixed_and_distinct() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert!(a.as_str().starts_with("device_"), "got: {a}");
        assert!(!a.as_str().contains('-'));
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_kept_verbatim() {
        let id = SessionId::from_raw("9f1c2d7e-server-issued");
        assert_eq!(id.to_string(), "9f1c2d7e-server-issued");
        assert_eq!(String::from(id), "9f1c2d7e-server-issued");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = DeviceId::from_raw("device_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""device_abc""#);
        let parsed: DeviceId = serde_json::from_str(r#""device_abc""#).unwrap();
        assert_eq!(parsed, id);
    }
}
