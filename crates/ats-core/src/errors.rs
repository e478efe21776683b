/// Failures of the session lifecycle: provider test, session creation,
/// revalidation and the persisted store behind them.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    // Recoverable: the user fixes inputs and retries
    #[error("configuration test failed: {0}")]
    ConfigurationTest(String),
    #[error("session creation failed: {0}")]
    SessionCreation(String),

    // Handled internally by clearing local state
    #[error("session validation failed: {0}")]
    SessionValidation(String),

    #[error("store error: {0}")]
    Store(String),
}

impl SessionError {
    /// Remote- or locally-provided detail text, without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::ConfigurationTest(d)
            | Self::SessionCreation(d)
            | Self::SessionValidation(d)
            | Self::Store(d) => d,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConfigurationTest(_) => "configuration_test_failure",
            Self::SessionCreation(_) => "session_creation_failure",
            Self::SessionValidation(_) => "session_validation_failure",
            Self::Store(_) => "store_failure",
        }
    }
}

/// Failures of the persistent feedback connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("socket connect error: {0}")]
    SocketConnect(String),
    #[error("malformed message: {0}")]
    MessageParse(String),
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
    #[error("connection manager closed")]
    Closed,
}

impl ConnectionError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SocketConnect(_) => "socket_connect_error",
            Self::MessageParse(_) => "message_parse_error",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
            Self::Closed => "closed",
        }
    }
}
