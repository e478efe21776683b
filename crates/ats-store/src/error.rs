use ats_core::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state database: {0}")]
    Database(String),

    /// A persisted value under `key` no longer parses.
    #[error("unreadable value for {key}: {message}")]
    Serialization { key: String, message: String },

    #[error("state directory: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}
