use std::time::Duration;

/// Session lifecycle settings.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base URL of the session API, without trailing slash.
    pub api_base_url: String,
    pub session_duration_hours: u32,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Sampling settings for the canned test prompt.
    pub test_temperature: f32,
    pub test_max_tokens: u32,
    /// Sampling settings stored with the created session.
    pub session_temperature: f32,
    pub session_max_tokens: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            session_duration_hours: 24,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            test_temperature: 0.1,
            test_max_tokens: 50,
            session_temperature: 0.7,
            session_max_tokens: 2048,
        }
    }
}

impl SessionConfig {
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.session_duration_hours, 24);
        assert_eq!(config.test_max_tokens, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = SessionConfig::default().with_api_base_url("https://api.example.com/");
        assert_eq!(
            config.endpoint("/session/create"),
            "https://api.example.com/session/create"
        );
    }
}
