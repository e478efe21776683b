use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const FEEDBACK_PATH: &str = "/ws/feedback";

const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Feedback socket settings.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Full `ws://` or `wss://` target, query included.
    pub url: String,
    /// Fixed delay before each automatic reconnect.
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    /// Capacity of the event channels towards the router and its subscribers.
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://localhost:8000{FEEDBACK_PATH}"),
            reconnect_interval: Duration::from_millis(3000),
            max_reconnect_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Build the feedback socket target from an API or socket base URL.
///
/// `http` maps to `ws` and `https` to `wss`; query parameters appear only when known.
pub fn feedback_url(base: &str, session_id: Option<&str>, user_id: Option<&str>) -> String {
    let base = base.trim().trim_end_matches('/');
    let mut url = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    if !url.ends_with(FEEDBACK_PATH) {
        url.push_str(FEEDBACK_PATH);
    }

    let params: Vec<String> = [("session_id", session_id), ("user_id", user_id)]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .filter(|v| !v.is_empty())
                .map(|v| format!("{name}={}", utf8_percent_encode(v, QUERY_VALUE)))
        })
        .collect();
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert_eq!(config.max_reconnect_attempts, 3);
    }

    #[test]
    fn scheme_mapping() {
        assert_eq!(
            feedback_url("https://api.example.com/", None, None),
            "wss://api.example.com/ws/feedback"
        );
        assert_eq!(
            feedback_url("http://localhost:8000", None, None),
            "ws://localhost:8000/ws/feedback"
        );
        assert_eq!(
            feedback_url("ws://host/ws/feedback", None, None),
            "ws://host/ws/feedback"
        );
    }

    #[test]
    fn query_only_when_known() {
        assert_eq!(
            feedback_url("http://h", Some("s-1"), None),
            "ws://h/ws/feedback?session_id=s-1"
        );
        assert_eq!(
            feedback_url("http://h", None, Some("device_9")),
            "ws://h/ws/feedback?user_id=device_9"
        );
        assert_eq!(
            feedback_url("http://h", Some("s-1"), Some("device_9")),
            "ws://h/ws/feedback?session_id=s-1&user_id=device_9"
        );
        assert_eq!(feedback_url("http://h", Some(""), None), "ws://h/ws/feedback");
    }

    #[test]
    fn query_values_are_encoded() {
        assert_eq!(
            feedback_url("http://h", Some("a b&c"), None),
            "ws://h/ws/feedback?session_id=a%20b%26c"
        );
    }
}
