use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument, warn};

use ats_core::{ApiKey, DeviceId, Provider, ProviderConfig, SessionError, SessionId};

use crate::config::SessionConfig;

pub const TEST_PROMPT: &str = "Hello, this is a test message. Please respond with 'OK'.";
const CLIENT_NAME: &str = "ats-feedback";

/// Remote session API consumed by the lifecycle manager.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn test_config(&self, request: &TestConfigRequest)
        -> Result<TestConfigResponse, SessionError>;

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError>;

    async fn validate_session(
        &self,
        session_id: &SessionId,
    ) -> Result<ValidateSessionResponse, SessionError>;
}

#[derive(Clone, Debug, Serialize)]
pub struct TestConfigRequest {
    pub provider: Provider,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub test_prompt: String,
}

impl TestConfigRequest {
    pub fn new(config: &ProviderConfig, settings: &SessionConfig) -> Self {
        Self {
            provider: config.provider,
            model_name: config.model_name().to_string(),
            api_key: config.api_key.clone(),
            base_url: config.base_url().map(str::to_string),
            temperature: settings.test_temperature,
            max_tokens: settings.test_max_tokens,
            test_prompt: TEST_PROMPT.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TestConfigResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// The model's answer to the test prompt.
    #[serde(default)]
    pub response: Option<String>,
}

impl TestConfigResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            response: Some("OK".into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            response: None,
        }
    }
}

/// Provider settings as stored with a created session.
#[derive(Clone, Debug, Serialize)]
pub struct LlmConfigBody {
    pub provider: Provider,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionMetadata {
    pub client: String,
    pub client_version: String,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            client: CLIENT_NAME.into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateSessionRequest {
    pub llm_config: LlmConfigBody,
    pub device_id: DeviceId,
    pub session_duration_hours: u32,
    pub metadata: SessionMetadata,
}

impl CreateSessionRequest {
    pub fn new(config: &ProviderConfig, device_id: DeviceId, settings: &SessionConfig) -> Self {
        Self {
            llm_config: LlmConfigBody {
                provider: config.provider,
                model_name: config.model_name().to_string(),
                api_key: config.api_key.clone(),
                base_url: config.base_url().map(str::to_string),
                organization_id: config.organization_id.clone(),
                deployment_name: config.deployment_name.clone(),
                temperature: settings.session_temperature,
                max_tokens: settings.session_max_tokens,
            },
            device_id,
            session_duration_hours: settings.session_duration_hours,
            metadata: SessionMetadata::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ValidateSessionResponse {
    pub valid: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ValidateSessionResponse {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error_message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error_message: Some(message.into()),
        }
    }
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Pull a human-readable message out of an error body.
///
/// Prefers `detail` (string or structured), then `message`, then the raw text.
fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }
}

/// reqwest-backed client for the session API.
pub struct HttpSessionApi {
    client: Client,
    config: SessionConfig,
}

impl HttpSessionApi {
    pub fn new(config: SessionConfig) -> Self {
        let client = match Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    error = %e,
                    connect_timeout_ms = config.connect_timeout.as_millis() as u64,
                    request_timeout_ms = config.request_timeout.as_millis() as u64,
                    "HTTP client builder failed, falling back to defaults without timeouts"
                );
                Client::new()
            }
        };
        Self { client, config }
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    #[instrument(skip_all, fields(provider = %request.provider, model = %request.model_name))]
    async fn test_config(
        &self,
        request: &TestConfigRequest,
    ) -> Result<TestConfigResponse, SessionError> {
        let url = self.config.endpoint("/session/test-config");
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::ConfigurationTest(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::ConfigurationTest(format!("reading response: {e}")))?;
        debug!(%status, "test-config response");

        if !status.is_success() {
            return Err(SessionError::ConfigurationTest(error_detail(status, &body)));
        }
        serde_json::from_str(&body)
            .map_err(|e| SessionError::ConfigurationTest(format!("unexpected response: {e}")))
    }

    #[instrument(skip_all, fields(device_id = %request.device_id))]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError> {
        let url = self.config.endpoint("/session/create");
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::SessionCreation(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::SessionCreation(format!("reading response: {e}")))?;

        if !status.is_success() {
            return Err(SessionError::SessionCreation(error_detail(status, &body)));
        }
        serde_json::from_str(&body)
            .map_err(|e| SessionError::SessionCreation(format!("unexpected response: {e}")))
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn validate_session(
        &self,
        session_id: &SessionId,
    ) -> Result<ValidateSessionResponse, SessionError> {
        let segment = url_path_segment(session_id.as_str());
        let url = self.config.endpoint(&format!("/session/validate/{segment}"));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::SessionValidation(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::SessionValidation(format!("reading response: {e}")))?;

        // An unknown session is a definite "no", not a transport problem
        if status == StatusCode::NOT_FOUND {
            return Ok(ValidateSessionResponse::invalid(error_detail(status, &body)));
        }
        if !status.is_success() {
            return Err(SessionError::SessionValidation(error_detail(status, &body)));
        }
        serde_json::from_str(&body)
            .map_err(|e| SessionError::SessionValidation(format!("unexpected response: {e}")))
    }
}

/// Unreserved characters stay as-is; everything else in a server-issued id is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn url_path_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HttpSessionApi {
        HttpSessionApi::new(SessionConfig::default().with_api_base_url(server.uri()))
    }

    fn claude() -> ProviderConfig {
        ProviderConfig::new(Provider::Claude).with_api_key("sk-ant-1")
    }

    #[test]
    fn test_request_body_shape() {
        let req = TestConfigRequest::new(&claude(), &SessionConfig::default());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["provider"], "claude");
        assert_eq!(json["model_name"], "claude-3-5-sonnet-20241022");
        assert_eq!(json["api_key"], "sk-ant-1");
        assert_eq!(json["max_tokens"], 50);
        assert_eq!(json["test_prompt"], TEST_PROMPT);
        assert!(json.get("base_url").is_none());
    }

    #[test]
    fn create_request_body_shape() {
        let config = ProviderConfig::new(Provider::Ollama).with_model("mistral");
        let req = CreateSessionRequest::new(
            &config,
            DeviceId::from_raw("device_1"),
            &SessionConfig::default(),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["device_id"], "device_1");
        assert_eq!(json["session_duration_hours"], 24);
        assert_eq!(json["llm_config"]["model_name"], "mistral");
        assert_eq!(json["llm_config"]["base_url"], "http://localhost:11434");
        assert_eq!(json["llm_config"]["max_tokens"], 2048);
        assert_eq!(json["metadata"]["client"], "ats-feedback");
        assert!(json["llm_config"].get("api_key").is_none());
    }

    #[test]
    fn request_debug_hides_key() {
        let req = TestConfigRequest::new(&claude(), &SessionConfig::default());
        assert!(!format!("{req:?}").contains("sk-ant-1"));
    }

    #[test]
    fn parses_naive_and_offset_timestamps() {
        let a = parse_timestamp("2026-01-02T03:04:05.123456").unwrap();
        let b = parse_timestamp("2026-01-02T03:04:05.123456+00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn error_detail_prefers_detail_field() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_detail(status, r#"{"detail":"bad key"}"#), "bad key");
        assert_eq!(error_detail(status, r#"{"message":"nope"}"#), "nope");
        assert_eq!(error_detail(status, ""), "HTTP 400 Bad Request");
        assert!(error_detail(status, r#"{"detail":[{"loc":["body"]}]}"#).contains("loc"));
    }

    #[test]
    fn path_segment_escapes_separators() {
        assert_eq!(url_path_segment("abc-123"), "abc-123");
        assert_eq!(url_path_segment("a/b c"), "a%2Fb%20c");
    }

    #[tokio::test]
    async fn test_config_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/test-config"))
            .and(body_partial_json(serde_json::json!({"provider": "claude"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "response": "OK"
            })))
            .mount(&server)
            .await;

        let req = TestConfigRequest::new(&claude(), &SessionConfig::default());
        let resp = api(&server).test_config(&req).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.response.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn test_config_surfaces_remote_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/test-config"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"detail": "Invalid API key"})),
            )
            .mount(&server)
            .await;

        let req = TestConfigRequest::new(&claude(), &SessionConfig::default());
        let err = api(&server).test_config(&req).await.unwrap_err();
        assert_eq!(err, SessionError::ConfigurationTest("Invalid API key".into()));
    }

    #[tokio::test]
    async fn create_session_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": "srv-42",
                "expires_at": "2030-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let req = CreateSessionRequest::new(
            &claude(),
            DeviceId::from_raw("device_1"),
            &SessionConfig::default(),
        );
        let resp = api(&server).create_session(&req).await.unwrap();
        assert_eq!(resp.session_id.as_str(), "srv-42");
        assert_eq!(resp.expires_at.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn create_session_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/create"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(serde_json::json!({"detail": "db down"})),
            )
            .mount(&server)
            .await;

        let req = CreateSessionRequest::new(
            &claude(),
            DeviceId::from_raw("device_1"),
            &SessionConfig::default(),
        );
        let err = api(&server).create_session(&req).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionCreation(ref d) if d == "db down"));
    }

    #[tokio::test]
    async fn validate_session_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/validate/live"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/validate/gone"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "Session not found"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/validate/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = api(&server);
        assert!(api.validate_session(&SessionId::from_raw("live")).await.unwrap().valid);

        let gone = api.validate_session(&SessionId::from_raw("gone")).await.unwrap();
        assert!(!gone.valid);
        assert_eq!(gone.error_message.as_deref(), Some("Session not found"));

        let err = api
            .validate_session(&SessionId::from_raw("broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionValidation(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_configuration_failure() {
        let config = SessionConfig::default().with_api_base_url("http://127.0.0.1:1");
        let req = TestConfigRequest::new(&claude(), &config);
        let api = HttpSessionApi::new(config);
        let err = api.test_config(&req).await.unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationTest(ref d) if d.starts_with("request failed")));
    }

    #[tokio::test]
    async fn request_timeout_is_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/validate/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"valid": true}))
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = SessionConfig {
            request_timeout: std::time::Duration::from_millis(200),
            ..SessionConfig::default().with_api_base_url(server.uri())
        };
        let started = std::time::Instant::now();
        let err = HttpSessionApi::new(config)
            .validate_session(&SessionId::from_raw("slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionValidation(_)), "got: {err}");
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
