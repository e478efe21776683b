use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use ats_core::{SessionError, SessionId};

use crate::api::{
    CreateSessionRequest, CreateSessionResponse, SessionApi, TestConfigRequest,
    TestConfigResponse, ValidateSessionResponse,
};

/// Session API returning pre-programmed replies, one per call, per endpoint.
///
/// A call with nothing scripted fails with that endpoint's error variant.
#[derive(Default)]
pub struct MockSessionApi {
    tests: Mutex<VecDeque<Result<TestConfigResponse, SessionError>>>,
    creates: Mutex<VecDeque<Result<CreateSessionResponse, SessionError>>>,
    validations: Mutex<VecDeque<Result<ValidateSessionResponse, SessionError>>>,
    create_requests: Mutex<Vec<CreateSessionRequest>>,
    call_count: AtomicUsize,
}

impl MockSessionApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a full successful configure: test passes, create returns `session_id`
    /// expiring in `hours`.
    pub fn accepting(session_id: &str, hours: i64) -> Self {
        Self::new()
            .with_test(Ok(TestConfigResponse::ok()))
            .with_create(Ok(CreateSessionResponse {
                session_id: SessionId::from_raw(session_id),
                expires_at: Utc::now() + Duration::hours(hours),
            }))
    }

    pub fn with_test(self, reply: Result<TestConfigResponse, SessionError>) -> Self {
        self.tests.lock().push_back(reply);
        self
    }

    pub fn with_create(self, reply: Result<CreateSessionResponse, SessionError>) -> Self {
        self.creates.lock().push_back(reply);
        self
    }

    pub fn with_validation(self, reply: Result<ValidateSessionResponse, SessionError>) -> Self {
        self.validations.lock().push_back(reply);
        self
    }

    /// Total calls across all endpoints.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn create_requests(&self) -> Vec<CreateSessionRequest> {
        self.create_requests.lock().clone()
    }
}

#[async_trait]
impl SessionApi for MockSessionApi {
    async fn test_config(
        &self,
        _request: &TestConfigRequest,
    ) -> Result<TestConfigResponse, SessionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.tests.lock().pop_front().unwrap_or_else(|| {
            Err(SessionError::ConfigurationTest(format!(
                "MockSessionApi: no test reply scripted for call {idx}"
            )))
        })
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.create_requests.lock().push(request.clone());
        self.creates.lock().pop_front().unwrap_or_else(|| {
            Err(SessionError::SessionCreation(format!(
                "MockSessionApi: no create reply scripted for call {idx}"
            )))
        })
    }

    async fn validate_session(
        &self,
        _session_id: &SessionId,
    ) -> Result<ValidateSessionResponse, SessionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.validations.lock().pop_front().unwrap_or_else(|| {
            Err(SessionError::SessionValidation(format!(
                "MockSessionApi: no validation reply scripted for call {idx}"
            )))
        })
    }
}
