use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConnectionError;

/// Wire names of every envelope `type`.
pub mod message_types {
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const REAL_TIME_FEEDBACK: &str = "real_time_feedback";
    pub const PROGRESS_UPDATE: &str = "progress_update";
    pub const NOTIFICATION: &str = "notification";
    pub const ERROR: &str = "error";
    pub const SET_CONTEXT: &str = "set_context";
    pub const REQUEST_FEEDBACK: &str = "request_feedback";
}

/// Uniform wrapper for every message on the feedback socket.
///
/// Only `type` is required for an inbound frame to parse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            session_id: None,
            user_id: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(text).map_err(|e| ConnectionError::MessageParse(e.to_string()))
    }

    pub fn to_wire(&self) -> Result<String, ConnectionError> {
        serde_json::to_string(self).map_err(|e| ConnectionError::MessageParse(e.to_string()))
    }
}

/// Server analysis of one document section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackData {
    pub session_id: String,
    pub section: String,
    pub character_count: u64,
    pub word_count: u64,
    pub readability_score: f64,
    pub current_quality_score: f64,
    pub ats_compatibility: f64,
    #[serde(default)]
    pub grammar_issues: Vec<String>,
    #[serde(default)]
    pub style_suggestions: Vec<String>,
    #[serde(default)]
    pub keyword_suggestions: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
}

/// Progress of a long-running server operation, 0–100.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub operation: String,
    pub progress: f64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ProgressUpdate {
    /// Same update with `progress` clamped into [0, 100]; NaN becomes 0.
    pub fn clamped(mut self) -> Self {
        self.progress = if self.progress.is_nan() {
            0.0
        } else {
            self.progress.clamp(0.0, 100.0)
        };
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound envelope classified by `type`.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    ConnectionEstablished(Value),
    Feedback(FeedbackData),
    Progress(ProgressUpdate),
    Notification(NotificationData),
    Error { message: String },
    Unhandled { kind: String },
}

#[derive(Deserialize)]
struct FeedbackPayload {
    feedback: FeedbackData,
}

impl InboundMessage {
    /// Classify purely by `type`. A known type with a mismatched payload is a parse error.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ConnectionError> {
        use message_types::*;

        let parse_err = |e: serde_json::Error| {
            ConnectionError::MessageParse(format!("{} payload: {e}", envelope.kind))
        };

        let message = match envelope.kind.as_str() {
            CONNECTION_ESTABLISHED => Self::ConnectionEstablished(envelope.data.clone()),
            REAL_TIME_FEEDBACK => {
                let payload: FeedbackPayload =
                    serde_json::from_value(envelope.data.clone()).map_err(parse_err)?;
                Self::Feedback(payload.feedback)
            }
            PROGRESS_UPDATE => {
                let update: ProgressUpdate =
                    serde_json::from_value(envelope.data.clone()).map_err(parse_err)?;
                Self::Progress(update.clamped())
            }
            NOTIFICATION => Self::Notification(
                serde_json::from_value(envelope.data.clone()).map_err(parse_err)?,
            ),
            ERROR => Self::Error {
                message: error_message(&envelope.data),
            },
            other => Self::Unhandled {
                kind: other.to_string(),
            },
        };
        Ok(message)
    }
}

fn error_message(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map_or_else(|| data.to_string(), str::to_string),
        Value::Null => "unspecified server error".to_string(),
        other => other.to_string(),
    }
}

/// Context the server scopes subsequent feedback to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ContextInfo {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.user_id.is_none()
    }
}

/// Typed outbound requests. Serialized flat, tagged by `type`.
///
/// There is no correlation id: a `real_time_feedback` reply cannot be matched
/// to the `request_feedback` that triggered it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundRequest {
    SetContext {
        context: ContextInfo,
    },
    RequestFeedback {
        section: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_content: Option<String>,
    },
}

impl OutboundRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetContext { .. } => message_types::SET_CONTEXT,
            Self::RequestFeedback { .. } => message_types::REQUEST_FEEDBACK,
        }
    }

    pub fn to_wire(&self) -> Result<String, ConnectionError> {
        serde_json::to_string(self).map_err(|e| ConnectionError::MessageParse(e.to_string()))
    }
}
