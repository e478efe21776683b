pub mod envelope;
pub mod errors;
pub mod ids;
pub mod provider;
pub mod security;
pub mod session;

pub use envelope::{
    ContextInfo, Envelope, FeedbackData, InboundMessage, NotificationData, OutboundRequest,
    ProgressUpdate,
};
pub use errors::{ConnectionError, SessionError};
pub use ids::{DeviceId, SessionId};
pub use provider::{Provider, ProviderConfig};
pub use security::ApiKey;
pub use session::SessionInfo;
