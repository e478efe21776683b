use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ats_core::{
    ConnectionError, ContextInfo, Envelope, FeedbackData, InboundMessage, NotificationData,
    OutboundRequest, ProgressUpdate,
};

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, OnConnect};

/// Typed events surfaced to consumers. Each consumer filters by variant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FeedbackEvent {
    Feedback(FeedbackData),
    Progress(ProgressUpdate),
    Notification(NotificationData),
    ConnectionChanged(ConnectionState),
    ReconnectExhausted { attempts: u32 },
}

/// Last-value slots and the consumer fan-out.
struct RouterShared {
    context: RwLock<ContextInfo>,
    last_feedback: RwLock<Option<FeedbackData>>,
    last_progress: RwLock<Option<ProgressUpdate>>,
    last_notification: RwLock<Option<NotificationData>>,
    events: broadcast::Sender<FeedbackEvent>,
}

impl RouterShared {
    fn new(context: ContextInfo, buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            context: RwLock::new(context),
            last_feedback: RwLock::new(None),
            last_progress: RwLock::new(None),
            last_notification: RwLock::new(None),
            events,
        }
    }

    fn publish(&self, event: FeedbackEvent) {
        // No subscribers is fine; the last-value slots still update
        let _ = self.events.send(event);
    }

    fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.publish(FeedbackEvent::ConnectionChanged(state));
            }
            ConnectionEvent::ReconnectExhausted { attempts } => {
                let error = ConnectionError::ReconnectExhausted { attempts };
                warn!(kind = error.error_kind(), "{error}; call reconnect to resume");
                self.publish(FeedbackEvent::ReconnectExhausted { attempts });
            }
            ConnectionEvent::Message(envelope) => self.route(&envelope),
        }
    }

    /// Dispatch one inbound envelope purely by its `type`.
    fn route(&self, envelope: &Envelope) {
        let message = match InboundMessage::from_envelope(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(kind = e.error_kind(), message_type = %envelope.kind, error = %e, "discarding envelope");
                return;
            }
        };

        match message {
            InboundMessage::ConnectionEstablished(data) => {
                info!(details = %data, "feedback connection established");
            }
            InboundMessage::Feedback(feedback) => {
                debug!(section = %feedback.section, "feedback received");
                *self.last_feedback.write() = Some(feedback.clone());
                self.publish(FeedbackEvent::Feedback(feedback));
            }
            InboundMessage::Progress(progress) => {
                debug!(operation = %progress.operation, progress = progress.progress, "progress received");
                *self.last_progress.write() = Some(progress.clone());
                self.publish(FeedbackEvent::Progress(progress));
            }
            InboundMessage::Notification(notification) => {
                debug!(title = %notification.title, "notification received");
                *self.last_notification.write() = Some(notification.clone());
                self.publish(FeedbackEvent::Notification(notification));
            }
            InboundMessage::Error { message } => {
                warn!(error = %message, "server reported an error");
            }
            InboundMessage::Unhandled { kind } => {
                warn!(message_type = %kind, "unhandled message type");
            }
        }
    }

    /// `set_context` frame for the current context, if anything is known.
    fn context_frame(&self) -> Option<String> {
        let context = self.context.read().clone();
        if context.is_empty() {
            return None;
        }
        match (OutboundRequest::SetContext { context }).to_wire() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "failed to frame set_context");
                None
            }
        }
    }
}

/// Message Router over one Connection Manager.
///
/// Replies carry no correlation id: with several `request_feedback` calls
/// outstanding, `last_feedback()` holds whichever reply arrived last.
pub struct MessageRouter {
    connection: ConnectionManager,
    shared: Arc<RouterShared>,
    _dispatch: JoinHandle<()>,
}

impl MessageRouter {
    /// Spawn the connection driver and the dispatch task. Call `connect()` to go online.
    pub fn spawn(config: ConnectionConfig, context: ContextInfo) -> Self {
        let shared = Arc::new(RouterShared::new(context, config.event_buffer));
        let (event_tx, mut event_rx) = mpsc::channel(config.event_buffer.max(1));

        let hook_shared = Arc::clone(&shared);
        let on_connect: OnConnect = Arc::new(move || hook_shared.context_frame().into_iter().collect());
        let connection = ConnectionManager::spawn(config, event_tx, Some(on_connect));

        let dispatch_shared = Arc::clone(&shared);
        let dispatch = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                dispatch_shared.handle(event);
            }
            debug!("router dispatch stopped");
        });

        Self {
            connection,
            shared,
            _dispatch: dispatch,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackEvent> {
        self.shared.events.subscribe()
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Frame a typed request and hand it to the connection; dropped when offline.
    pub fn send(&self, request: &OutboundRequest) {
        match request.to_wire() {
            Ok(frame) => {
                debug!(message_type = request.kind(), "sending");
                self.connection.send_message(frame);
            }
            Err(e) => warn!(message_type = request.kind(), error = %e, "failed to frame request"),
        }
    }

    pub fn request_feedback(
        &self,
        section: impl Into<String>,
        content: impl Into<String>,
        previous_content: Option<String>,
    ) {
        self.send(&OutboundRequest::RequestFeedback {
            section: section.into(),
            content: content.into(),
            previous_content,
        });
    }

    /// Replace the context. Sent now when connected, and on every later connect.
    pub fn set_context(&self, context: ContextInfo) {
        *self.shared.context.write() = context.clone();
        if self.state() == ConnectionState::Connected {
            self.send(&OutboundRequest::SetContext { context });
        }
    }

    pub fn context(&self) -> ContextInfo {
        self.shared.context.read().clone()
    }

    pub fn last_feedback(&self) -> Option<FeedbackData> {
        self.shared.last_feedback.read().clone()
    }

    pub fn last_progress(&self) -> Option<ProgressUpdate> {
        self.shared.last_progress.read().clone()
    }

    pub fn last_notification(&self) -> Option<NotificationData> {
        self.shared.last_notification.read().clone()
    }

    pub fn clear_last(&self) {
        *self.shared.last_feedback.write() = None;
        *self.shared.last_progress.write() = None;
        *self.shared.last_notification.write() = None;
    }

    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}
