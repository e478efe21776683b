use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ats_core::{ConnectionError, Envelope};

use crate::config::ConnectionConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Frames to transmit as soon as a socket opens, before anything else.
pub type OnConnect = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the driver reports to its single consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Message(Envelope),
    /// Automatic reconnection gave up; only `reconnect()` resumes.
    ReconnectExhausted { attempts: u32 },
}

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Send(String),
}

/// Handle to the connection driver task.
///
/// Commands are processed in call order. Dropping the handle tears the driver
/// down: the reconnect timer is cleared and the socket closed.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    _driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Spawn the driver. Starts `Disconnected`; nothing happens until `connect()`.
    pub fn spawn(
        config: ConnectionConfig,
        events: mpsc::Sender<ConnectionEvent>,
        on_connect: Option<OnConnect>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let driver = Driver {
            config,
            events,
            on_connect,
            state_tx,
            attempts: 0,
            reconnect_timer: None,
        };
        let handle = tokio::spawn(driver.run(cmd_rx, cancel.clone()));

        Self {
            cmd_tx,
            state_rx,
            cancel,
            _driver: handle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Open the socket unless already connected or connecting.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Cancel any pending reconnect and close the socket. Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Disconnect, reset the retry counter and connect again.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Transmit when connected; otherwise the payload is logged and dropped.
    pub fn send_message(&self, payload: impl Into<String>) {
        self.command(Command::Send(payload.into()));
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!(error = %ConnectionError::Closed, "command ignored");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Wake {
    Connect,
    Shutdown,
}

enum Attempt {
    Open(WsStream),
    Failed(ConnectionError),
    Abandoned,
    Shutdown,
}

enum Closed {
    Explicit,
    Restart,
    Unexpected,
    Shutdown,
}

/// Sole owner of the socket, retry counter and reconnect timer.
struct Driver {
    config: ConnectionConfig,
    events: mpsc::Sender<ConnectionEvent>,
    on_connect: Option<OnConnect>,
    state_tx: watch::Sender<ConnectionState>,
    attempts: u32,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        let mut connect_now = false;
        loop {
            if !connect_now {
                match self.idle(&mut cmd_rx, &cancel).await {
                    Wake::Connect => {}
                    Wake::Shutdown => break,
                }
            }
            connect_now = false;

            match self.attempt(&mut cmd_rx, &cancel).await {
                Attempt::Open(ws) => match self.connected(ws, &mut cmd_rx, &cancel).await {
                    Closed::Explicit => self.set_state(ConnectionState::Disconnected).await,
                    Closed::Restart => {
                        self.set_state(ConnectionState::Disconnected).await;
                        connect_now = true;
                    }
                    Closed::Unexpected => {
                        self.set_state(ConnectionState::Disconnected).await;
                        self.schedule_reconnect().await;
                    }
                    Closed::Shutdown => break,
                },
                Attempt::Failed(e) => {
                    warn!(url = %self.config.url, kind = e.error_kind(), error = %e, "connection attempt failed");
                    self.set_state(ConnectionState::Disconnected).await;
                    self.schedule_reconnect().await;
                }
                Attempt::Abandoned => self.set_state(ConnectionState::Disconnected).await,
                Attempt::Shutdown => break,
            }
        }

        self.reconnect_timer = None;
        let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
        debug!(url = %self.config.url, "connection driver stopped");
    }

    /// Wait while disconnected for an explicit connect or the reconnect timer.
    async fn idle(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        cancel: &CancellationToken,
    ) -> Wake {
        loop {
            let cmd = tokio::select! {
                biased;
                () = cancel.cancelled() => return Wake::Shutdown,
                cmd = cmd_rx.recv() => cmd,
                () = timer_elapsed(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    return Wake::Connect;
                }
            };

            match cmd {
                None => return Wake::Shutdown,
                Some(Command::Connect) => {
                    self.reconnect_timer = None;
                    return Wake::Connect;
                }
                Some(Command::Reconnect) => {
                    self.reconnect_timer = None;
                    self.attempts = 0;
                    return Wake::Connect;
                }
                Some(Command::Disconnect) => self.suppress_reconnect(),
                Some(Command::Send(payload)) => drop_unsent(&payload),
            }
        }
    }

    async fn attempt(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        cancel: &CancellationToken,
    ) -> Attempt {
        self.set_state(ConnectionState::Connecting).await;
        info!(url = %self.config.url, attempt = self.attempts, "connecting");

        let timeout = self.config.connect_timeout;
        let connecting = tokio::time::timeout(timeout, connect_async(self.config.url.clone()));
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Attempt::Shutdown,
                cmd = cmd_rx.recv() => match cmd {
                    None => return Attempt::Shutdown,
                    Some(Command::Disconnect) => {
                        self.suppress_reconnect();
                        info!(url = %self.config.url, "connection attempt abandoned");
                        return Attempt::Abandoned;
                    }
                    // The attempt in flight serves as the fresh one
                    Some(Command::Reconnect) => self.attempts = 0,
                    Some(Command::Connect) => {}
                    Some(Command::Send(payload)) => drop_unsent(&payload),
                },
                result = &mut connecting => {
                    return match result {
                        Ok(Ok((ws, _))) => Attempt::Open(ws),
                        Ok(Err(e)) => Attempt::Failed(ConnectionError::SocketConnect(e.to_string())),
                        Err(_) => Attempt::Failed(ConnectionError::SocketConnect(format!(
                            "timed out after {}ms",
                            timeout.as_millis()
                        ))),
                    };
                }
            }
        }
    }

    async fn connected(
        &mut self,
        ws: WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        cancel: &CancellationToken,
    ) -> Closed {
        let (mut sink, mut source) = ws.split();

        if let Some(hook) = &self.on_connect {
            for frame in hook() {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!(error = %e, "failed to send connect frame");
                    return Closed::Unexpected;
                }
            }
        }
        self.mark_connected().await;
        info!(url = %self.config.url, "connected");

        let period = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    close(&mut sink).await;
                    return Closed::Shutdown;
                }
                cmd = cmd_rx.recv() => match cmd {
                    None => {
                        close(&mut sink).await;
                        return Closed::Shutdown;
                    }
                    Some(Command::Send(payload)) => {
                        if let Err(e) = sink.send(Message::Text(payload.into())).await {
                            warn!(error = %e, "send failed, connection lost");
                            return Closed::Unexpected;
                        }
                    }
                    Some(Command::Connect) => debug!("already connected"),
                    Some(Command::Disconnect) => {
                        self.suppress_reconnect();
                        close(&mut sink).await;
                        info!(url = %self.config.url, "disconnected");
                        return Closed::Explicit;
                    }
                    Some(Command::Reconnect) => {
                        close(&mut sink).await;
                        self.attempts = 0;
                        return Closed::Restart;
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                        warn!(error = %e, "keep-alive ping failed");
                        return Closed::Unexpected;
                    }
                }
                frame = source.next() => {
                    if let Some(closed) = self.on_frame(frame).await {
                        return closed;
                    }
                }
            }
        }
    }

    /// Handle one inbound frame; `Some` when the socket is gone.
    async fn on_frame(
        &self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Option<Closed> {
        match frame {
            Some(Ok(Message::Text(text))) => self.deliver(&text).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.deliver(text).await,
                Err(e) => warn!(error = %e, "discarding non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!(url = %self.config.url, reason = ?frame, "server closed connection");
                return Some(Closed::Unexpected);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(url = %self.config.url, error = %e, "socket error");
                return Some(Closed::Unexpected);
            }
            None => {
                info!(url = %self.config.url, "socket closed");
                return Some(Closed::Unexpected);
            }
        }
        None
    }

    async fn deliver(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => self.emit(ConnectionEvent::Message(envelope)).await,
            Err(e) => warn!(kind = e.error_kind(), error = %e, "discarding malformed frame"),
        }
    }

    async fn schedule_reconnect(&mut self) {
        let max = self.config.max_reconnect_attempts;
        if self.attempts >= max {
            warn!(url = %self.config.url, attempts = self.attempts, "reconnect attempts exhausted");
            self.emit(ConnectionEvent::ReconnectExhausted {
                attempts: self.attempts,
            })
            .await;
            return;
        }
        self.attempts += 1;
        let delay = self.config.reconnect_interval;
        info!(
            url = %self.config.url,
            attempt = self.attempts,
            max,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    /// Only a fully established connection earns a fresh retry budget.
    async fn mark_connected(&mut self) {
        self.set_state(ConnectionState::Connected).await;
        self.attempts = 0;
    }

    /// Explicit disconnect: no timer, and a close arriving later must not reconnect.
    fn suppress_reconnect(&mut self) {
        self.reconnect_timer = None;
        self.attempts = self.config.max_reconnect_attempts;
    }

    async fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection state");
            self.emit(ConnectionEvent::StateChanged(next)).await;
        }
    }

    async fn emit(&self, event: ConnectionEvent) {
        // No consumer left is not an error for the transport
        let _ = self.events.send(event).await;
    }
}

fn timer_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }
}

fn drop_unsent(payload: &str) {
    warn!(bytes = payload.len(), "not connected, dropping outbound message");
}

async fn close(sink: &mut WsSink) {
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!(error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
}
