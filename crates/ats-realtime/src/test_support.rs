//! In-process feedback server for connection and router tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub enum ServerCmd {
    Text(String),
    Close,
}

pub struct TestServer {
    pub url: String,
    /// When false, TCP connections are accepted and dropped before the handshake.
    pub accept_ws: Arc<AtomicBool>,
    pub tcp_accepts: Arc<AtomicUsize>,
    /// Ping frames received across all connections.
    pub pings: Arc<AtomicUsize>,
    pub received: mpsc::UnboundedReceiver<String>,
    pub conns: mpsc::UnboundedReceiver<mpsc::UnboundedSender<ServerCmd>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_ws = Arc::new(AtomicBool::new(true));
        let tcp_accepts = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let (received_tx, received) = mpsc::unbounded_channel();
        let (conns_tx, conns) = mpsc::unbounded_channel();

        let accept_flag = accept_ws.clone();
        let accepts = tcp_accepts.clone();
        let ping_count = pings.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepts.fetch_add(1, Ordering::SeqCst);
                if !accept_flag.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                let Ok(ws) = accept_async(stream).await else { continue };
                let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
                let _ = conns_tx.send(cmd_tx);
                let received_tx = received_tx.clone();
                let ping_count = ping_count.clone();
                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = received_tx.send(text.to_string());
                                }
                                Some(Ok(Message::Ping(_))) => {
                                    ping_count.fetch_add(1, Ordering::SeqCst);
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            cmd = cmd_rx.recv() => match cmd {
                                Some(ServerCmd::Text(text)) => {
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(ServerCmd::Close) | None => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws/feedback"),
            accept_ws,
            tcp_accepts,
            pings,
            received,
            conns,
        }
    }

    pub fn refuse_handshakes(&self) {
        self.accept_ws.store(false, Ordering::SeqCst);
    }

    pub fn allow_handshakes(&self) {
        self.accept_ws.store(true, Ordering::SeqCst);
    }

    pub fn accepts(&self) -> usize {
        self.tcp_accepts.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Control handle of the next accepted socket.
    pub async fn next_conn(&mut self) -> mpsc::UnboundedSender<ServerCmd> {
        tokio::time::timeout(Duration::from_secs(5), self.conns.recv())
            .await
            .expect("no connection within 5s")
            .expect("server stopped")
    }

    /// Next text frame sent by the client.
    pub async fn next_text(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("no frame within 5s")
            .expect("server stopped")
    }
}

/// Accepts TCP connections and holds them without ever answering the handshake.
/// Returns the socket URL and the accept counter.
pub async fn stalling_listener() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/feedback", listener.local_addr().unwrap());
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });
    (url, accepts)
}
