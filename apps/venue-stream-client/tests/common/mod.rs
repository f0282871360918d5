//! In-process mock of the venue's WebSocket service.
//!
//! Accepts any number of connections on `127.0.0.1:0`, answers the literal
//! `ping`, acknowledges subscribe and unsubscribe directives, replies to
//! login as scripted, and records every directive it receives.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use venue_stream_client::{ClientConfig, NoopLogger, OkxCredentials, ServiceKind, StreamClient};

/// How the mock answers a login directive.
#[derive(Debug, Clone)]
pub enum LoginReply {
    /// `{"event":"login","code":"0"}`.
    Accept,
    /// `{"event":"login","code":<code>,"msg":<msg>}`.
    Reject(&'static str, &'static str),
    /// `{"event":"error","code":<code>,"msg":<msg>}`.
    Error(&'static str, &'static str),
    /// No answer at all.
    Silent,
}

/// Mock behaviour.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub answer_pings: bool,
    pub login: LoginReply,
    pub login_delay: Duration,
    /// Frame sent as soon as the handshake completes.
    pub greeting: Option<&'static str>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            answer_pings: true,
            login: LoginReply::Accept,
            login_delay: Duration::ZERO,
            greeting: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Command {
    Push(String),
    DropAll,
}

/// A running mock venue.
pub struct MockVenue {
    port: u16,
    connections: Arc<AtomicUsize>,
    directives: Arc<Mutex<Vec<Value>>>,
    commands: broadcast::Sender<Command>,
}

impl MockVenue {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let directives = Arc::new(Mutex::new(Vec::new()));
        let (commands, _) = broadcast::channel(64);

        let accepted = Arc::clone(&connections);
        let recorded = Arc::clone(&directives);
        let command_tx = commands.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    index,
                    behavior.clone(),
                    Arc::clone(&recorded),
                    command_tx.subscribe(),
                ));
            }
        });

        Self {
            port,
            connections,
            directives,
            commands,
        }
    }

    pub fn url(&self, service: ServiceKind) -> String {
        format!("ws://127.0.0.1:{}/ws/v5/{service}", self.port)
    }

    /// Client for `service` with fast heartbeats and no log output.
    pub fn client(&self, service: ServiceKind) -> StreamClient {
        self.client_with(self.config(service))
    }

    pub fn config(&self, service: ServiceKind) -> ClientConfig {
        let mut config = ClientConfig::new(self.url(service), service).with_credentials(
            OkxCredentials::new("key".to_string(), "secret".to_string(), "pass".to_string()),
        );
        config.stream.heartbeat_interval = Duration::from_millis(200);
        config.stream.reconnect_delay_initial = Duration::from_millis(10);
        config.stream.reconnect_delay_max = Duration::from_millis(50);
        config
    }

    pub fn client_with(&self, config: ClientConfig) -> StreamClient {
        StreamClient::builder(config)
            .logger(Arc::new(NoopLogger))
            .build()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every directive received, in arrival order.
    pub fn directives(&self) -> Vec<Value> {
        self.directives.lock().clone()
    }

    /// Number of directives with `op`.
    pub fn count(&self, op: &str) -> usize {
        self.directives
            .lock()
            .iter()
            .filter(|d| d["op"] == op)
            .count()
    }

    /// Send `text` on every open connection.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Push(text.into()));
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::DropAll);
    }
}

async fn serve(
    stream: TcpStream,
    index: usize,
    behavior: Behavior,
    directives: Arc<Mutex<Vec<Value>>>,
    mut commands: broadcast::Receiver<Command>,
) {
    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = socket.split();
    let conn_id = format!("mock-{index}");

    if let Some(greeting) = behavior.greeting
        && sink.send(Message::Text(greeting.into())).await.is_err()
    {
        return;
    }

    loop {
        let reply = tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Push(text)) => Some(text),
                Ok(Command::DropAll) | Err(_) => return,
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), &conn_id, &behavior, &directives).await
                }
                Some(Ok(_)) => None,
                Some(Err(_)) | None => return,
            },
        };

        if let Some(reply) = reply
            && sink.send(Message::Text(reply.into())).await.is_err()
        {
            return;
        }
    }
}

async fn handle_text(
    text: &str,
    conn_id: &str,
    behavior: &Behavior,
    directives: &Mutex<Vec<Value>>,
) -> Option<String> {
    if text == "ping" {
        return behavior.answer_pings.then(|| "pong".to_string());
    }

    let directive: Value = serde_json::from_str(text).ok()?;
    directives.lock().push(directive.clone());

    match directive["op"].as_str()? {
        "login" => {
            tokio::time::sleep(behavior.login_delay).await;
            match behavior.login {
                LoginReply::Accept => {
                    Some(json!({"event": "login", "code": "0", "msg": "", "connId": conn_id}).to_string())
                }
                LoginReply::Reject(code, msg) => {
                    Some(json!({"event": "login", "code": code, "msg": msg, "connId": conn_id}).to_string())
                }
                LoginReply::Error(code, msg) => {
                    Some(json!({"event": "error", "code": code, "msg": msg, "connId": conn_id}).to_string())
                }
                LoginReply::Silent => None,
            }
        }
        op @ ("subscribe" | "unsubscribe") => Some(
            json!({"event": op, "arg": directive["args"][0], "connId": conn_id}).to_string(),
        ),
        _ => None,
    }
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Default wait for asynchronous effects.
pub const WAIT: Duration = Duration::from_secs(5);
