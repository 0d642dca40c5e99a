//! In-process backend speaking the bridge protocol over a real WebSocket.
//! Each command gets a scripted outcome; every frame the client sends is
//! recorded for assertions.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone)]
pub enum Script {
    Reply(Value),
    Fail(String),
    /// Emit each value as a `token` event, then settle with `outcome`, or
    /// never answer when it is `None`.
    Stream {
        tokens: Vec<Value>,
        outcome: Option<Result<Value, String>>,
    },
    /// Never answer.
    Silent,
    /// Close the connection instead of answering.
    Hangup,
}

#[derive(Debug, Default, Clone)]
pub struct Record {
    pub invocations: Vec<(String, Value)>,
    pub listens: Vec<String>,
    pub unlistens: usize,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    rejected_events: Arc<Mutex<Vec<String>>>,
    record: Arc<Mutex<Record>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, command: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), script);
        self
    }

    pub fn reply(self, command: &str, result: Value) -> Self {
        self.on(command, Script::Reply(result))
    }

    pub fn fail(self, command: &str, message: &str) -> Self {
        self.on(command, Script::Fail(message.to_string()))
    }

    pub fn stream(self, command: &str, tokens: &[&str], outcome: Result<Value, String>) -> Self {
        let tokens = tokens.iter().map(|t| json!(t)).collect();
        self.on(
            command,
            Script::Stream {
                tokens,
                outcome: Some(outcome),
            },
        )
    }

    /// Emit `tokens` and then leave the call unanswered.
    pub fn stream_then_silence(self, command: &str, tokens: &[&str]) -> Self {
        let tokens = tokens.iter().map(|t| json!(t)).collect();
        self.on(command, Script::Stream { tokens, outcome: None })
    }

    /// Answer `listen` requests for `event` with an error.
    pub fn reject_listen(self, event: &str) -> Self {
        self.rejected_events.lock().unwrap().push(event.to_string());
        self
    }

    pub fn record(&self) -> Record {
        self.record.lock().unwrap().clone()
    }

    /// Arguments of the first invocation of `command`.
    pub fn args_of(&self, command: &str) -> Option<Value> {
        self.record()
            .invocations
            .into_iter()
            .find(|(cmd, _)| cmd == command)
            .map(|(_, args)| args)
    }

    /// Serve on an ephemeral port from the current runtime; returns the URL.
    pub async fn spawn(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, self.clone()));
        url
    }

    /// Serve from a dedicated thread, for tests that drive the binary.
    pub fn spawn_on_thread(&self) -> String {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let url = format!("ws://{}", std_listener.local_addr().unwrap());
        let backend = self.clone();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = TcpListener::from_std(std_listener).unwrap();
                serve(listener, backend).await;
            });
        });
        url
    }

    /// Poll the record until `check` holds; panics after two seconds.
    pub async fn wait_for(&self, what: &str, check: impl Fn(&Record) -> bool) {
        for _ in 0..200 {
            if check(&self.record()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}: {:?}", what, self.record());
    }
}

async fn serve(listener: TcpListener, backend: FakeBackend) {
    while let Ok((tcp, _)) = listener.accept().await {
        tokio::spawn(handle(tcp, backend.clone()));
    }
}

async fn handle(tcp: TcpStream, backend: FakeBackend) {
    let Ok(ws) = accept_async(tcp).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).unwrap();

        let replies = match frame["type"].as_str() {
            Some("listen") => {
                let event = frame["event"].as_str().unwrap_or_default().to_string();
                let rejected = backend.rejected_events.lock().unwrap().contains(&event);
                backend.record.lock().unwrap().listens.push(event);
                if rejected {
                    vec![json!({"type": "error", "id": frame["id"], "message": "event not allowed"})]
                } else {
                    vec![json!({"type": "reply", "id": frame["id"], "result": null})]
                }
            }
            Some("unlisten") => {
                backend.record.lock().unwrap().unlistens += 1;
                Vec::new()
            }
            Some("invoke") => {
                let cmd = frame["cmd"].as_str().unwrap_or_default().to_string();
                backend
                    .record
                    .lock()
                    .unwrap()
                    .invocations
                    .push((cmd.clone(), frame["args"].clone()));
                let script = backend
                    .scripts
                    .lock()
                    .unwrap()
                    .get(&cmd)
                    .cloned()
                    .unwrap_or_else(|| Script::Fail(format!("unknown command {}", cmd)));
                match script {
                    Script::Reply(result) => {
                        vec![json!({"type": "reply", "id": frame["id"], "result": result})]
                    }
                    Script::Fail(message) => {
                        vec![json!({"type": "error", "id": frame["id"], "message": message})]
                    }
                    Script::Stream { tokens, outcome } => {
                        let mut out: Vec<Value> = tokens
                            .into_iter()
                            .map(|t| json!({"type": "event", "event": "token", "payload": t}))
                            .collect();
                        match outcome {
                            Some(Ok(result)) => out.push(
                                json!({"type": "reply", "id": frame["id"], "result": result}),
                            ),
                            Some(Err(message)) => out.push(
                                json!({"type": "error", "id": frame["id"], "message": message}),
                            ),
                            None => {}
                        }
                        out
                    }
                    Script::Silent => Vec::new(),
                    Script::Hangup => {
                        let _ = write.close().await;
                        return;
                    }
                }
            }
            _ => Vec::new(),
        };

        for reply in replies {
            if write.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}

/// A port with nothing listening on it.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
