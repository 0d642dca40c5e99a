//! Bridge frames. Client ↔ backend JSON, discriminated by the "type" field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → backend frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage<'a> {
    /// Run a backend command; answered by a reply or error with the same id.
    Invoke {
        id: u64,
        cmd: &'a str,
        args: &'a Value,
    },
    /// Register `handler` for `event`; acknowledged by a reply with the same id.
    Listen {
        id: u64,
        event: &'a str,
        handler: u64,
    },
    /// Drop a registration. Not acknowledged.
    Unlisten { event: &'a str, handler: u64 },
}

/// Backend → client: command result.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyMessage {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
}

/// Backend → client: command failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub id: u64,
    pub message: String,
}

/// Backend → client: pushed event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// One backend frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Reply { id: u64, result: Value },
    Error { id: u64, message: String },
    Event { event: String, payload: Value },
}

impl BackendMessage {
    pub fn from_json(value: Value) -> Result<Self, String> {
        let typ = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or("missing type")?
            .to_string();
        match typ.as_str() {
            "reply" => {
                let m: ReplyMessage = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(BackendMessage::Reply {
                    id: m.id,
                    result: m.result,
                })
            }
            "error" => {
                let m: ErrorMessage = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(BackendMessage::Error {
                    id: m.id,
                    message: m.message,
                })
            }
            "event" => {
                let m: EventMessage = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(BackendMessage::Event {
                    event: m.event,
                    payload: m.payload,
                })
            }
            other => Err(format!("unknown type: {}", other)),
        }
    }
}
