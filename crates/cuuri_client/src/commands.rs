//! One adapter per backend command.
//!
//! Every adapter has the same shape: invoke a fixed command with a camelCase
//! argument record, decode the typed result, and on any failure log it and
//! return `None`. Callers only learn that the operation failed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::bridge::{Bridge, BridgeError};
use crate::history::materialize_all;
use crate::types::{
    ApiKey, ChatResponse, DatabaseChatEntry, EncodedImage, ModelName, RawDatabaseChatEntry,
    SessionId, UserInput,
};

pub const GENERATE_SESSION_ID: &str = "generate_session_id";
pub const GET_OPENAI_API_KEY: &str = "get_openai_api_key";
pub const SET_OPENAI_API_KEY: &str = "set_openai_api_key";
pub const GET_AVAILABLE_MODELS: &str = "get_available_models";
pub const GET_DEFAULT_MODEL: &str = "get_default_model";
pub const GET_CHATGPT_RESPONSE: &str = "get_chatgpt_response";
pub const STREAM_CHATGPT_RESPONSE: &str = "stream_chatgpt_response";
pub const GET_CHAT_HISTORY: &str = "get_chat_history";
pub const GET_CHAT_HISTORY_BY_SESSION: &str = "get_chat_history_by_session";
pub const GET_SESSION_ID_LIST: &str = "get_session_id_list";

/// Event channel carrying incremental tokens of a streamed answer.
pub const TOKEN_EVENT: &str = "token";

/// Arguments shared by the single-shot and streamed chat commands.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatArgs<'a> {
    pub input_session_id: &'a SessionId,
    pub message: &'a UserInput,
    pub model: &'a ModelName,
    pub api_key: &'a ApiKey,
    #[serde(skip_serializing_if = "no_images")]
    pub base64_images: &'a [EncodedImage],
}

fn no_images(images: &&[EncodedImage]) -> bool {
    images.is_empty()
}

impl ChatArgs<'_> {
    pub(crate) fn to_value(&self) -> Result<Value, BridgeError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Typed front for a [`Bridge`].
pub struct ChatClient<B> {
    bridge: B,
}

impl<B: Bridge> ChatClient<B> {
    pub fn new(bridge: B) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn into_bridge(self) -> B {
        self.bridge
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T, BridgeError> {
        let value = self.bridge.invoke(command, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Swallow-and-log boundary shared by every adapter.
    async fn call_or_log<T: DeserializeOwned>(
        &self,
        command: &str,
        args: Value,
        what: &str,
    ) -> Option<T> {
        match self.call(command, args).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(command, "Failed to {}: {}", what, e);
                None
            }
        }
    }

    pub async fn generate_session_id(&self) -> Option<SessionId> {
        self.call_or_log(GENERATE_SESSION_ID, json!({}), "generate session id")
            .await
    }

    pub async fn get_api_key(&self) -> Option<ApiKey> {
        self.call_or_log(GET_OPENAI_API_KEY, json!({}), "get API key")
            .await
    }

    /// Store a new credential in the backend config.
    pub async fn set_api_key(&self, api_key: &ApiKey) -> Option<()> {
        let _: Value = self
            .call_or_log(SET_OPENAI_API_KEY, json!({ "apiKey": api_key }), "set API key")
            .await?;
        Some(())
    }

    pub async fn get_available_models(&self, api_key: &ApiKey) -> Option<Vec<ModelName>> {
        self.call_or_log(
            GET_AVAILABLE_MODELS,
            json!({ "apiKey": api_key }),
            "get available models",
        )
        .await
    }

    /// The backend answers `null` when no default is configured; that is
    /// reported as `None` without an error log.
    pub async fn get_default_model(&self) -> Option<ModelName> {
        let model: Option<ModelName> = self
            .call_or_log(GET_DEFAULT_MODEL, json!({}), "get default model")
            .await?;
        if model.is_none() {
            debug!("backend has no default model configured");
        }
        model
    }

    /// Single-shot completion: the full answer arrives in one reply.
    pub async fn get_chat_gpt_response(
        &self,
        session_id: &SessionId,
        input: &UserInput,
        model: &ModelName,
        api_key: &ApiKey,
        images: &[EncodedImage],
    ) -> Option<ChatResponse> {
        let args = ChatArgs {
            input_session_id: session_id,
            message: input,
            model,
            api_key,
            base64_images: images,
        };
        let args = match args.to_value() {
            Ok(args) => args,
            Err(e) => {
                error!(command = GET_CHATGPT_RESPONSE, "Failed to encode chat request: {}", e);
                return None;
            }
        };
        self.call_or_log(
            GET_CHATGPT_RESPONSE,
            args,
            "get the response from the chat API",
        )
        .await
    }

    /// Every persisted turn in wire form.
    pub async fn get_chat_history(&self) -> Option<Vec<RawDatabaseChatEntry>> {
        self.call_or_log(GET_CHAT_HISTORY, json!({}), "get chat history")
            .await
    }

    /// Every persisted turn, rendered for display.
    pub async fn get_database_chat_entry_list(&self) -> Option<Vec<DatabaseChatEntry>> {
        let raw = self.get_chat_history().await?;
        Some(materialize_all(&raw))
    }

    pub async fn get_database_chat_entry_by_session(
        &self,
        session_id: &SessionId,
    ) -> Option<Vec<DatabaseChatEntry>> {
        let raw: Vec<RawDatabaseChatEntry> = self
            .call_or_log(
                GET_CHAT_HISTORY_BY_SESSION,
                json!({ "targetSessionId": session_id }),
                "get chat history for session",
            )
            .await?;
        Some(materialize_all(&raw))
    }

    pub async fn get_session_id_list(&self) -> Option<Vec<SessionId>> {
        self.call_or_log(GET_SESSION_ID_LIST, json!({}), "get session id list")
            .await
    }
}
