//! Streamed chat completion: token events plus one terminal reply.

use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::bridge::{Bridge, BridgeError, Listener};
use crate::commands::{ChatArgs, ChatClient, STREAM_CHATGPT_RESPONSE, TOKEN_EVENT};
use crate::types::{ApiKey, ChatResponse, EncodedImage, ModelName, SessionId, UserInput};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("token callback failed: {0}")]
    Callback(String),
}

impl<B: Bridge> ChatClient<B> {
    /// Ask for a completion and hand each token to `on_token` as it arrives.
    ///
    /// The `token` listener is registered before the request goes out and is
    /// torn down once the request settles, on every path, so `on_token` never
    /// runs after this returns. Tokens that reached the client before the
    /// final reply are all delivered, in order, before returning.
    ///
    /// Overlapping calls on one bridge share the `token` channel: each of
    /// them sees every token.
    pub async fn stream_chat_gpt_response<F, E>(
        &self,
        session_id: &SessionId,
        input: &UserInput,
        model: &ModelName,
        api_key: &ApiKey,
        on_token: F,
        images: &[EncodedImage],
    ) -> Option<ChatResponse>
    where
        F: FnMut(&str) -> Result<(), E>,
        E: fmt::Display,
    {
        let args = ChatArgs {
            input_session_id: session_id,
            message: input,
            model,
            api_key,
            base64_images: images,
        };
        match self.try_stream(&args, on_token).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!(command = STREAM_CHATGPT_RESPONSE, "Error during streaming: {}", e);
                None
            }
        }
    }

    async fn try_stream<F, E>(
        &self,
        args: &ChatArgs<'_>,
        mut on_token: F,
    ) -> Result<ChatResponse, StreamError>
    where
        F: FnMut(&str) -> Result<(), E>,
        E: fmt::Display,
    {
        let args = args.to_value()?;
        let mut listener = self.bridge().listen(TOKEN_EVENT).await?;

        let call = self.bridge().invoke(STREAM_CHATGPT_RESPONSE, args);
        tokio::pin!(call);

        let mut delivered = 0usize;
        let outcome = loop {
            tokio::select! {
                biased;
                Some(payload) = listener.recv() => {
                    deliver(&mut on_token, payload, &mut delivered)?;
                }
                result = &mut call => break result,
            }
        };

        // Tokens routed ahead of the reply may still sit in the queue.
        while let Some(payload) = listener.try_recv() {
            deliver(&mut on_token, payload, &mut delivered)?;
        }
        finish(listener, delivered);

        let value = outcome?;
        let response = serde_json::from_value(value).map_err(BridgeError::from)?;
        Ok(response)
    }
}

fn deliver<F, E>(on_token: &mut F, payload: Value, delivered: &mut usize) -> Result<(), StreamError>
where
    F: FnMut(&str) -> Result<(), E>,
    E: fmt::Display,
{
    match payload {
        Value::String(chunk) => {
            *delivered += 1;
            on_token(&chunk).map_err(|e| StreamError::Callback(e.to_string()))
        }
        other => {
            warn!("skipping non-text token payload: {}", other);
            Ok(())
        }
    }
}

fn finish(listener: Listener, delivered: usize) {
    debug!(event = listener.event(), delivered, "stream settled");
    listener.unlisten();
}
