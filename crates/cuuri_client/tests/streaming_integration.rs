//! Integration tests for streamed completions over a real WebSocket bridge.

mod common;

use common::{FakeBackend, Script};
use cuuri_client::{
    connect, ApiKey, ChatClient, ChatResponse, ModelName, SessionId, UserInput, WsBridge,
    TOKEN_EVENT,
};
use serde_json::json;

const STREAM: &str = "stream_chatgpt_response";

async fn client_for(backend: &FakeBackend) -> ChatClient<WsBridge> {
    let url = backend.spawn().await;
    ChatClient::new(connect(&url).await.expect("connect should succeed"))
}

async fn ask(client: &ChatClient<WsBridge>, seen: &mut Vec<String>) -> Option<ChatResponse> {
    client
        .stream_chat_gpt_response(
            &SessionId::new("s1"),
            &UserInput::new("Say hello"),
            &ModelName::new("gpt-4o"),
            &ApiKey::new("sk-test"),
            |chunk: &str| -> Result<(), std::convert::Infallible> {
                seen.push(chunk.to_string());
                Ok(())
            },
            &[],
        )
        .await
}

#[tokio::test]
async fn tokens_then_final_response() {
    let backend = FakeBackend::new().stream(
        STREAM,
        &["Hel", "lo", " world"],
        Ok(json!({"response": "Hello world", "created_at": "2024-01-01 00:00:00"})),
    );
    let client = client_for(&backend).await;
    let mut seen = Vec::new();

    let response = ask(&client, &mut seen).await.expect("stream should succeed");

    assert_eq!(seen, ["Hel", "lo", " world"]);
    assert_eq!(seen.concat(), response.response.as_str());
    assert_eq!(client.bridge().listener_count(TOKEN_EVENT), 0);
    assert_eq!(backend.record().listens, [TOKEN_EVENT]);
    backend.wait_for("one unlisten", |r| r.unlistens == 1).await;
    assert_eq!(
        backend.args_of(STREAM),
        Some(json!({
            "inputSessionId": "s1",
            "message": "Say hello",
            "model": "gpt-4o",
            "apiKey": "sk-test",
        }))
    );
}

#[tokio::test]
async fn rejection_after_two_tokens_keeps_delivered_tokens() {
    let backend = FakeBackend::new().stream(STREAM, &["a", "b"], Err("rate limited".into()));
    let client = client_for(&backend).await;
    let mut seen = Vec::new();

    assert!(ask(&client, &mut seen).await.is_none());
    assert_eq!(seen, ["a", "b"]);
    assert_eq!(client.bridge().listener_count(TOKEN_EVENT), 0);
    backend.wait_for("one unlisten", |r| r.unlistens == 1).await;
}

#[tokio::test]
async fn sequential_streams_reuse_one_connection() {
    let backend = FakeBackend::new().stream(
        STREAM,
        &["ok"],
        Ok(json!({"response": "ok", "created_at": "2024-01-01 00:00:00"})),
    );
    let client = client_for(&backend).await;

    for _ in 0..3 {
        let mut seen = Vec::new();
        assert!(ask(&client, &mut seen).await.is_some());
        assert_eq!(seen, ["ok"], "earlier streams must not leak tokens");
    }
    assert_eq!(client.bridge().listener_count(TOKEN_EVENT), 0);
    backend.wait_for("three unlistens", |r| r.unlistens == 3).await;
}

#[tokio::test]
async fn callback_failure_releases_the_unanswered_call() {
    let backend = FakeBackend::new().stream_then_silence(STREAM, &["a", "b"]);
    let client = client_for(&backend).await;

    let response = client
        .stream_chat_gpt_response(
            &SessionId::new("s1"),
            &UserInput::new("Say hello"),
            &ModelName::new("gpt-4o"),
            &ApiKey::new("sk-test"),
            |_chunk: &str| -> Result<(), &str> { Err("display closed") },
            &[],
        )
        .await;

    assert!(response.is_none());
    assert_eq!(client.bridge().pending_calls(), 0);
    assert_eq!(client.bridge().listener_count(TOKEN_EVENT), 0);
    backend.wait_for("one unlisten", |r| r.unlistens == 1).await;
}

#[tokio::test]
async fn connection_loss_mid_stream_is_absent() {
    let backend = FakeBackend::new().on(STREAM, Script::Hangup);
    let client = client_for(&backend).await;
    let mut seen = Vec::new();

    assert!(ask(&client, &mut seen).await.is_none());
    assert!(seen.is_empty());
    assert_eq!(client.bridge().listener_count(TOKEN_EVENT), 0);
}
