//! Client for the cuuri chat backend: branded domain types, one adapter per
//! backend command, token streaming, and history rendering.
//! Used by the `cuuri` command-line front end.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod history;
pub mod messages;
pub mod render;
pub mod stream;
pub mod types;

pub use bridge::{connect, Bridge, BridgeError, Listener, WsBridge};
pub use commands::{ChatClient, TOKEN_EVENT};
pub use config::{default_config_path, Config, ConfigError};
pub use history::{group_by_session, materialize, parse_timestamp};
pub use render::render_markdown;
pub use stream::StreamError;
pub use types::{
    ApiKey, ChatResponse, DatabaseChatEntry, EncodedImage, Html, HtmlChatEntry, Markdown,
    ModelName, RawDatabaseChatEntry, SessionChats, SessionId, UserInput,
};
