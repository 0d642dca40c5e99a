//! Branded string types and the chat records exchanged with the backend.
//!
//! Every branded type is a single-field newtype over `String` that serializes
//! as a plain JSON string, so the wire shape is unchanged while the compiler
//! keeps a session id from being passed where an API key is expected.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! branded_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! display_as_str {
    ($($name:ident),+) => {
        $(
            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_tuple(stringify!($name)).field(&self.0).finish()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

branded_string!(
    /// Opaque conversation handle. Obtained from `generate_session_id`.
    SessionId
);
branded_string!(
    /// Credential for the AI provider. Never printed: `Debug` is redacted
    /// and there is no `Display`.
    ApiKey
);
branded_string!(
    /// Chat message text as typed by the user.
    UserInput
);
branded_string!(
    /// Untrusted markdown as produced by the model.
    Markdown
);
branded_string!(
    /// Identifier of an AI model reported by the backend.
    ModelName
);
branded_string!(
    /// Base64 image payload without the `data:...;base64,` prefix.
    EncodedImage
);

display_as_str!(SessionId, UserInput, Markdown, ModelName);

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl ApiKey {
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedImage({} bytes)", self.0.len())
    }
}

impl EncodedImage {
    /// Encode raw image bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Strip the `data:<mime>;base64,` prefix of a data URL. A string without
    /// the prefix is taken as already encoded.
    pub fn from_data_url(data_url: &str) -> Self {
        match data_url.split_once(',') {
            Some((header, payload)) if header.starts_with("data:") => Self(payload.to_string()),
            _ => Self(data_url.to_string()),
        }
    }
}

impl ModelName {
    pub fn is_listed_in(&self, available: &[ModelName]) -> bool {
        available.iter().any(|m| m == self)
    }
}

/// Sanitized markup. Only [`crate::render::render_markdown`] creates values
/// of this type; it is not `Deserialize`.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Html(String);

impl Html {
    pub(crate) fn from_sanitized(markup: String) -> Self {
        Self(markup)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for Html {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

display_as_str!(Html);

/// One persisted Q&A turn as the backend sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDatabaseChatEntry {
    pub session_id: SessionId,
    pub question: UserInput,
    pub answer: Markdown,
    pub created_at: String,
}

/// One persisted Q&A turn ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseChatEntry {
    pub session_id: SessionId,
    pub question: UserInput,
    pub answer: Html,
    /// `None` when the backend timestamp could not be parsed.
    pub created_at: Option<DateTime<Utc>>,
}

/// A rendered turn without its session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HtmlChatEntry {
    pub question: UserInput,
    pub answer: Html,
}

/// All rendered turns of one session, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionChats {
    pub session_id: SessionId,
    pub entries: Vec<HtmlChatEntry>,
}

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: Markdown,
    pub created_at: String,
}

impl ChatResponse {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        crate::history::parse_timestamp(&self.created_at)
    }
}
