//! Materialization of persisted chat history into display records.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;

use crate::render::render_markdown;
use crate::types::{DatabaseChatEntry, HtmlChatEntry, RawDatabaseChatEntry, SessionChats};

/// Naive forms written by the backend; they are UTC wall-clock times.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a backend timestamp. Accepts RFC 3339 and the naive UTC form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Render the answer and parse the timestamp; session id and question pass
/// through untouched.
pub fn materialize(raw: &RawDatabaseChatEntry) -> DatabaseChatEntry {
    DatabaseChatEntry {
        session_id: raw.session_id.clone(),
        question: raw.question.clone(),
        answer: render_markdown(&raw.answer),
        created_at: parse_timestamp(&raw.created_at),
    }
}

impl From<&RawDatabaseChatEntry> for DatabaseChatEntry {
    fn from(raw: &RawDatabaseChatEntry) -> Self {
        materialize(raw)
    }
}

pub fn materialize_all(raw: &[RawDatabaseChatEntry]) -> Vec<DatabaseChatEntry> {
    raw.iter().map(materialize).collect()
}

/// Fold entries into per-session lists. Sessions keep the order in which they
/// are first seen.
pub fn group_by_session(entries: &[DatabaseChatEntry]) -> Vec<SessionChats> {
    let mut index = HashMap::new();
    let mut grouped: Vec<SessionChats> = Vec::new();
    for entry in entries {
        let slot = *index.entry(entry.session_id.clone()).or_insert_with(|| {
            grouped.push(SessionChats {
                session_id: entry.session_id.clone(),
                entries: Vec::new(),
            });
            grouped.len() - 1
        });
        grouped[slot].entries.push(HtmlChatEntry {
            question: entry.question.clone(),
            answer: entry.answer.clone(),
        });
    }
    grouped
}
