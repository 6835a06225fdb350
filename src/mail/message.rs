use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::time::{self, RawInstant};

use super::address::{extract_address, same_address, split_address_list};
use super::body::{MessagePart, extract_plain_text};

/// Message metadata the analytics pipeline works on. Timestamps are already
/// canonical by the time a `Message` exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Offset the source stamped `timestamp` with, if it stated one.
    #[serde(skip)]
    pub offset: Option<FixedOffset>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub snippet: String,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        thread_id: Option<&str>,
        timestamp: DateTime<Utc>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.map(ToOwned::to_owned),
            timestamp,
            offset: None,
            from: from.into(),
            to: Vec::new(),
            subject: String::new(),
            body_text: String::new(),
            snippet: String::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    pub fn with_body(mut self, body_text: impl Into<String>) -> Self {
        self.body_text = body_text.into();
        self
    }

    /// Grouping key: the thread id, or the message's own id when it has none.
    pub fn thread_key(&self) -> &str {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(self.id.as_str())
    }

    pub fn sender_address(&self) -> Option<String> {
        extract_address(&self.from)
    }

    pub fn is_from(&self, user_address: Option<&str>) -> bool {
        user_address.is_some_and(|user| same_address(&self.from, user))
    }

    /// Subject, snippet and body joined for scoring.
    pub fn combined_text(&self) -> String {
        [&self.subject, &self.snippet, &self.body_text]
            .into_iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Subject and snippet, which is what urgency and topic rules look at.
    pub fn headline(&self) -> String {
        format!("{} {}", self.subject, self.snippet)
    }
}

/// A message as delivered by the fetch layer: either a flat record or a
/// provider resource with a header list and multi-part payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<RawInstant>,
    #[serde(default)]
    pub internal_date: Option<RawInstant>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<Recipients>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    fn addresses(&self) -> Vec<String> {
        match self {
            Self::One(list) => split_address_list(list),
            Self::Many(items) => items
                .iter()
                .filter_map(|item| extract_address(item))
                .collect(),
        }
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = AppError;

    fn try_from(raw: RawMessage) -> AppResult<Self> {
        let id = raw
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::MalformedMessage("message has no id".to_string()))?;

        let payload = raw.payload.unwrap_or_default();
        let header_date = payload.header("Date").map(RawInstant::Text);
        let instant = raw
            .timestamp
            .or(raw.internal_date)
            .or(header_date)
            .ok_or_else(|| AppError::MalformedMessage(format!("message {id} has no timestamp")))?;
        let offset = time::stated_offset(&instant);
        let timestamp = time::normalize_instant(&instant)
            .map_err(|err| AppError::MalformedMessage(format!("message {id}: {err}")))?;

        let to = match raw.to {
            Some(recipients) => recipients.addresses(),
            None => payload
                .header("To")
                .map(|list| split_address_list(&list))
                .unwrap_or_default(),
        };

        let snippet = raw
            .snippet
            .map(|snippet| html_escape::decode_html_entities(&snippet).to_string())
            .unwrap_or_default();

        let body_text = raw
            .body_text
            .filter(|text| !text.trim().is_empty())
            .or_else(|| extract_plain_text(&payload))
            .unwrap_or_default();

        Ok(Self {
            thread_id: raw.thread_id.filter(|id| !id.trim().is_empty()),
            timestamp,
            offset,
            from: raw.from.or_else(|| payload.header("From")).unwrap_or_default(),
            to,
            subject: raw
                .subject
                .or_else(|| payload.header("Subject"))
                .unwrap_or_default(),
            body_text,
            snippet,
            id,
        })
    }
}

/// Converts a fetched batch, dropping malformed records. Returns the
/// messages and how many were dropped.
pub fn ingest(raw: Vec<RawMessage>) -> (Vec<Message>, usize) {
    let mut messages = Vec::with_capacity(raw.len());
    let mut malformed = 0;

    for record in raw {
        match Message::try_from(record) {
            Ok(message) => messages.push(message),
            Err(err) => {
                malformed += 1;
                warn!(error = %err, "skipping malformed message");
            }
        }
    }

    (messages, malformed)
}
