use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::mail::Message;

/// Messages sharing a conversation key, oldest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadSet {
    pub threads: BTreeMap<String, Thread>,
    /// Messages dropped for lacking an id.
    pub skipped: usize,
}

impl ThreadSet {
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

/// Groups by thread id (or the message's own id when it has none). Within a
/// thread, messages are ordered by timestamp; ties keep input order.
pub fn group_into_threads(messages: &[Message]) -> ThreadSet {
    let mut set = ThreadSet::default();

    for message in messages {
        if message.id.trim().is_empty() {
            set.skipped += 1;
            warn!(thread = ?message.thread_id, "dropping message without id");
            continue;
        }

        let key = message.thread_key().to_string();
        set.threads
            .entry(key.clone())
            .or_insert_with(|| Thread {
                id: key,
                messages: Vec::new(),
            })
            .messages
            .push(message.clone());
    }

    for thread in set.threads.values_mut() {
        thread.messages.sort_by_key(|message| message.timestamp);
    }

    set
}

pub fn last_message(thread: &Thread) -> Option<&Message> {
    thread.last_message()
}
